//! The destination table through Supabases REST interface (PostgREST).

use reqwest::header;
use tracing::{trace, warn};

use crate::{
    db::{BackendError, DBError, rows_to_activities},
    record::{ActivityRecord, StoredActivity},
};

/// A table in a Supabase project, accessed with the project key.
#[derive(Debug)]
pub struct SupabaseStore {
    client: reqwest::Client,
    table_url: String,
}
impl SupabaseStore {
    /// `table` must already be a plain identifier; it is put into the URL as is.
    pub fn new(project_url: &str, key: &str, table: &str) -> Result<SupabaseStore, DBError> {
        Ok(SupabaseStore {
            client: create_client(key)?,
            table_url: table_url(project_url, table),
        })
    }

    pub async fn select_all(&self) -> Result<Vec<StoredActivity>, DBError> {
        trace!("GET {}", self.table_url);
        let response = self
            .client
            .get(&self.table_url)
            .query(&[("select", "*")])
            .send()
            .await
            .map_err(|e| DBError::SelectActivities(BackendError::Http(e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Supabase answered the select with {status}: {text}");
            return Err(DBError::SelectActivities(BackendError::Status(status)));
        }
        let rows = response
            .json::<Vec<serde_json::Value>>()
            .await
            .map_err(|e| DBError::SelectActivities(BackendError::Http(e)))?;
        rows_to_activities(rows)
    }

    pub async fn insert(&self, activity: &ActivityRecord) -> Result<(), DBError> {
        trace!("POST {}", self.table_url);
        let response = self
            .client
            .post(&self.table_url)
            .header("Prefer", "return=minimal")
            .json(activity)
            .send()
            .await
            .map_err(|e| DBError::InsertActivity(BackendError::Http(e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Supabase answered the insert with {status}: {text}");
            return Err(DBError::InsertActivity(BackendError::Status(status)));
        }
        Ok(())
    }
}

fn table_url(project_url: &str, table: &str) -> String {
    format!("{}/rest/v1/{table}", project_url.trim_end_matches('/'))
}

/// Create a Client that sends the project key both as `apikey` and as bearer token.
fn create_client(key: &str) -> Result<reqwest::Client, DBError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );
    let mut apikey = header::HeaderValue::from_str(key).map_err(|_| DBError::InvalidKey)?;
    apikey.set_sensitive(true);
    headers.insert("apikey", apikey);
    let mut auth_value =
        header::HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| DBError::InvalidKey)?;
    auth_value.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, auth_value);
    reqwest::Client::builder()
        .default_headers(headers)
        .use_rustls_tls()
        .build()
        .map_err(DBError::CannotCreateClient)
}
