//! Everything directly interfacing with Strava.

use std::future::Future;

use reqwest::{StatusCode, header};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{config::StravaConfig, record::ActivityFields};

/// Create a Client that asks for JSON. Certificates are verified.
pub fn create_client() -> Result<reqwest::Client, StravaApiError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .use_rustls_tls()
        .build()
        .map_err(StravaApiError::CannotCreateClient)
}

/// Something went wrong with Strava
#[derive(Debug)]
pub enum StravaApiError {
    CannotCreateClient(reqwest::Error),
    GetToken(reqwest::Error),
    TokenRejected(StatusCode),
    GetActivities(reqwest::Error),
    ActivitiesRejected(StatusCode),
    Utf8Decode,
    Deserialize,
}
impl core::fmt::Display for StravaApiError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::CannotCreateClient(e) => {
                write!(f, "Unable to create a reqwest client for use with Strava: {e}.")
            }
            Self::GetToken(e) => {
                write!(f, "Cannot get an access token. reqwest Error: {e}")
            }
            Self::TokenRejected(status) => {
                write!(f, "Strava refused to refresh the access token: HTTP {status}")
            }
            Self::GetActivities(e) => {
                write!(f, "Cannot get club activities. reqwest Error: {e}")
            }
            Self::ActivitiesRejected(status) => {
                write!(f, "Strava refused to list club activities: HTTP {status}")
            }
            Self::Utf8Decode => {
                write!(f, "Cannot decode the message bytes as utf-8.")
            }
            Self::Deserialize => {
                write!(f, "Cannot deserialize the response.")
            }
        }
    }
}
impl core::error::Error for StravaApiError {}

/// The long-lived credentials exchanged for a bearer token on every request.
#[derive(Clone)]
pub struct StravaCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}
impl std::fmt::Debug for StravaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("StravaCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .finish()
    }
}

/// The part of the token endpoints answer we care about. Everything else is ignored.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// A single entry of `/clubs/{id}/activities`.
///
/// The club feed carries no activity id and no date.
#[derive(Debug, Deserialize)]
pub struct ClubActivity {
    pub athlete: ClubAthlete,
    pub name: String,
    pub distance: f64,
    pub moving_time: f64,
    pub sport_type: String,
}
impl From<ClubActivity> for ActivityFields {
    fn from(activity: ClubActivity) -> Self {
        Self {
            first_name: activity.athlete.firstname,
            last_name: activity.athlete.lastname,
            activity_name: activity.name,
            distance: activity.distance,
            moving_time: activity.moving_time,
            sport_type: activity.sport_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClubAthlete {
    pub firstname: String,
    /// Strava only exposes the initial to club members, e.g. "B."
    pub lastname: String,
}

/// Parse the body of a response as `T`, logging the body if that fails.
fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T, StravaApiError> {
    match serde_json::from_str(text) {
        Ok(x) => Ok(x),
        Err(e) => {
            warn!("There was an error parsing the return value from Strava: {e}");
            warn!("The complete text received was: {text}");
            Err(StravaApiError::Deserialize)
        }
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, StravaApiError> {
    response.text().await.map_err(|e| {
        warn!("There was an error reading the response from Strava as utf-8: {e}");
        StravaApiError::Utf8Decode
    })
}

/// Exchange the refresh token for a short-lived access token.
pub async fn get_access_token(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &StravaCredentials,
) -> Result<String, StravaApiError> {
    let response = match client
        .post(token_url)
        .form(&[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
            ("f", "json"),
        ])
        .send()
        .await
    {
        Ok(x) => x,
        Err(e) => {
            warn!("There was a problem getting a response from the Strava token endpoint");
            return Err(StravaApiError::GetToken(e));
        }
    };
    let status = response.status();
    let text = read_body(response).await?;
    if !status.is_success() {
        warn!("Strava answered the token refresh with {status}: {text}");
        return Err(StravaApiError::TokenRejected(status));
    }
    Ok(parse_body::<TokenResponse>(&text)?.access_token)
}

/// Where club activities come from.
pub trait ActivitySource {
    /// Get the most recent page of club activities, newest first.
    fn fetch_club_activities(
        &self,
    ) -> impl Future<Output = Result<Vec<ClubActivity>, StravaApiError>> + Send;
}

/// The activity feed of one club, read with the configured credentials.
#[derive(Debug)]
pub struct StravaClubFeed {
    client: reqwest::Client,
    config: StravaConfig,
}
impl StravaClubFeed {
    pub fn new(client: reqwest::Client, config: StravaConfig) -> Self {
        Self { client, config }
    }

    fn activities_url(&self) -> String {
        format!(
            "{}/clubs/{}/activities",
            self.config.api_base.trim_end_matches('/'),
            self.config.club_id
        )
    }
}
impl ActivitySource for StravaClubFeed {
    async fn fetch_club_activities(&self) -> Result<Vec<ClubActivity>, StravaApiError> {
        // tokens are never cached; each fetch pays for its own refresh
        let token = get_access_token(
            &self.client,
            &self.config.token_url,
            &self.config.credentials,
        )
        .await?;
        debug!("Got a fresh access token from Strava.");

        let response = match self
            .client
            .get(self.activities_url())
            .bearer_auth(token)
            .query(&[
                ("per_page", self.config.per_page.to_string()),
                ("page", "1".to_owned()),
            ])
            .send()
            .await
        {
            Ok(x) => x,
            Err(e) => {
                warn!("There was a problem getting a response from Strava");
                return Err(StravaApiError::GetActivities(e));
            }
        };
        let status = response.status();
        let text = read_body(response).await?;
        if !status.is_success() {
            warn!("Strava answered the club activity request with {status}: {text}");
            return Err(StravaApiError::ActivitiesRejected(status));
        }
        parse_body(&text)
    }
}
