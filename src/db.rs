//! All the db-related functions

use std::future::Future;

use itertools::Itertools;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions, types::Json};
use tracing::{trace, warn};

use crate::{
    record::{ActivityRecord, RecordSchema, StoredActivity},
    supabase::SupabaseStore,
};

#[derive(Debug)]
pub enum DBError {
    Connect(sqlx::Error),
    CannotCreateClient(reqwest::Error),
    InvalidKey,
    SelectActivities(BackendError),
    InsertActivity(BackendError),
    Deserialize(serde_json::Error),
}
impl std::fmt::Display for DBError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Connect(e) => {
                write!(f, "Unable to connect to the DB. Inner Error: {e}.")
            }
            Self::CannotCreateClient(e) => {
                write!(f, "Unable to create a reqwest client for the DB. Inner Error: {e}.")
            }
            Self::InvalidKey => {
                write!(f, "The DB key cannot be sent as an http header.")
            }
            Self::SelectActivities(e) => {
                write!(
                    f,
                    "Unable to select activities from the DB. Inner Error: {e}."
                )
            }
            Self::InsertActivity(e) => {
                write!(f, "Unable to insert activity into the DB. Inner Error: {e}.")
            }
            Self::Deserialize(e) => {
                write!(f, "A row in the DB does not look like an activity: {e}.")
            }
        }
    }
}
impl std::error::Error for DBError {}

/// What actually failed below a [`DBError`], depending on the backend in use.
#[derive(Debug)]
pub enum BackendError {
    Sql(sqlx::Error),
    Http(reqwest::Error),
    Status(reqwest::StatusCode),
}
impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Sql(e) => write!(f, "sqlx Error: {e}"),
            Self::Http(e) => write!(f, "reqwest Error: {e}"),
            Self::Status(status) => write!(f, "HTTP {status}"),
        }
    }
}

/// The destination table.
///
/// Every insert stands alone; there is no transaction around a batch.
pub trait ActivityStore {
    /// Every row currently in the table.
    fn select_all(&self) -> impl Future<Output = Result<Vec<StoredActivity>, DBError>> + Send;

    /// Insert a single row. The row id is assigned by the database.
    fn insert(&self, activity: &ActivityRecord) -> impl Future<Output = Result<(), DBError>> + Send;
}

/// The configured backend.
#[derive(Debug)]
pub enum Store {
    Supabase(SupabaseStore),
    Postgres(PostgresStore),
}
impl ActivityStore for Store {
    async fn select_all(&self) -> Result<Vec<StoredActivity>, DBError> {
        match self {
            Self::Supabase(x) => x.select_all().await,
            Self::Postgres(x) => x.select_all().await,
        }
    }

    async fn insert(&self, activity: &ActivityRecord) -> Result<(), DBError> {
        match self {
            Self::Supabase(x) => x.insert(activity).await,
            Self::Postgres(x) => x.insert(activity).await,
        }
    }
}

/// Deserialize raw rows, logging the first one that does not fit.
pub fn rows_to_activities(rows: Vec<serde_json::Value>) -> Result<Vec<StoredActivity>, DBError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<StoredActivity>(row.clone()).map_err(|e| {
                warn!("Cannot read row {row} from the DB.");
                DBError::Deserialize(e)
            })
        })
        .collect()
}

/// Direct connection to the Postgres database behind the table.
#[derive(Debug)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
    table: String,
    schema: RecordSchema,
}
impl PostgresStore {
    /// `table` must already be a plain identifier; it is quoted but not escaped.
    pub async fn connect(
        database_url: &str,
        table: String,
        schema: RecordSchema,
    ) -> Result<PostgresStore, DBError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(DBError::Connect)?;
        Ok(PostgresStore {
            pool,
            table,
            schema,
        })
    }

    async fn select_all(&self) -> Result<Vec<StoredActivity>, DBError> {
        let statement = select_statement(&self.table);
        trace!("{statement}");
        let rows: Vec<Json<serde_json::Value>> = sqlx::query_scalar(&statement)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DBError::SelectActivities(BackendError::Sql(e)))?;
        rows_to_activities(rows.into_iter().map(|Json(row)| row).collect())
    }

    async fn insert(&self, activity: &ActivityRecord) -> Result<(), DBError> {
        let statement = insert_statement(&self.table, self.schema);
        trace!("{statement}");
        sqlx::query(&statement)
            .bind(Json(activity))
            .execute(&self.pool)
            .await
            .map_err(|e| DBError::InsertActivity(BackendError::Sql(e)))?;
        Ok(())
    }
}

fn select_statement(table: &str) -> String {
    format!("SELECT row_to_json(t) FROM \"{table}\" t")
}

/// Insert exactly the schemas columns, letting postgres convert the JSON values to column types.
fn insert_statement(table: &str, schema: RecordSchema) -> String {
    let columns = schema
        .columns()
        .iter()
        .map(|column| format!("\"{column}\""))
        .join(", ");
    format!(
        "INSERT INTO \"{table}\" ({columns}) \
         SELECT {columns} FROM jsonb_populate_record(NULL::\"{table}\", $1)"
    )
}
