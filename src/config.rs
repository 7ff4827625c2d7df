use std::{fs::File, num::NonZeroU32, path::Path};

use serde::Deserialize;
use tracing::{Level, event};

use crate::{
    db::{PostgresStore, Store},
    record::RecordSchema,
    strava::{StravaClubFeed, StravaCredentials},
    supabase::SupabaseStore,
};

const DEFAULT_CONFIG_PATH: &str = "/etc/strava-club-sync/config.yaml";
const DEFAULT_API_BASE: &str = "https://www.strava.com/api/v3";
const DEFAULT_TOKEN_URL: &str = "https://www.strava.com/oauth/token";

/// Something is wrong with the configuration. Nothing has been synced yet.
#[derive(Debug)]
pub enum ConfigError {
    Unreadable(String, std::io::Error),
    Syntax(serde_yaml::Error),
    MissingVariable(&'static str),
    InvalidTable(String),
}
impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Unreadable(path, e) => write!(f, "config file {path} not readable: {e}"),
            Self::Syntax(e) => write!(f, "config file had syntax errors: {e}"),
            Self::MissingVariable(name) => {
                write!(f, "Missing required environment variable: {name}")
            }
            Self::InvalidTable(table) => {
                write!(f, "{table:?} is not a plain table identifier.")
            }
        }
    }
}
impl std::error::Error for ConfigError {}

/// The non-secret part of the config, as written in the YAML file.
#[derive(Debug, Deserialize)]
pub(crate) struct ConfigData {
    pub global: GlobalConfig,
    pub schema: RecordSchema,
    pub strava: StravaConfigData,
    pub store: StoreConfigData,
}
impl ConfigData {
    pub fn per_page(&self) -> u32 {
        self.strava
            .per_page
            .unwrap_or_else(|| self.schema.default_per_page())
    }

    pub fn table(&self) -> Result<String, ConfigError> {
        let table = self
            .store
            .table
            .clone()
            .unwrap_or_else(|| self.schema.default_table().to_owned());
        if is_plain_identifier(&table) {
            Ok(table)
        } else {
            Err(ConfigError::InvalidTable(table))
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GlobalConfig {
    pub log_level: String,
    /// How often should we sync? In s. Run once and exit when unset.
    pub sync_frequency: Option<NonZeroU32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StravaConfigData {
    pub club_id: String,
    pub per_page: Option<u32>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_owned()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_owned()
}

#[derive(Debug, Deserialize)]
pub(crate) struct StoreConfigData {
    pub backend: Backend,
    pub table: Option<String>,
}

/// How to reach the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Backend {
    /// Supabase REST endpoint, authenticated with the project key.
    Supabase,
    /// Direct connection to the underlying Postgres.
    Postgres,
}

/// Everything needed to talk to Strava.
#[derive(Debug, Clone)]
pub struct StravaConfig {
    pub club_id: String,
    pub per_page: u32,
    pub api_base: String,
    pub token_url: String,
    pub credentials: StravaCredentials,
}

/// Secrets from the environment (or `.env`).
#[derive(Clone)]
pub(crate) struct Secrets {
    pub strava: StravaCredentials,
    pub store: StoreSecrets,
}

#[derive(Clone)]
pub(crate) enum StoreSecrets {
    Supabase { url: String, key: String },
    Postgres { database_url: String },
}
impl std::fmt::Debug for StoreSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Supabase { url, .. } => f
                .debug_struct("Supabase")
                .field("url", url)
                .field("key", &"[redacted]")
                .finish(),
            Self::Postgres { .. } => f
                .debug_struct("Postgres")
                .field("database_url", &"[redacted]")
                .finish(),
        }
    }
}

impl Secrets {
    /// Read all secrets required for `backend` through `lookup`, failing on the first one missing.
    pub fn from_lookup<F>(backend: Backend, lookup: F) -> Result<Secrets, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_owned())
                .ok_or(ConfigError::MissingVariable(name))
        };
        let strava = StravaCredentials {
            client_id: require("STRAVA_CLIENT_ID")?,
            client_secret: require("STRAVA_CLIENT_SECRET")?,
            refresh_token: require("STRAVA_REFRESH_TOKEN")?,
        };
        let store = match backend {
            Backend::Supabase => StoreSecrets::Supabase {
                url: require("SUPABASE_URL")?,
                key: require("SUPABASE_KEY")?,
            },
            Backend::Postgres => StoreSecrets::Postgres {
                database_url: require("DATABASE_URL")?,
            },
        };
        Ok(Secrets { strava, store })
    }

    pub fn from_env(backend: Backend) -> Result<Secrets, ConfigError> {
        Self::from_lookup(backend, |name| std::env::var(name).ok())
    }
}

/// The complete, ready to use config.
#[derive(Debug)]
pub(crate) struct Config {
    pub global: GlobalConfig,
    pub schema: RecordSchema,
    pub feed: StravaClubFeed,
    pub store: Store,
}
impl Config {
    async fn from_config_data(
        cd: ConfigData,
        secrets: Secrets,
    ) -> Result<Config, Box<dyn std::error::Error>> {
        let table = cd.table()?;
        let strava = StravaConfig {
            per_page: cd.per_page(),
            club_id: cd.strava.club_id,
            api_base: cd.strava.api_base,
            token_url: cd.strava.token_url,
            credentials: secrets.strava,
        };
        let feed = StravaClubFeed::new(crate::strava::create_client()?, strava);

        let store = match secrets.store {
            StoreSecrets::Supabase { url, key } => {
                Store::Supabase(SupabaseStore::new(&url, &key, &table)?)
            }
            StoreSecrets::Postgres { database_url } => {
                Store::Postgres(PostgresStore::connect(&database_url, table, cd.schema).await?)
            }
        };

        Ok(Config {
            global: cd.global,
            schema: cd.schema,
            feed,
            store,
        })
    }

    /// Load `.env` if there is one, then the YAML file and the secrets.
    pub async fn create() -> Result<Config, Box<dyn std::error::Error>> {
        if let Err(e) = dotenvy::dotenv() {
            event!(Level::DEBUG, "No .env file loaded: {e}");
        }
        let path =
            std::env::var("CLUB_SYNC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        let f = match File::open(Path::new(&path)) {
            Ok(x) => x,
            Err(e) => {
                event!(Level::ERROR, "config file {path} not readable: {e}");
                return Err(Box::new(ConfigError::Unreadable(path, e)));
            }
        };
        let config_data: ConfigData = match serde_yaml::from_reader(f) {
            Ok(x) => x,
            Err(e) => {
                event!(Level::ERROR, "config file had syntax errors: {e}");
                return Err(Box::new(ConfigError::Syntax(e)));
            }
        };
        let secrets = Secrets::from_env(config_data.store.backend)?;
        Config::from_config_data(config_data, secrets).await
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
