//! Run configuration. Built once from the environment (or any key lookup) and
//! passed explicitly into the pipeline.
use std::fmt;
use std::str::FromStr;

use sqlx::postgres::PgSslMode;
use thiserror::Error;

use crate::migration::identity::DuplicatePolicy;
use crate::util::env as env_util;

pub const SUPABASE_URL: &str = "SUPABASE_URL";
pub const SUPABASE_SERVICE_KEY: &str = "SUPABASE_SERVICE_KEY";
pub const CLOUD_SQL_HOST: &str = "CLOUD_SQL_HOST";
pub const CLOUD_SQL_DATABASE: &str = "CLOUD_SQL_DATABASE";
pub const CLOUD_SQL_USER: &str = "CLOUD_SQL_USER";
pub const CLOUD_SQL_PASSWORD: &str = "CLOUD_SQL_PASSWORD";

pub const REQUIRED_KEYS: [&str; 6] = [
    SUPABASE_URL,
    SUPABASE_SERVICE_KEY,
    CLOUD_SQL_HOST,
    CLOUD_SQL_DATABASE,
    CLOUD_SQL_USER,
    CLOUD_SQL_PASSWORD,
];

pub const OPTIONAL_KEYS: [&str; 6] = [
    "CLOUD_SQL_PORT",
    "CLOUD_SQL_SSLMODE",
    "CLOUD_SQL_ID_TYPE",
    "MIGRATE_PAGE_SIZE",
    "MIGRATE_BATCH_SIZE",
    "SUPABASE_TIMEOUT_SECS",
];

/// PostgREST caps responses at 1000 rows by default.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PG_PORT: u16 = 5432;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env: {0:?}")]
    Missing(Vec<String>),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

#[derive(Clone)]
pub struct SourceConfig {
    pub url: String,
    pub service_key: String,
    pub timeout_secs: u64,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("url", &self.url)
            .field("service_key", &"***")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// SQL type of the destination `runner_id` / `requestor_id` columns. Keys are
/// bound as text and cast to this type inside the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdColumnType {
    #[default]
    Text,
    Integer,
    BigInt,
    Uuid,
}

impl IdColumnType {
    /// Cast suffix appended after each key placeholder (`$2::bigint`); none for text.
    pub fn cast_suffix(self) -> &'static str {
        match self {
            IdColumnType::Text => "",
            IdColumnType::Integer => "::integer",
            IdColumnType::BigInt => "::bigint",
            IdColumnType::Uuid => "::uuid",
        }
    }
}

impl FromStr for IdColumnType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "varchar" => Ok(IdColumnType::Text),
            "integer" | "int" | "int4" => Ok(IdColumnType::Integer),
            "bigint" | "int8" => Ok(IdColumnType::BigInt),
            "uuid" => Ok(IdColumnType::Uuid),
            _ => Err(()),
        }
    }
}

#[derive(Clone)]
pub struct DestinationConfig {
    /// Host name, IP address, or a Unix socket directory (leading `/`).
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: PgSslMode,
    pub id_type: IdColumnType,
}

impl DestinationConfig {
    pub fn is_unix_socket(&self) -> bool {
        self.host.starts_with('/')
    }
}

impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("ssl_mode", &self.ssl_mode)
            .field("id_type", &self.id_type)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub page_size: usize,
    pub batch_size: usize,
    pub duplicate_policy: DuplicatePolicy,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            duplicate_policy: DuplicatePolicy::LastWins,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub run: RunOptions,
}

impl MigrationConfig {
    /// Build from the process environment (after dotenv). Logs a redacted snapshot.
    pub fn from_env() -> Result<Self, ConfigError> {
        let missing = env_util::preflight_check("action_comments", &REQUIRED_KEYS, &OPTIONAL_KEYS);
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        Self::from_lookup(env_util::env_opt)
    }

    /// Build from an arbitrary key lookup. Blank values count as missing, and every
    /// missing required key is reported at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|&&k| get(k).is_none())
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        let required = |key: &str| get(key).unwrap_or_default().trim().to_string();

        let url = required(SUPABASE_URL);
        match url::Url::parse(&url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::Invalid {
                    key: SUPABASE_URL.into(),
                    value: url,
                })
            }
        }

        let ssl_mode = match get("CLOUD_SQL_SSLMODE") {
            Some(raw) => PgSslMode::from_str(raw.trim()).map_err(|_| ConfigError::Invalid {
                key: "CLOUD_SQL_SSLMODE".into(),
                value: raw,
            })?,
            None => PgSslMode::Prefer,
        };

        let id_type: IdColumnType = parse_or(&get, "CLOUD_SQL_ID_TYPE", IdColumnType::Text)?;

        let page_size: usize = parse_or(&get, "MIGRATE_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        let batch_size: usize = parse_or(&get, "MIGRATE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        for (key, value) in [("MIGRATE_PAGE_SIZE", page_size), ("MIGRATE_BATCH_SIZE", batch_size)] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key: key.into(),
                    value: "0".into(),
                });
            }
        }

        Ok(Self {
            source: SourceConfig {
                url: url.trim_end_matches('/').to_string(),
                service_key: required(SUPABASE_SERVICE_KEY),
                timeout_secs: parse_or(&get, "SUPABASE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
            },
            destination: DestinationConfig {
                host: required(CLOUD_SQL_HOST),
                port: parse_or(&get, "CLOUD_SQL_PORT", DEFAULT_PG_PORT)?,
                database: required(CLOUD_SQL_DATABASE),
                user: required(CLOUD_SQL_USER),
                // Passwords are taken verbatim; surrounding whitespace may be significant.
                password: get(CLOUD_SQL_PASSWORD).unwrap_or_default(),
                ssl_mode,
                id_type,
            },
            run: RunOptions {
                page_size,
                batch_size,
                ..RunOptions::default()
            },
        })
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            key: key.into(),
            value: raw,
        }),
        None => Ok(default),
    }
}
