//! Run configuration.
//!
//! A [`PipelineConfig`] is read from a JSON file; every field has a default,
//! so an empty object `{}` is a valid configuration. Environment variables
//! are only consulted by [`DbSettings::from_env_defaults`], which the CLI
//! calls at startup.

use crate::dimension::KeyOrder;
use crate::error::{Result, ResultExt as _, StarError};
use crate::sink::FileFormat;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATABASE: &str = "sports_store";
pub const RAW_SCHEMA: &str = "raw";
pub const PROCESSED_SCHEMA: &str = "processed";
pub const DEFAULT_MAX_UNRESOLVED_RATIO: f64 = 0.05;

/// Where the raw sales rows come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// A CSV, Parquet or JSON file.
    File { path: PathBuf },
    /// A table previously loaded by `ingest`.
    Postgres { schema: String, table: String },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Postgres {
            schema: RAW_SCHEMA.to_owned(),
            table: crate::ingest::RAW_TABLE.to_owned(),
        }
    }
}

/// Where the star-schema tables are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    Directory {
        path: PathBuf,
        #[serde(default)]
        format: FileFormat,
    },
    Postgres {
        schema: String,
    },
    Memory,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::Postgres {
            schema: PROCESSED_SCHEMA.to_owned(),
        }
    }
}

/// Resolved connection settings.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub database: String,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            host: "postgres".to_owned(),
            port: 5432,
            user: "airflow".to_owned(),
            password: SecretString::new("airflow".into()),
            database: DEFAULT_DATABASE.to_owned(),
        }
    }
}

impl DbSettings {
    /// Defaults overridden by `POSTGRES_HOST`, `POSTGRES_PORT`,
    /// `POSTGRES_USER` and `POSTGRES_PASSWORD`. The database name is not
    /// read from the environment.
    pub fn from_env_defaults() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(host) = lookup("POSTGRES_HOST") {
            settings.host = host;
        }
        if let Some(port) = lookup("POSTGRES_PORT").and_then(|p| p.parse().ok()) {
            settings.port = port;
        }
        if let Some(user) = lookup("POSTGRES_USER") {
            settings.user = user;
        }
        if let Some(password) = lookup("POSTGRES_PASSWORD") {
            settings.password = SecretString::new(password.into());
        }
        settings
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(self.password.expose_secret())
            .database(&self.database)
    }

    /// Connection target without the password, for logs.
    pub fn describe(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

/// Connection settings from one configuration layer (a config file or
/// command-line flags). Fields left unset fall through to the layer below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    #[serde(
        serialize_with = "serialize_password",
        deserialize_with = "deserialize_password"
    )]
    pub password: Option<SecretString>,
    pub database: Option<String>,
}

fn serialize_password<S>(_password: &Option<SecretString>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("")
}

fn deserialize_password<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(|s| SecretString::new(s.into())))
}

impl DbOverrides {
    /// Apply the fields set here on top of `base`.
    #[must_use]
    pub fn over(&self, base: DbSettings) -> DbSettings {
        DbSettings {
            host: self.host.clone().unwrap_or(base.host),
            port: self.port.unwrap_or(base.port),
            user: self.user.clone().unwrap_or(base.user),
            password: self.password.clone().unwrap_or(base.password),
            database: self.database.clone().unwrap_or(base.database),
        }
    }
}

/// Everything one transformation run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub database: DbOverrides,
    pub key_order: KeyOrder,
    /// Largest tolerated share of input rows excluded from the fact table.
    pub max_unresolved_ratio: f64,
    pub log_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            sink: SinkConfig::default(),
            database: DbOverrides::default(),
            key_order: KeyOrder::default(),
            max_unresolved_ratio: DEFAULT_MAX_UNRESOLVED_RATIO,
            log_dir: None,
        }
    }
}

impl PipelineConfig {
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid JSON, or holds
    /// out-of-range values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&content)
    }

    /// # Errors
    ///
    /// Fails on malformed JSON or out-of-range values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`StarError::Config`] when the ratio is outside `0.0..=1.0`.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_unresolved_ratio) {
            return Err(StarError::Config(format!(
                "max_unresolved_ratio must be between 0 and 1, got {}",
                self.max_unresolved_ratio
            )));
        }
        Ok(())
    }
}
