//! Connection configuration.
//!
//! The values here are opaque to the core: they are handed to whatever client
//! implementation the caller wires up. Loaded from `config/config.toml` when
//! present, overridden by `TIDEWATER__`-prefixed environment variables
//! (e.g. `TIDEWATER__ENDPOINT`, `TIDEWATER__SEATS_LIMIT`).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::executor::DEFAULT_SEATS;

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub instance: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub access_key_secret: String,
    /// Prefix prepended to every table name, handy for sharing one backend
    /// instance between environments.
    #[serde(default)]
    pub table_prefix: String,
    #[serde(default = "default_seats_limit")]
    pub seats_limit: usize,
}

fn default_seats_limit() -> usize {
    DEFAULT_SEATS
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            endpoint: String::new(),
            region: String::new(),
            instance: String::new(),
            access_key_id: String::new(),
            access_key_secret: String::new(),
            table_prefix: String::new(),
            seats_limit: DEFAULT_SEATS,
        }
    }
}

impl ConnectionConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config/config").required(false))
            .add_source(Environment::with_prefix("TIDEWATER").separator("__"))
            .build()?;
        settings.try_deserialize()
    }

    pub fn table_name(&self, model: &str) -> String {
        if self.table_prefix.is_empty() {
            model.to_string()
        } else {
            format!("{}{}", self.table_prefix, model)
        }
    }
}
