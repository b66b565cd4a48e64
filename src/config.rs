//! Cashier settings loaded from a TOML file.
//!
//! ```toml
//! [cashier]
//! user_create = "yes"
//! acquire_timeout_secs = 60
//!
//! [database]
//! path = "cashier.db"
//! ```

use crate::error::Result;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub cashier: CashierConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CashierConfig {
    /// Register unknown currency urls on first use instead of rejecting them.
    #[serde(default, deserialize_with = "deserialize_switch")]
    pub user_create: bool,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl CashierConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for CashierConfig {
    fn default() -> Self {
        Self {
            user_create: false,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; an in-memory database is used when absent.
    pub path: Option<PathBuf>,
}

fn default_acquire_timeout_secs() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_SECS
}

/// Accepts a TOML boolean or one of `yes`/`on`/`no`/`off`.
fn deserialize_switch<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Switch {
        Bool(bool),
        Word(String),
    }

    match Switch::deserialize(deserializer)? {
        Switch::Bool(value) => Ok(value),
        Switch::Word(word) => match word.to_lowercase().as_str() {
            "yes" | "on" | "true" => Ok(true),
            "no" | "off" | "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected yes/on/no/off, found '{other}'"
            ))),
        },
    }
}
