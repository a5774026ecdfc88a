//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use url::Url;

use roll_core::ValidationError;
use roll_core::token::validity_from_minutes;

/// Default lifetime of a check-in token.
pub const DEFAULT_TOKEN_VALIDITY_MINUTES: i64 = 15;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Lifetime of newly issued check-in tokens, in minutes.
    pub token_validity_minutes: i64,
    /// Page participants open to check in; the token is appended as a query parameter.
    pub check_in_base_url: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("token_validity_minutes", &self.token_validity_minutes)
            .field("check_in_base_url", &self.check_in_base_url)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("rollcall.db"),
            token_validity_minutes: DEFAULT_TOKEN_VALIDITY_MINUTES,
            check_in_base_url: "http://localhost:8080/attendance/check-in".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // ROLL_DATABASE_PATH, ROLL_TOKEN_VALIDITY_MINUTES, ...
        figment = figment.merge(Env::prefixed("ROLL_"));

        figment.extract()
    }

    /// Token lifetime as a duration.
    pub fn token_validity(&self) -> Result<chrono::Duration, ValidationError> {
        validity_from_minutes(self.token_validity_minutes)
    }

    /// The parsed check-in base URL.
    pub fn check_in_base(&self) -> anyhow::Result<Url> {
        Url::parse(&self.check_in_base_url)
            .with_context(|| format!("invalid check_in_base_url: {}", self.check_in_base_url))
    }
}

/// Returns the platform-specific config directory for rollcall.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rollcall"))
}

/// Returns the platform-specific data directory for rollcall.
///
/// On Linux: `~/.local/share/rollcall`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("rollcall"))
}
