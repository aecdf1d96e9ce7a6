//! `ClickHouse` connection settings.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Database configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// `ClickHouse` HTTP URL (e.g., <http://localhost:8123>)
    #[validate(url(message = "database URL must be a valid URL"))]
    pub url: String,
    /// Database name to use
    #[validate(length(min = 1, message = "database name cannot be empty"))]
    pub database: String,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "default".to_string(),
            user: "default".to_string(),
            password: String::new(),
        }
    }
}

impl DatabaseConfig {
    /// Load database configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CLICKQL_DB_URL`: Database URL (default: <http://localhost:8123>)
    /// - `CLICKQL_DB_NAME`: Database name (default: "default")
    /// - `CLICKQL_DB_USER`: Database user (default: "default")
    /// - `CLICKQL_DB_PASSWORD`: Database password (default: empty)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(&|name: &str| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            url: lookup("CLICKQL_DB_URL").unwrap_or(defaults.url),
            database: lookup("CLICKQL_DB_NAME").unwrap_or(defaults.database),
            user: lookup("CLICKQL_DB_USER").unwrap_or(defaults.user),
            password: lookup("CLICKQL_DB_PASSWORD").unwrap_or(defaults.password),
        }
    }
}
