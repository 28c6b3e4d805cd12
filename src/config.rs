//! Configuration loader for the `relief-ledger` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller), so `env::var` calls are not scattered through
//! the codebase.
use std::env;

use anyhow::{anyhow, Result};

use crate::alerts::ThresholdTable;

/// Parse an optional numeric variable with a default value.
macro_rules! parse_var {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string. `None` selects the in-memory ledger.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// TCP port the HTTP surface binds to.
    pub listen_port: u16,

    /// Alert threshold per sensor type, defaults plus overrides.
    pub thresholds: ThresholdTable,
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `DATABASE_URL` – PostgreSQL connection string (default: in-memory ledger)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `LISTEN_PORT` – HTTP port (default: 8080)
/// - `ALERT_THRESHOLDS` – overrides such as `smoke=80,flood=45`
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Same as [`load_from_env`] with an arbitrary variable source.
pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    // ---
    let db_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
    let db_pool_max = parse_var!(lookup, "DB_POOL_MAX", u32, 5);
    let listen_port = parse_var!(lookup, "LISTEN_PORT", u16, 8080);

    let thresholds = match lookup("ALERT_THRESHOLDS") {
        Some(spec) => ThresholdTable::default().with_overrides(&spec)?,
        None => ThresholdTable::default(),
    };

    Ok(Config {
        db_url,
        db_pool_max,
        listen_port,
        thresholds,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password while showing every other value.
    pub fn log_config(&self) {
        // ---
        let backend = match &self.db_url {
            Some(url) => format!("postgres ({})", mask_db_url(url)),
            None => "memory".to_string(),
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  BACKEND        : {}", backend);
        tracing::info!("  DB_POOL_MAX    : {}", self.db_pool_max);
        tracing::info!("  LISTEN_PORT    : {}", self.listen_port);
        for (sensor_type, threshold) in self.thresholds.iter() {
            tracing::info!("  THRESHOLD      : {:<8} >= {}", sensor_type.name(), threshold);
        }
    }
}

/// Replace the password portion of a connection URL with `****`.
fn mask_db_url(url: &str) -> String {
    // ---
    let start = url.find("://").map_or(0, |pos| pos + 3);
    let Some(at_pos) = url[start..].rfind('@').map(|pos| start + pos) else {
        return url.to_string();
    };
    // Everything after the first colon of the userinfo is password
    match url[start..at_pos].find(':') {
        Some(colon) => format!("{}:****{}", &url[..start + colon], &url[at_pos..]),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::SensorType;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        // ---
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_from(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        // ---
        let cfg = load(&[]).unwrap();
        assert!(cfg.db_url.is_none());
        assert_eq!(cfg.db_pool_max, 5);
        assert_eq!(cfg.listen_port, 8080);
        assert_eq!(cfg.thresholds, ThresholdTable::default());
    }

    #[test]
    fn test_overrides() {
        // ---
        let cfg = load(&[
            ("DATABASE_URL", "postgres://ledger:secret@db:5432/ledger"),
            ("DB_POOL_MAX", "12"),
            ("LISTEN_PORT", "9000"),
            ("ALERT_THRESHOLDS", "smoke=90"),
        ])
        .unwrap();
        assert_eq!(cfg.db_url.as_deref(), Some("postgres://ledger:secret@db:5432/ledger"));
        assert_eq!(cfg.db_pool_max, 12);
        assert_eq!(cfg.listen_port, 9000);
        assert_eq!(cfg.thresholds.threshold(SensorType::Smoke), 90.0);
    }

    #[test]
    fn test_invalid_values() {
        // ---
        assert!(load(&[("DB_POOL_MAX", "many")]).is_err());
        assert!(load(&[("LISTEN_PORT", "70000")]).is_err());
        assert!(load(&[("ALERT_THRESHOLDS", "volcano=3")]).is_err());
    }

    #[test]
    fn test_empty_database_url_means_memory() {
        // ---
        let cfg = load(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(cfg.db_url.is_none());
    }

    #[test]
    fn test_mask_db_url() {
        // ---
        assert_eq!(
            mask_db_url("postgres://ledger:secret@db:5432/ledger"),
            "postgres://ledger:****@db:5432/ledger"
        );
        assert_eq!(
            mask_db_url("postgres://ledger@db/ledger"),
            "postgres://ledger@db/ledger"
        );
        assert_eq!(mask_db_url("postgres://db/ledger"), "postgres://db/ledger");
    }

    #[test]
    fn test_mask_db_url_password_with_delimiters() {
        // ---
        assert_eq!(mask_db_url("postgres://u:pa:ss@h"), "postgres://u:****@h");
        assert_eq!(
            mask_db_url("postgres://ledger:p@ss:w0rd@db:5432/ledger"),
            "postgres://ledger:****@db:5432/ledger"
        );
        assert_eq!(mask_db_url("ledger:secret@db/ledger"), "ledger:****@db/ledger");
    }
}
