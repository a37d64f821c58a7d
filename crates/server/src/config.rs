use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use estate_core::{MatchingConfig, PeriodConfig};
use estate_storage::Policy;
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "estate.toml";

/// Server configuration. Every field has a default, so an empty or
/// missing `estate.toml` yields a working setup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub matching: MatchingConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub periods: PeriodConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("estate.db"),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub log_level: String,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
            body_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid configuration")
    }

    /// Reads `$ESTATE_CONFIG` (or `./estate.toml` when present), then applies
    /// the `ESTATE_DATABASE_PATH` and `ESTATE_BIND` overrides.
    pub fn load() -> anyhow::Result<Self> {
        let explicit = std::env::var("ESTATE_CONFIG").ok();
        let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

        let mut config = if explicit.is_some() || Path::new(path).exists() {
            let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            Self::from_toml(&content).with_context(|| format!("parsing {path}"))?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("ESTATE_DATABASE_PATH").filter(|v| !v.is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(bind) = lookup("ESTATE_BIND").filter(|v| !v.is_empty()) {
            self.server.bind = bind;
        }
    }

    pub fn policy(&self) -> anyhow::Result<Policy> {
        let locks = self
            .periods
            .to_locks()
            .map_err(anyhow::Error::msg)
            .context("invalid [periods] locked entry")?;
        Ok(Policy::new(self.matching, Arc::new(locks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use estate_core::PeriodLock;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = AppConfig::from_toml("").unwrap();
        assert_eq!(cfg.matching, MatchingConfig::default());
        assert_eq!(cfg.database.path, PathBuf::from("estate.db"));
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert!(cfg.periods.locked.is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [matching]
            time_tolerance_secs = 120

            [database]
            path = "/var/lib/estate/estate.db"

            [server]
            log_level = "debug"

            [periods]
            locked = ["2025-12"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.matching.time_tolerance_secs, 120);
        assert_eq!(cfg.matching.amount_tolerance_cents, 1);
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.server.log_level, "debug");

        let policy = cfg.policy().unwrap();
        assert!(policy.locks.is_period_locked(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()));
        assert!(!policy.locks.is_period_locked(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()));
    }

    #[test]
    fn bad_locked_month_is_an_error() {
        let cfg = AppConfig::from_toml("[periods]\nlocked = [\"2025-13\"]").unwrap();
        assert!(cfg.policy().is_err());
    }

    #[test]
    fn env_overrides_win() {
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|key| match key {
            "ESTATE_DATABASE_PATH" => Some("/tmp/other.db".to_string()),
            "ESTATE_BIND" => Some("0.0.0.0:9000".to_string()),
            _ => None,
        });
        assert_eq!(cfg.database.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
    }
}
