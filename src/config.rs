//! Minimal runtime configuration helpers.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE_PATH: &str = "bikeparking.db";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Database file used by every command except `create`.
    pub database_path: PathBuf,
    /// Directory of schema migrations applied by `create`. The schema built
    /// into the binary is used when unset.
    pub schema_dir: Option<PathBuf>,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
    /// Reload files even when their fingerprint is unchanged.
    pub load_force: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_path = non_empty("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));
        let schema_dir = non_empty("SCHEMA_DIR").map(PathBuf::from);

        let busy_timeout_ms = match non_empty("BUSY_TIMEOUT_MS") {
            Some(s) => s
                .parse::<u64>()
                .map_err(|_| format!("BUSY_TIMEOUT_MS must be a number of milliseconds, got '{}'", s))?,
            None => DEFAULT_BUSY_TIMEOUT_MS,
        };

        let load_force = non_empty("LOAD_FORCE")
            .map(|s| matches!(s.as_str(), "1" | "true" | "TRUE"))
            .unwrap_or(false);

        Ok(Config {
            database_path,
            schema_dir,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            load_force,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.database_path, PathBuf::from("bikeparking.db"));
        assert_eq!(cfg.schema_dir, None);
        assert_eq!(cfg.busy_timeout, Duration::from_secs(5));
        assert!(!cfg.load_force);
    }

    #[test]
    fn environment_overrides_defaults() {
        let cfg = config(&[
            ("DATABASE_PATH", "/tmp/parking.db"),
            ("SCHEMA_DIR", " ./migrations "),
            ("BUSY_TIMEOUT_MS", "250"),
            ("LOAD_FORCE", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.database_path, PathBuf::from("/tmp/parking.db"));
        assert_eq!(cfg.schema_dir, Some(PathBuf::from("./migrations")));
        assert_eq!(cfg.busy_timeout, Duration::from_millis(250));
        assert!(cfg.load_force);
    }

    #[test]
    fn bad_timeout_is_reported() {
        let err = config(&[("BUSY_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(err.contains("BUSY_TIMEOUT_MS"), "{}", err);
    }
}
