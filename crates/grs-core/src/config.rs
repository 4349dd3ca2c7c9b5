//! Backing store configuration, loaded from TOML.
//!
//! ```toml
//! backend = "redis"
//! address = "localhost:6379"
//! db = 0
//! io_timeout_ms = 5000
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which backing store the node inventory lives in, and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Remote Redis server.
    Redis(RedisConfig),
    /// Embedded redb database file.
    Redb { path: PathBuf },
    /// Ephemeral in-process store; contents are lost on drop.
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Redis(RedisConfig::default())
    }
}

/// Connection parameters for a Redis backing store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisConfig {
    /// `host:port` of the server.
    pub address: String,
    /// ACL user name. Only sent when a password is also set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Empty or absent means no `AUTH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Logical database index passed to `SELECT`.
    pub db: u32,
    pub connect_timeout_ms: u64,
    /// Read/write deadline applied to every store call.
    pub io_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            username: None,
            password: None,
            db: 0,
            connect_timeout_ms: 2_000,
            io_timeout_ms: 5_000,
        }
    }
}

impl RedisConfig {
    /// The password to authenticate with, if any.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl StoreConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading store config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing store config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_local_redis() {
        let StoreConfig::Redis(redis) = StoreConfig::default() else {
            panic!("default backend should be redis");
        };
        assert_eq!(redis.address, "localhost:6379");
        assert_eq!(redis.db, 0);
        assert_eq!(redis.password(), None);
    }

    #[test]
    fn parse_redis_with_partial_fields() {
        let config = StoreConfig::from_toml_str(
            r#"
backend = "redis"
address = "10.0.0.5:6380"
password = "s3cret"
db = 2
"#,
        )
        .unwrap();
        let StoreConfig::Redis(redis) = config else {
            panic!("expected redis backend");
        };
        assert_eq!(redis.address, "10.0.0.5:6380");
        assert_eq!(redis.password(), Some("s3cret"));
        assert_eq!(redis.db, 2);
        assert_eq!(redis.io_timeout(), Duration::from_millis(5_000));
    }

    #[test]
    fn empty_password_means_no_auth() {
        let redis = RedisConfig {
            password: Some(String::new()),
            ..RedisConfig::default()
        };
        assert_eq!(redis.password(), None);
    }

    #[test]
    fn parse_redb_and_memory() {
        let redb =
            StoreConfig::from_toml_str("backend = \"redb\"\npath = \"/var/lib/grs/nodes.redb\"\n")
                .unwrap();
        assert_eq!(
            redb,
            StoreConfig::Redb {
                path: PathBuf::from("/var/lib/grs/nodes.redb")
            }
        );

        let memory = StoreConfig::from_toml_str("backend = \"memory\"\n").unwrap();
        assert_eq!(memory, StoreConfig::Memory);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(StoreConfig::from_toml_str("backend = \"etcd\"\n").is_err());
    }

    #[test]
    fn toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        let config = StoreConfig::Redis(RedisConfig {
            db: 4,
            ..RedisConfig::default()
        });
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(StoreConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = StoreConfig::from_file(Path::new("/nonexistent/store.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/store.toml"));
    }
}
