//! Configuration for the cluster-membership agent binary.
//!
//! Loaded the same way as the teacher's `WardenConfig`: a flat TOML file
//! deserialized with `serde`, `humantime_serde` for durations, and
//! field-level defaults so most deployments only need to set the
//! coordination-store address and the cluster's root path.

use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MembershipConfig {
    /// The coordination-store connect string, e.g. `"zk1:2181,zk2:2181"`.
    pub connect_string: String,

    /// The cluster's root path in the coordination store (`R` in the data
    /// model). Must be an absolute path with no trailing slash.
    pub cluster_root: String,

    #[serde(with = "humantime_serde", default = "default_session_timeout")]
    pub session_timeout: Duration,

    /// Address the demo binary's health endpoint listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_listen_addr() -> String {
    "0.0.0.0:9420".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl MembershipConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: MembershipConfig = toml::from_str(&content).map_err(|e| {
            ConfigError::Invalid(format!("failed to parse {path} as TOML: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.cluster_root.starts_with('/') {
            return Err(ConfigError::Invalid(
                "cluster_root must be an absolute path".to_string(),
            ));
        }
        if self.cluster_root.ends_with('/') && self.cluster_root != "/" {
            return Err(ConfigError::Invalid(
                "cluster_root must not have a trailing slash".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_absolute_root() {
        let config = MembershipConfig {
            connect_string: "localhost:2181".to_string(),
            cluster_root: "relative/path".to_string(),
            session_timeout: default_session_timeout(),
            listen_addr: default_listen_addr(),
            log_filter: default_log_filter(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_trailing_slash() {
        let config = MembershipConfig {
            connect_string: "localhost:2181".to_string(),
            cluster_root: "/cluster/".to_string(),
            session_timeout: default_session_timeout(),
            listen_addr: default_listen_addr(),
            log_filter: default_log_filter(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_root() {
        let config = MembershipConfig {
            connect_string: "localhost:2181".to_string(),
            cluster_root: "/cluster".to_string(),
            session_timeout: default_session_timeout(),
            listen_addr: default_listen_addr(),
            log_filter: default_log_filter(),
        };
        assert!(config.validate().is_ok());
    }
}
