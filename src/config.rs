//! Server-wide dynamic configuration. Mirrors the teacher's DTO + loader
//! pattern (`api/*_dto.rs` + `loader/parser.rs`): a `serde`-deserializable
//! struct with `deny_unknown_fields`, loaded once at startup.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Enumerated server configuration. Every field here is a known key per
/// spec.md §9; an unrecognized key in the source JSON fails config load
/// rather than being silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    pub max_concurrent_jobs: usize,
    pub client_req_timeout: f64,
    pub heartbeat_interval: f64,
    pub heartbeat_timeout: f64,
    pub default_task_fetch_interval: f64,
    pub max_message_size: usize,
    pub backbone_conn_gen: u32,
    pub allow_adhoc_conns: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_concurrent_jobs: 10,
            client_req_timeout: 1.0,
            heartbeat_interval: 5.0,
            heartbeat_timeout: 30.0,
            default_task_fetch_interval: 0.5,
            max_message_size: 1024 * 1024 * 10,
            backbone_conn_gen: 1,
            allow_adhoc_conns: false,
        }
    }
}

impl ServerConfig {
    pub fn client_req_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.client_req_timeout)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.heartbeat_interval)
    }

    pub fn heartbeat_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.heartbeat_timeout)
    }

    pub fn default_task_fetch_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.default_task_fetch_interval)
    }
}

/// Parses a `ServerConfig` out of a JSON string. Unknown keys fail the
/// load instead of being ignored, per spec.
pub fn parse_config_str(json_str: &str) -> Result<ServerConfig> {
    serde_json::from_str(json_str).map_err(Error::DeserializationError)
}

/// Parses a `ServerConfig` from a file on disk.
pub fn parse_config_file(file_path: &str) -> Result<ServerConfig> {
    let data = std::fs::read_to_string(file_path).map_err(Error::IoError)?;
    parse_config_str(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg = parse_config_str("{}").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let cfg = parse_config_str(r#"{"max_concurrent_jobs": 42}"#).unwrap();
        assert_eq!(cfg.max_concurrent_jobs, 42);
        assert_eq!(cfg.client_req_timeout, ServerConfig::default().client_req_timeout);
    }

    #[test]
    fn unknown_key_fails_load() {
        let err = parse_config_str(r#"{"totally_unknown_key": 1}"#);
        assert!(err.is_err());
    }
}
