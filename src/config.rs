//! JSON configuration loading, consumed once at startup.
//!
//! Grounded on the original `hiku-scheduler` `JSONConfig`/`LoadConfigFromFile`
//! (read file -> `serde_json` decode -> fatal on error), restated with
//! `serde::Deserialize` derives instead of hand-rolled field access, the way
//! the rest of this codebase's config types are declared.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::worker::WorkerUrl;

/// Selects which [`crate::balancer::Balancer`] implementation backs the
/// scheduler. Deserialized from the config file's `balancer` string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Random,
    LeastConnections,
    ConsistentHashingBounded,
    PullBased,
}

impl PolicyKind {
    fn from_config_str(s: &str) -> Option<Self> {
        match s {
            "random" => Some(Self::Random),
            "least-connections" => Some(Self::LeastConnections),
            "hashing-bounded" => Some(Self::ConsistentHashingBounded),
            "pull-based" => Some(Self::PullBased),
            _ => None,
        }
    }
}

/// Raw shape of the JSON config file, deserialized as-is before validation.
#[derive(Debug, Deserialize)]
struct RawConfig {
    host: String,
    port: u16,
    balancer: String,
    workers: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_json: bool,
    #[serde(default)]
    prometheus: Option<PrometheusConfig>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    pub host: String,
    pub port: u16,
}

/// Fully validated configuration ready to drive the scheduler and HTTP
/// server bootstrap.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub host: String,
    pub port: u16,
    pub policy: PolicyKind,
    pub workers: Vec<WorkerUrl>,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub log_json: bool,
    pub prometheus: Option<PrometheusConfig>,
}

impl RouterConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw_text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let raw: RawConfig =
            serde_json::from_str(&raw_text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let policy = PolicyKind::from_config_str(&raw.balancer)
            .ok_or_else(|| ConfigError::UnknownPolicy(raw.balancer.clone()))?;

        let workers = raw
            .workers
            .iter()
            .map(|s| {
                WorkerUrl::parse(s).map_err(|e| ConfigError::MalformedWorkerUrl(s.clone(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            host: raw.host,
            port: raw.port,
            policy,
            workers,
            request_timeout_secs: raw.request_timeout_secs,
            log_level: raw.log_level,
            log_json: raw.log_json,
            prometheus: raw.prometheus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_valid_config() {
        let file = write_config(
            r#"{"host":"0.0.0.0","port":9020,"balancer":"pull-based","workers":["http://w1:8000","http://w2:8000"]}"#,
        );
        let config = RouterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9020);
        assert_eq!(config.policy, PolicyKind::PullBased);
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn unknown_balancer_is_fatal() {
        let file = write_config(
            r#"{"host":"0.0.0.0","port":9020,"balancer":"made-up","workers":[]}"#,
        );
        let err = RouterConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPolicy(_)));
    }

    #[test]
    fn malformed_worker_url_is_fatal() {
        let file = write_config(
            r#"{"host":"0.0.0.0","port":9020,"balancer":"random","workers":["not a url"]}"#,
        );
        let err = RouterConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedWorkerUrl(_, _)));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = RouterConfig::from_file(Path::new("/no/such/hiku.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
