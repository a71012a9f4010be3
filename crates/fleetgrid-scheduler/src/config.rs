//! Scheduler configuration, loaded from a TOML file.
//!
//! ```toml
//! service_down_time = "60s"
//! rpc_timeout = "5s"
//!
//! [agents]
//! host-a = "10.0.0.1:8775"
//! host-b = "10.0.0.2:8775"
//! ```
//!
//! `rpc_timeout` has no default and must be supplied by the deployment.
//! Heartbeats are stamped in whole seconds, so `service_down_time` must be a
//! whole number of seconds too.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::debug;

use fleetgrid_state::{COMPUTE_TOPIC, VOLUME_TOPIC};

use crate::error::{SchedulerError, SchedulerResult};

/// Default heartbeat age after which a service is considered down.
pub const DEFAULT_SERVICE_DOWN_TIME: Duration = Duration::from_secs(60);

/// Configuration injected into the liveness tracker, directory and validator.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Maximum heartbeat age for a service to count as up.
    #[serde(
        default = "default_service_down_time",
        deserialize_with = "deserialize_duration"
    )]
    pub service_down_time: Duration,
    /// Upper bound on every agent RPC.
    #[serde(deserialize_with = "deserialize_duration")]
    pub rpc_timeout: Duration,
    #[serde(default = "default_compute_topic")]
    pub compute_topic: String,
    #[serde(default = "default_volume_topic")]
    pub volume_topic: String,
    /// Host → `address:port` of its agent, used by the HTTP transport.
    #[serde(default)]
    pub agents: HashMap<String, String>,
}

impl SchedulerConfig {
    /// Configuration with defaults for everything except the RPC timeout.
    pub fn new(rpc_timeout: Duration) -> Self {
        Self {
            service_down_time: DEFAULT_SERVICE_DOWN_TIME,
            rpc_timeout,
            compute_topic: default_compute_topic(),
            volume_topic: default_volume_topic(),
            agents: HashMap::new(),
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> SchedulerResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| SchedulerError::Config(e.to_string()))?;
        config.checked()
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: &Path) -> SchedulerResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Read a configuration for operations that never call an agent.
    ///
    /// A missing file gives the defaults, and `rpc_timeout` may be omitted;
    /// it is then zero and must not be used.
    pub fn from_file_without_agents(path: &Path) -> SchedulerResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no configuration file, using defaults");
                return Ok(Self::new(Duration::ZERO));
            }
            Err(e) => {
                return Err(SchedulerError::Config(format!("read {}: {e}", path.display())));
            }
        };
        let mut table: toml::Table =
            toml::from_str(&content).map_err(|e| SchedulerError::Config(e.to_string()))?;
        table
            .entry("rpc_timeout")
            .or_insert(toml::Value::Integer(0));
        let config = Self::deserialize(toml::Value::Table(table))
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        config.checked()
    }

    /// Heartbeats are whole seconds, so a fractional threshold is refused.
    fn checked(self) -> SchedulerResult<Self> {
        if self.service_down_time.subsec_nanos() != 0 {
            return Err(SchedulerError::Config(format!(
                "service_down_time must be whole seconds, got {:?}",
                self.service_down_time
            )));
        }
        Ok(self)
    }
}

fn default_service_down_time() -> Duration {
    DEFAULT_SERVICE_DOWN_TIME
}

fn default_compute_topic() -> String {
    COMPUTE_TOPIC.to_string()
}

fn default_volume_topic() -> String {
    VOLUME_TOPIC.to_string()
}

/// Accept either a bare number of seconds or a string like "5s".
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text:?}"))),
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = SchedulerConfig::from_toml_str(r#"rpc_timeout = "2s""#).unwrap();
        assert_eq!(config.rpc_timeout, Duration::from_secs(2));
        assert_eq!(config.service_down_time, Duration::from_secs(60));
        assert_eq!(config.compute_topic, "compute");
        assert_eq!(config.volume_topic, "volume");
        assert!(config.agents.is_empty());
    }

    #[test]
    fn missing_rpc_timeout_is_rejected() {
        let err = SchedulerConfig::from_toml_str(r#"service_down_time = "30s""#).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(ref msg) if msg.contains("rpc_timeout")));
    }

    #[test]
    fn full_config_parses() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            service_down_time = 90
            rpc_timeout = "500ms"
            compute_topic = "hv"

            [agents]
            host-a = "10.0.0.1:8775"
            "#,
        )
        .unwrap();
        assert_eq!(config.service_down_time, Duration::from_secs(90));
        assert_eq!(config.rpc_timeout, Duration::from_millis(500));
        assert_eq!(config.compute_topic, "hv");
        assert_eq!(config.agents.get("host-a").unwrap(), "10.0.0.1:8775");
    }

    #[test]
    fn bad_duration_is_rejected() {
        let err = SchedulerConfig::from_toml_str(r#"rpc_timeout = "soon""#).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.toml");
        std::fs::write(&path, "rpc_timeout = \"1m\"\n").unwrap();

        let config = SchedulerConfig::from_file(&path).unwrap();
        assert_eq!(config.rpc_timeout, Duration::from_secs(60));
    }

    #[test]
    fn from_file_missing_is_config_error() {
        let err = SchedulerConfig::from_file(Path::new("/nonexistent/scheduler.toml")).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn agentless_config_tolerates_missing_file_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.toml");

        let config = SchedulerConfig::from_file_without_agents(&path).unwrap();
        assert_eq!(config.service_down_time, DEFAULT_SERVICE_DOWN_TIME);
        assert_eq!(config.compute_topic, COMPUTE_TOPIC);

        std::fs::write(&path, "service_down_time = \"2m\"\nvolume_topic = \"blk\"\n").unwrap();
        let config = SchedulerConfig::from_file_without_agents(&path).unwrap();
        assert_eq!(config.service_down_time, Duration::from_secs(120));
        assert_eq!(config.volume_topic, "blk");
        assert!(SchedulerConfig::from_file(&path).is_err());

        std::fs::write(&path, "service_down_time = \"250ms\"\n").unwrap();
        let err = SchedulerConfig::from_file_without_agents(&path).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("ten"), None);
    }

    #[test]
    fn minutes_overflowing_u64_seconds_are_rejected() {
        let largest = u64::MAX / 60;
        assert_eq!(parse_duration(&format!("{largest}m")), Some(Duration::from_secs(largest * 60)));
        assert_eq!(parse_duration(&format!("{}m", largest + 1)), None);

        let toml = format!("rpc_timeout = \"{}m\"", u64::MAX);
        let err = SchedulerConfig::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn sub_second_down_time_is_rejected() {
        let err = SchedulerConfig::from_toml_str(
            r#"
            rpc_timeout = "5s"
            service_down_time = "1500ms"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::Config(ref m) if m.contains("whole seconds")));

        let config = SchedulerConfig::from_toml_str(
            r#"
            rpc_timeout = "500ms"
            service_down_time = "2000ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.service_down_time, Duration::from_secs(2));
        assert_eq!(config.rpc_timeout, Duration::from_millis(500));
    }
}
