use crate::error::{DriverError, DriverResult};
use conduit::logging;
use conduit::support::WireError;
use serde_derive::Deserialize;
use sloggers::LoggerConfig;
use std::path::Path;
use std::time::Duration;

/// Driver settings, deserializable from TOML:
///
/// ```toml
/// connect_timeout_secs = 3
/// shutdown_timeout_secs = 10
/// stream_queue_bound = 1024
///
/// [logging]
/// type = "terminal"
/// level = "debug"
/// destination = "stderr"
/// ```
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Seconds to wait for the identity response and the stream-start
    /// handshake.
    pub connect_timeout_secs: u64,
    /// Seconds shutdown waits for the event loop to stop.
    pub shutdown_timeout_secs: u64,
    /// Bound for streaming bridge queues. Unbounded when absent.
    pub stream_queue_bound: Option<usize>,
    /// Logging sink for the driver and its helper threads.
    pub logging: Option<LoggerConfig>,
}

impl Default for DriverConfig {
    fn default() -> DriverConfig {
        DriverConfig {
            connect_timeout_secs: 3,
            shutdown_timeout_secs: 10,
            stream_queue_bound: None,
            logging: None,
        }
    }
}

impl DriverConfig {
    pub fn from_toml_str(text: &str) -> DriverResult<DriverConfig> {
        serdeconv::from_toml_str(text)
            .map_err(|error| DriverError::Wire(WireError::Config(error.to_string())))
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> DriverResult<DriverConfig> {
        serdeconv::from_toml_file(path)
            .map_err(|error| DriverError::Wire(WireError::Config(error.to_string())))
    }

    /// Logger described by the config's logging section; discard when the
    /// section is absent.
    pub fn build_logger(&self) -> DriverResult<logging::Logger> {
        match &self.logging {
            Some(section) => Ok(logging::build(section)?),
            None => Ok(logging::discard()),
        }
    }

    #[inline]
    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[inline]
    pub(crate) fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.connect_timeout_secs, 3);
        assert_eq!(config.shutdown_timeout_secs, 10);
        assert!(config.stream_queue_bound.is_none());
        assert!(config.logging.is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = DriverConfig::from_toml_str(
            r#"
connect_timeout_secs = 5
stream_queue_bound = 64

[logging]
type = "terminal"
level = "debug"
destination = "stderr"
"#,
        )
        .unwrap();

        assert_eq!(config.connect_timeout_secs, 5);
        assert_eq!(config.shutdown_timeout_secs, 10);
        assert_eq!(config.stream_queue_bound, Some(64));
        assert!(config.logging.is_some());
        assert!(config.build_logger().is_ok());
    }

    #[test]
    fn test_bad_toml_is_a_config_error() {
        match DriverConfig::from_toml_str("connect_timeout_secs = \"soon\"") {
            Err(DriverError::Wire(WireError::Config(_))) => (),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
