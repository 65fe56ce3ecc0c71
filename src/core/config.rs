//! Configuration management for pktwatch.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument and environment variable overrides
//! - Validation and defaults

use crate::core::retry::{OnExhausted, RetryPolicy};
use crate::core::{PktwatchError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for pktwatch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration for every service
    pub server: ServerConfig,
    /// Capture stage configuration
    pub capture: CaptureConfig,
    /// Parser stage configuration
    pub parser: ParserConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Read path configuration
    pub analyzer: AnalyzerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for all listeners
    pub bind_address: IpAddr,
    /// Capture control port
    pub capture_port: u16,
    /// Parser port
    pub parser_port: u16,
    /// Persistor port
    pub persistor_port: u16,
    /// Analyzer port
    pub analyzer_port: u16,
    /// Send permissive CORS headers
    pub enable_cors: bool,
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface for live capture, auto-detected when unset
    pub interface: Option<String>,
    /// Default BPF filter for live capture
    pub filter: Option<String>,
    /// Directory recordings are replayed from
    pub pcap_dir: PathBuf,
    /// Where captured frames are posted
    pub parser_url: String,
    /// Frames per delivery (1 sends each frame on its own)
    pub batch_size: usize,
    /// Maximum time between flushes
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Per-request timeout towards the parser
    #[serde(with = "humantime_serde")]
    pub post_timeout: Duration,
    /// Live read timeout; bounds stop latency on a quiet link
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Snapshot length for live capture
    pub snaplen: i32,
}

/// Parser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Where classified records are posted
    pub persistor_url: String,
    /// Per-request timeout towards the persistor
    #[serde(with = "humantime_serde")]
    pub post_timeout: Duration,
    /// Delivery retry policy
    pub retry: RetryPolicy,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database: PathBuf,
    /// Number of pooled connections
    pub pool_size: usize,
    /// How long a connection waits on a locked database
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
    /// Startup connection policy
    pub connect_retry: RetryPolicy,
}

/// Read path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Records returned by list endpoints when no limit is given
    pub recent_limit: usize,
    /// Upper bound for a requested limit
    pub max_limit: usize,
    /// Most recent records covered by the timeline, 0 for all
    pub timeline_window: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            capture_port: 5004,
            parser_port: 8001,
            persistor_port: 8002,
            analyzer_port: 8003,
            enable_cors: true,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: None,
            filter: None,
            pcap_dir: PathBuf::from("./sample-pcaps"),
            parser_url: "http://127.0.0.1:8001/parse".to_string(),
            batch_size: 1,
            flush_interval: Duration::from_secs(2),
            post_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_millis(500),
            snaplen: 65535,
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            persistor_url: "http://127.0.0.1:8002/store".to_string(),
            post_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database: PathBuf::from("./pktwatch.db"),
            pool_size: 4,
            busy_timeout: Duration::from_secs(5),
            connect_retry: RetryPolicy::new(10, Duration::from_secs(3))
                .on_exhausted(OnExhausted::Fail),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            recent_limit: 50,
            max_limit: 1000,
            timeline_window: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let ports = [
            self.server.capture_port,
            self.server.parser_port,
            self.server.persistor_port,
            self.server.analyzer_port,
        ];
        for (i, port) in ports.iter().enumerate() {
            if ports[i + 1..].contains(port) {
                return Err(PktwatchError::config(format!(
                    "Service ports must be different: {} is used twice",
                    port
                )));
            }
        }

        if self.capture.batch_size == 0 {
            return Err(PktwatchError::config("batch_size must be greater than 0"));
        }

        if self.capture.parser_url.is_empty() {
            return Err(PktwatchError::config("parser_url must not be empty"));
        }

        if self.parser.persistor_url.is_empty() {
            return Err(PktwatchError::config("persistor_url must not be empty"));
        }

        self.parser.retry.validate()?;
        self.storage.connect_retry.validate()?;

        if self.storage.pool_size == 0 {
            return Err(PktwatchError::config("pool_size must be greater than 0"));
        }

        if self.analyzer.recent_limit == 0 || self.analyzer.recent_limit > self.analyzer.max_limit {
            return Err(PktwatchError::config(format!(
                "recent_limit must be between 1 and max_limit ({}), got {}",
                self.analyzer.max_limit, self.analyzer.recent_limit
            )));
        }

        Ok(())
    }

    /// Filter string for the tracing subscriber
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            LogLevel::Debug.as_str()
        } else {
            self.logging.level.as_str()
        }
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| PktwatchError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set the database file
    pub fn database(mut self, path: PathBuf) -> Self {
        self.config.storage.database = path;
        self
    }

    /// Set the recordings directory
    pub fn pcap_dir(mut self, path: PathBuf) -> Self {
        self.config.capture.pcap_dir = path;
        self
    }

    /// Set the live capture interface
    pub fn interface(mut self, interface: String) -> Self {
        self.config.capture.interface = Some(interface);
        self
    }

    /// Set the parser URL
    pub fn parser_url(mut self, url: String) -> Self {
        self.config.capture.parser_url = url;
        self
    }

    /// Set the persistor URL
    pub fn persistor_url(mut self, url: String) -> Self {
        self.config.parser.persistor_url = url;
        self
    }

    /// Set the capture batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.capture.batch_size = size;
        self
    }

    /// Set the parser retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.parser.retry = policy;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.batch_size, 1);
        assert_eq!(config.parser.retry.max_attempts, 10);
        assert_eq!(config.parser.retry.on_exhausted, OnExhausted::Drop);
        assert_eq!(config.storage.connect_retry.on_exhausted, OnExhausted::Fail);
    }

    #[test]
    fn test_port_conflict() {
        let mut config = Config::default();
        config.server.parser_port = 8002;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.capture.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recent_limit_bounds() {
        let mut config = Config::default();
        config.analyzer.recent_limit = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_overrides_log_level() {
        let config = ConfigBuilder::new().debug(true).build().unwrap();
        assert_eq!(config.log_filter(), "debug");
        assert_eq!(Config::default().log_filter(), "info");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
server:
  bind_address: "127.0.0.1"
  parser_port: 9001
capture:
  batch_size: 25
  flush_interval: 500ms
parser:
  retry:
    max_attempts: 3
    delay: 100ms
    on_exhausted: fail
storage:
  database: /tmp/packets.db
  pool_size: 2
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

        assert_eq!(config.server.parser_port, 9001);
        assert_eq!(config.server.capture_port, 5004);
        assert_eq!(config.capture.batch_size, 25);
        assert_eq!(config.capture.flush_interval, Duration::from_millis(500));
        assert_eq!(config.parser.retry.max_attempts, 3);
        assert_eq!(config.parser.retry.on_exhausted, OnExhausted::Fail);
        assert_eq!(config.storage.database, PathBuf::from("/tmp/packets.db"));
        assert_eq!(config.storage.pool_size, 2);
    }
}
