//! Session configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::server::process::{OutputPolicy, DEFAULT_SERVER_BINARY};
use crate::server::supervisor::DEFAULT_MAX_CONNECT_ATTEMPTS;
use crate::shared::channel::{Endpoint, DEFAULT_PORT, LOCALHOST};
use crate::types::adapter::{WorkerLogLevel, WorkerLogging};

/// Configuration for one client session.
///
/// Typically built with [`ClientConfig::default`] and adjusted, or loaded
/// from an `automan.toml` file.
///
/// # Example Configuration File
///
/// ```toml
/// address = "localhost"
/// port = 50051
/// suppress_output = "stdout"
/// log_level = "warn"
/// logging = "t"
/// server_binary = "/opt/automan/bin/PyAutoManRpcServer"
/// max_connect_attempts = 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend host. Only `localhost` is supported.
    pub address: String,

    /// Backend port.
    pub port: u16,

    /// What to do with the spawned backend's output: `all`, `stdout`,
    /// `file` or `none`.
    pub suppress_output: String,

    /// Worker log level sent with the adapter registration.
    pub log_level: WorkerLogLevel,

    /// Worker trace logging mode sent with the adapter registration.
    pub logging: WorkerLogging,

    /// File for the backend's stdout when `suppress_output = "file"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_file: Option<PathBuf>,

    /// File for the backend's stderr when `suppress_output = "file"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_file: Option<PathBuf>,

    /// Backend launcher executable.
    pub server_binary: PathBuf,

    /// Status attempts after spawning the backend.
    pub max_connect_attempts: u32,

    /// Pause between status attempts, in milliseconds.
    pub retry_interval_ms: u64,

    /// Scan interval of the polling batch observer, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: LOCALHOST.to_string(),
            port: DEFAULT_PORT,
            suppress_output: "all".to_string(),
            log_level: WorkerLogLevel::default(),
            logging: WorkerLogging::default(),
            stdout_file: None,
            stderr_file: None,
            server_binary: PathBuf::from(DEFAULT_SERVER_BINARY),
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            retry_interval_ms: 5_000,
            poll_interval_ms: 2_000,
        }
    }
}

impl ClientConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Defaults overridden by environment variables.
    ///
    /// - `AUTOMAN_ADDRESS`
    /// - `AUTOMAN_PORT`
    /// - `AUTOMAN_SUPPRESS_OUTPUT`
    /// - `AUTOMAN_LOG_LEVEL`
    /// - `AUTOMAN_LOGGING`
    /// - `AUTOMAN_SERVER_BINARY`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(address) = lookup("AUTOMAN_ADDRESS") {
            config.address = address;
        }
        if let Some(port) = lookup("AUTOMAN_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| Error::argument(format!("AUTOMAN_PORT is not a valid port: '{port}'")))?;
        }
        if let Some(suppress) = lookup("AUTOMAN_SUPPRESS_OUTPUT") {
            config.suppress_output = suppress;
        }
        if let Some(level) = lookup("AUTOMAN_LOG_LEVEL") {
            config.log_level = level.parse()?;
        }
        if let Some(logging) = lookup("AUTOMAN_LOGGING") {
            config.logging = logging.parse()?;
        }
        if let Some(binary) = lookup("AUTOMAN_SERVER_BINARY") {
            config.server_binary = PathBuf::from(binary);
        }

        Ok(config)
    }

    /// Check the configuration without doing any I/O.
    ///
    /// # Errors
    ///
    /// - [`Error::Argument`] for an empty address, port `0`, an unknown
    ///   output policy or a zero attempt budget
    /// - [`Error::UnsupportedServer`] for an address other than `localhost`
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;
        self.output_policy()?;
        if self.max_connect_attempts == 0 {
            return Err(Error::argument("max_connect_attempts must be greater than 0"));
        }
        Ok(())
    }

    /// The validated backend endpoint.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::new(self.address.clone(), self.port)
    }

    /// The parsed output policy, with file paths attached.
    pub fn output_policy(&self) -> Result<OutputPolicy> {
        Ok(self
            .suppress_output
            .parse::<OutputPolicy>()?
            .with_files(self.stdout_file.clone(), self.stderr_file.clone()))
    }

    /// Pause between status attempts.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Scan interval of the polling batch observer.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.address, "localhost");
        assert_eq!(config.port, 50051);
        assert_eq!(config.output_policy().unwrap(), OutputPolicy::SuppressAll);
        assert_eq!(config.log_level, WorkerLogLevel::Fatal);
        assert_eq!(config.logging, WorkerLogging::None);
        assert_eq!(config.max_connect_attempts, 20);
        assert_eq!(config.retry_interval(), Duration::from_secs(5));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ClientConfig::from_toml(
            r#"
            port = 6000
            suppress_output = "file"
            stdout_file = "backend.out"
            log_level = "warn"
            logging = "tvm"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.address, "localhost");
        assert_eq!(config.log_level, WorkerLogLevel::Warn);
        assert_eq!(config.logging, WorkerLogging::TraceMemoVerbose);
        assert_eq!(
            config.output_policy().unwrap(),
            OutputPolicy::ToFile {
                stdout: Some(PathBuf::from("backend.out")),
                stderr: None,
            }
        );
    }

    #[test]
    fn test_from_file_round_trip() {
        let config = ClientConfig {
            port: 7000,
            ..ClientConfig::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        assert_eq!(ClientConfig::from_file(file.path()).unwrap(), config);
        assert!(matches!(
            ClientConfig::from_file("/nonexistent/automan.toml"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        assert!(matches!(
            ClientConfig::from_toml("port = \"not a number\""),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejections() {
        let config = ClientConfig {
            address: "automan.example.com".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::UnsupportedServer { .. })
        ));

        let config = ClientConfig {
            port: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Argument(_))));

        let config = ClientConfig {
            suppress_output: "some".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Argument(_))));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let env = HashMap::from([
            ("AUTOMAN_PORT", "6001"),
            ("AUTOMAN_LOG_LEVEL", "debug"),
            ("AUTOMAN_LOGGING", "tm"),
            ("AUTOMAN_SERVER_BINARY", "/usr/local/bin/automan"),
        ]);
        let config =
            ClientConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.log_level, WorkerLogLevel::Debug);
        assert_eq!(config.logging, WorkerLogging::TraceMemo);
        assert_eq!(config.server_binary, PathBuf::from("/usr/local/bin/automan"));

        let bad = HashMap::from([("AUTOMAN_PORT", "seventy")]);
        assert!(ClientConfig::from_lookup(|key| bad.get(key).map(|v| v.to_string())).is_err());
    }
}
