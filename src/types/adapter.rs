//! Crowdsourcing adapter credentials.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Keys every adapter map must contain.
pub const REQUIRED_ADAPTER_KEYS: [&str; 3] = ["access_id", "access_key", "type"];

/// Crowdsourcing backends the server can post tasks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterType {
    /// Amazon Mechanical Turk
    Mturk,
}

impl FromStr for AdapterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mturk" => Ok(Self::Mturk),
            other => Err(Error::adapter(format!(
                "unsupported adapter type '{other}'. Currently, the only supported crowdsource backend is mturk"
            ))),
        }
    }
}

/// Log verbosity of the AutoMan worker inside the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerLogLevel {
    /// Debug output
    Debug,
    /// Informational output
    Info,
    /// Warnings only
    Warn,
    /// Fatal messages only
    #[default]
    Fatal,
}

impl WorkerLogLevel {
    /// Integer code sent to the backend.
    pub fn code(self) -> u8 {
        match self {
            Self::Debug => 0,
            Self::Info => 1,
            Self::Warn => 2,
            Self::Fatal => 3,
        }
    }
}

impl FromStr for WorkerLogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "fatal" => Ok(Self::Fatal),
            other => Err(Error::argument(format!(
                "loglevel must be one of debug, info, warn, fatal (got '{other}')"
            ))),
        }
    }
}

/// Trace logging mode of the AutoMan worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerLogging {
    /// Log trace and use it for memoization (`tm`)
    #[serde(rename = "tm")]
    TraceMemo,
    /// No logging (`none`)
    #[default]
    #[serde(rename = "none")]
    None,
    /// Log trace only (`t`)
    #[serde(rename = "t")]
    Trace,
    /// Log trace with debug information (`tv`)
    #[serde(rename = "tv")]
    TraceVerbose,
    /// Log trace, memoize and output debug information (`tvm`)
    #[serde(rename = "tvm", alias = "tmv")]
    TraceMemoVerbose,
}

impl WorkerLogging {
    /// Integer code sent to the backend.
    pub fn code(self) -> u8 {
        match self {
            Self::TraceMemo => 0,
            Self::None => 1,
            Self::Trace => 2,
            Self::TraceVerbose => 3,
            Self::TraceMemoVerbose => 4,
        }
    }
}

impl FromStr for WorkerLogging {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tm" => Ok(Self::TraceMemo),
            "none" => Ok(Self::None),
            "t" => Ok(Self::Trace),
            "tv" => Ok(Self::TraceVerbose),
            "tvm" | "tmv" => Ok(Self::TraceMemoVerbose),
            other => Err(Error::argument(format!(
                "logging must be one of none, t, tm, tv, tvm (got '{other}')"
            ))),
        }
    }
}

/// Authentication bundle for the crowdsourcing backend.
///
/// Built once per session from a flat string map and sent to the backend
/// during registration. The secret is never readable afterwards and is
/// redacted from `Debug` output.
///
/// # Examples
///
/// ```
/// use automan_client::types::{AdapterCredentials, WorkerLogLevel, WorkerLogging};
/// use std::collections::HashMap;
///
/// let map = HashMap::from([
///     ("access_id".to_string(), "AKIA...".to_string()),
///     ("access_key".to_string(), "secret".to_string()),
///     ("type".to_string(), "MTurk".to_string()),
///     ("sandbox_mode".to_string(), "true".to_string()),
/// ]);
/// let creds = AdapterCredentials::from_map(map, WorkerLogLevel::Warn, WorkerLogging::None).unwrap();
/// assert_eq!(creds.option("sandbox_mode"), Some("true"));
/// assert!(!format!("{creds:?}").contains("secret"));
/// ```
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCredentials {
    adptr_type: AdapterType,
    access_id: String,
    access_key: String,
    adapter_options: HashMap<String, String>,
    logging: u8,
    log_level: u8,
}

impl AdapterCredentials {
    /// Validate an adapter map and build credentials from it.
    ///
    /// The map must contain `access_id`, `access_key` and `type`; every
    /// other entry is passed through as a backend-specific option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Adapter`] if a required key is missing or the
    /// adapter type is not supported.
    pub fn from_map(
        mut map: HashMap<String, String>,
        log_level: WorkerLogLevel,
        logging: WorkerLogging,
    ) -> Result<Self> {
        if let Some(missing) = REQUIRED_ADAPTER_KEYS.iter().find(|k| !map.contains_key(**k)) {
            return Err(Error::adapter(format!(
                "missing required field '{missing}' in adapter map. The required fields are: access_id, access_key, type"
            )));
        }

        let access_id = map.remove("access_id").unwrap_or_default();
        let access_key = map.remove("access_key").unwrap_or_default();
        let adptr_type = map.remove("type").unwrap_or_default().parse()?;

        Ok(Self {
            adptr_type,
            access_id,
            access_key,
            adapter_options: map,
            logging: logging.code(),
            log_level: log_level.code(),
        })
    }

    /// The backend this adapter targets.
    pub fn adapter_type(&self) -> AdapterType {
        self.adptr_type
    }

    /// The public access identity.
    pub fn access_id(&self) -> &str {
        &self.access_id
    }

    /// A backend-specific option passed through from the map.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.adapter_options.get(key).map(String::as_str)
    }
}

impl fmt::Debug for AdapterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterCredentials")
            .field("adptr_type", &self.adptr_type)
            .field("access_id", &self.access_id)
            .field("access_key", &"<redacted>")
            .field("adapter_options", &self.adapter_options)
            .field("logging", &self.logging)
            .field("log_level", &self.log_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn full_map() -> HashMap<String, String> {
        HashMap::from([
            ("access_id".to_string(), "id".to_string()),
            ("access_key".to_string(), "key".to_string()),
            ("type".to_string(), "mturk".to_string()),
        ])
    }

    #[rstest]
    #[case("access_id")]
    #[case("access_key")]
    #[case("type")]
    fn test_missing_required_key(#[case] key: &str) {
        let mut map = full_map();
        map.remove(key);
        let err = AdapterCredentials::from_map(map, WorkerLogLevel::Fatal, WorkerLogging::None)
            .unwrap_err();
        assert!(matches!(err, Error::Adapter(ref msg) if msg.contains(key)));
    }

    #[test]
    fn test_unsupported_type() {
        let mut map = full_map();
        map.insert("type".to_string(), "upwork".to_string());
        let err = AdapterCredentials::from_map(map, WorkerLogLevel::Fatal, WorkerLogging::None)
            .unwrap_err();
        assert!(matches!(err, Error::Adapter(_)));
    }

    #[test]
    fn test_wire_shape_carries_codes() {
        let creds =
            AdapterCredentials::from_map(full_map(), WorkerLogLevel::Warn, WorkerLogging::Trace)
                .unwrap();
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["adptrType"], "MTURK");
        assert_eq!(json["logLevel"], 2);
        assert_eq!(json["logging"], 2);
        assert_eq!(json["accessKey"], "key");
    }

    #[rstest]
    #[case("tm", WorkerLogging::TraceMemo, 0)]
    #[case("none", WorkerLogging::None, 1)]
    #[case("t", WorkerLogging::Trace, 2)]
    #[case("tv", WorkerLogging::TraceVerbose, 3)]
    #[case("tmv", WorkerLogging::TraceMemoVerbose, 4)]
    fn test_logging_codes(#[case] raw: &str, #[case] expected: WorkerLogging, #[case] code: u8) {
        let parsed: WorkerLogging = raw.parse().unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.code(), code);
    }
}
