//! Optional `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Install a formatted `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (for example
/// `"automan_client=info"`) is used.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the directive does not parse or a
/// global subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| Error::Configuration(format!("invalid log directive: {e}")))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Configuration(format!("failed to install subscriber: {e}")))
}
