//! Spawning and killing the local backend process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default location of the backend launcher script.
pub const DEFAULT_SERVER_BINARY: &str = "rpc_server/pack/bin/PyAutoManRpcServer";

/// What to do with the spawned backend's standard streams.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPolicy {
    /// Discard stdout and stderr (`all`)
    #[default]
    SuppressAll,
    /// Discard stdout, keep stderr (`stdout`)
    SuppressStdout,
    /// Redirect to files (`file`). Not wired yet: output is inherited.
    ToFile {
        /// Intended stdout file
        stdout: Option<PathBuf>,
        /// Intended stderr file
        stderr: Option<PathBuf>,
    },
    /// Keep both streams (`none`)
    ShowAll,
}

impl OutputPolicy {
    /// Attach file paths to a [`OutputPolicy::ToFile`] policy. Other
    /// policies are returned unchanged.
    pub fn with_files(self, stdout: Option<PathBuf>, stderr: Option<PathBuf>) -> Self {
        match self {
            Self::ToFile { .. } => Self::ToFile { stdout, stderr },
            other => other,
        }
    }

    fn stdio(&self) -> (Stdio, Stdio) {
        match self {
            Self::SuppressAll => (Stdio::null(), Stdio::null()),
            Self::SuppressStdout => (Stdio::null(), Stdio::inherit()),
            Self::ToFile { .. } => {
                warn!("redirecting backend output to files is not yet implemented; defaulting to stdout/stderr");
                (Stdio::inherit(), Stdio::inherit())
            },
            Self::ShowAll => (Stdio::inherit(), Stdio::inherit()),
        }
    }
}

impl FromStr for OutputPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::SuppressAll),
            "stdout" => Ok(Self::SuppressStdout),
            "file" => Ok(Self::ToFile {
                stdout: None,
                stderr: None,
            }),
            "none" => Ok(Self::ShowAll),
            other => Err(Error::argument(format!(
                "suppress_output must be one of all, stdout, file, none (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for OutputPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SuppressAll => "all",
            Self::SuppressStdout => "stdout",
            Self::ToFile { .. } => "file",
            Self::ShowAll => "none",
        };
        f.write_str(s)
    }
}

/// A running backend process.
#[async_trait]
pub trait BackendProcess: Send + Sync + fmt::Debug {
    /// OS process id, if still known.
    fn id(&self) -> Option<u32>;

    /// Terminate the process without waiting for it.
    fn kill(&mut self) -> Result<()>;

    /// Returns `true` while the process has not exited.
    fn is_alive(&mut self) -> bool;

    /// Wait up to `grace` for the process to exit on its own.
    ///
    /// Returns `true` if it exited within the deadline.
    async fn wait_for_exit(&mut self, grace: Duration) -> bool;
}

/// Starts backend processes.
pub trait BackendLauncher: Send + Sync {
    /// Start a backend that listens on `port`.
    fn launch(&self, port: u16, output: &OutputPolicy) -> Result<Box<dyn BackendProcess>>;
}

/// Launches the backend binary with `tokio::process`.
///
/// The child is started as `<binary> <port>` and is killed if its handle
/// is dropped.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    binary: PathBuf,
}

impl CommandLauncher {
    /// Launcher for the given executable.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Path of the executable.
    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }
}

impl Default for CommandLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_BINARY)
    }
}

impl BackendLauncher for CommandLauncher {
    fn launch(&self, port: u16, output: &OutputPolicy) -> Result<Box<dyn BackendProcess>> {
        let (stdout, stderr) = output.stdio();
        let child = Command::new(&self.binary)
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::startup(format!(
                    "failed to spawn backend '{}': {e}",
                    self.binary.display()
                ))
            })?;

        info!(pid = ?child.id(), port, binary = %self.binary.display(), "backend process started");
        Ok(Box::new(ChildProcess { child }))
    }
}

#[derive(Debug)]
struct ChildProcess {
    child: Child,
}

#[async_trait]
impl BackendProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn kill(&mut self) -> Result<()> {
        debug!(pid = ?self.child.id(), "killing backend process");
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(Error::Transport(format!("failed to kill backend: {e}"))),
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn wait_for_exit(&mut self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "backend process exited");
                true
            },
            Ok(Err(e)) => {
                warn!(error = %e, "failed to wait on backend process");
                false
            },
            Err(_) => false,
        }
    }
}
