//! Keeps a reachable backend alive for the lifetime of a session.
//!
//! The supervisor probes the backend's status and, when nothing answers,
//! starts one through a [`BackendLauncher`] and polls until it reports
//! `RUNNING` or the attempt budget is spent.
//!
//! ```text
//! NotStarted ──> Starting ──> Ready ──> Stopped
//!     │              │                    ^
//!     │              └────────────────────┤ (retries exhausted)
//!     └──> Ready (already running)        │
//!     └───────────────────────────────────┘ (force kill before start)
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::server::process::{BackendLauncher, BackendProcess, OutputPolicy};
use crate::shared::channel::{Channel, Endpoint};
use crate::types::protocol::ServerStatus;

/// Default number of status attempts after spawning the backend.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 20;

/// Default pause between status attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default deadline for one status attempt.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time the backend gets to exit after acknowledging `killServer`.
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of the supervised backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    /// Nothing has been probed or started yet.
    NotStarted,
    /// A backend process was spawned and is being polled.
    Starting,
    /// The backend answered `RUNNING`.
    Ready,
    /// The backend was shut down or killed, or never came up.
    Stopped,
}

impl SupervisorState {
    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Checks whether moving from this state to `next` is allowed.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::NotStarted => matches!(next, Self::Starting | Self::Ready | Self::Stopped),
            Self::Starting => matches!(next, Self::Ready | Self::Stopped),
            Self::Ready => matches!(next, Self::Stopped),
            Self::Stopped => false,
        }
    }

    /// Validates a transition from this state to `next`.
    pub fn validate_transition(&self, next: &Self) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else if self.is_terminal() {
            Err(Error::startup(format!(
                "backend supervisor is {self} and cannot move to {next}"
            )))
        } else {
            Err(Error::startup(format!(
                "invalid backend supervisor transition {self} -> {next}"
            )))
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Asks the backend for its status.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Query the status once.
    ///
    /// Must return [`Error::Unavailable`] when nothing is listening, so the
    /// supervisor can tell "not started" apart from other faults.
    async fn status(&self) -> Result<ServerStatus>;
}

/// Probes by opening a [`Channel`] and calling `serverStatus`.
///
/// The first channel that connects is kept and reused by later probes; the
/// session can take it over with [`ChannelProbe::take_channel`].
#[derive(Debug)]
pub struct ChannelProbe {
    endpoint: Endpoint,
    channel: Mutex<Option<Channel>>,
}

impl ChannelProbe {
    /// Probe for `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            channel: Mutex::new(None),
        }
    }

    /// Take the connected channel, if any probe succeeded in connecting.
    pub fn take_channel(&self) -> Option<Channel> {
        self.channel.lock().take().filter(|c| !c.is_closed())
    }
}

#[async_trait]
impl StatusProbe for ChannelProbe {
    async fn status(&self) -> Result<ServerStatus> {
        let cached = self.channel.lock().clone().filter(|c| !c.is_closed());
        let channel = match cached {
            Some(channel) => channel,
            None => {
                let channel = Channel::connect(&self.endpoint).await?;
                *self.channel.lock() = Some(channel.clone());
                channel
            },
        };
        channel.server_status().await
    }
}

/// Guarantees a reachable backend for one session.
pub struct ServerSupervisor {
    port: u16,
    output: OutputPolicy,
    launcher: Arc<dyn BackendLauncher>,
    max_attempts: u32,
    retry_interval: Duration,
    probe_timeout: Duration,
    exit_grace: Duration,
    state: Mutex<SupervisorState>,
    process: Mutex<Option<Box<dyn BackendProcess>>>,
}

impl fmt::Debug for ServerSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSupervisor")
            .field("port", &self.port)
            .field("output", &self.output)
            .field("max_attempts", &self.max_attempts)
            .field("retry_interval", &self.retry_interval)
            .field("probe_timeout", &self.probe_timeout)
            .field("exit_grace", &self.exit_grace)
            .field("state", &self.state())
            .field("process", &self.process.lock().as_ref().and_then(|p| p.id()))
            .finish()
    }
}

impl ServerSupervisor {
    /// Supervisor for a backend on `port`, started through `launcher`.
    pub fn new(port: u16, launcher: Arc<dyn BackendLauncher>) -> Self {
        Self {
            port,
            output: OutputPolicy::default(),
            launcher,
            max_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            exit_grace: DEFAULT_EXIT_GRACE,
            state: Mutex::new(SupervisorState::NotStarted),
            process: Mutex::new(None),
        }
    }

    /// Supervisor for a backend someone else manages.
    ///
    /// It starts out [`SupervisorState::Ready`] and never spawns anything.
    pub fn external(port: u16) -> Self {
        let supervisor = Self::new(port, Arc::new(NoLauncher));
        *supervisor.state.lock() = SupervisorState::Ready;
        supervisor
    }

    /// Set the stream policy for spawned processes.
    pub fn with_output(mut self, output: OutputPolicy) -> Self {
        self.output = output;
        self
    }

    /// Set how many status attempts follow a spawn.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the pause between status attempts.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the deadline for a single status attempt. A backend that accepts
    /// the connection but does not answer in time counts as unreachable.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set how long an orderly shutdown waits for the process to exit
    /// before killing it.
    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    /// Returns `true` if this supervisor spawned a process that is still running.
    pub fn is_process_alive(&self) -> bool {
        self.process
            .lock()
            .as_mut()
            .is_some_and(|process| process.is_alive())
    }

    async fn probe_once(&self, probe: &dyn StatusProbe) -> Result<ServerStatus> {
        match tokio::time::timeout(self.probe_timeout, probe.status()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Unavailable(format!(
                "no status reply within {:?}",
                self.probe_timeout
            ))),
        }
    }

    fn transition(&self, next: SupervisorState) -> Result<()> {
        let mut state = self.state.lock();
        state.validate_transition(&next)?;
        debug!(from = %*state, to = %next, "backend supervisor transition");
        *state = next;
        Ok(())
    }

    /// Make sure a backend is answering, starting one if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] if the initial probe fails for any reason
    /// other than an unreachable backend, if the process cannot be spawned,
    /// or if it never reports `RUNNING` within the attempt budget. In the
    /// last case the spawned process is killed first.
    pub async fn ensure_running(&self, probe: &dyn StatusProbe) -> Result<()> {
        match self.state() {
            SupervisorState::Ready => return Ok(()),
            SupervisorState::Stopped => {
                return Err(Error::startup("backend supervisor has already stopped"))
            },
            SupervisorState::NotStarted | SupervisorState::Starting => {},
        }

        match self.probe_once(probe).await {
            Ok(ServerStatus::Running) => {
                info!(port = self.port, "backend already running");
                return self.transition(SupervisorState::Ready);
            },
            Ok(status) => {
                warn!(port = self.port, ?status, "backend answered but is not running");
            },
            Err(Error::Unavailable(reason)) => {
                debug!(port = self.port, %reason, "backend unreachable, starting one");
            },
            Err(e) => {
                return Err(Error::startup(format!("unable to start server: {e}")));
            },
        }

        self.transition(SupervisorState::Starting)?;
        let process = match self.launcher.launch(self.port, &self.output) {
            Ok(process) => process,
            Err(e) => {
                self.transition(SupervisorState::Stopped)?;
                return Err(e);
            },
        };
        *self.process.lock() = Some(process);

        for attempt in 1..=self.max_attempts {
            match self.probe_once(probe).await {
                Ok(ServerStatus::Running) => {
                    info!(port = self.port, attempt, "backend ready");
                    return self.transition(SupervisorState::Ready);
                },
                Ok(status) => debug!(attempt, ?status, "backend not running yet"),
                Err(e) => debug!(attempt, error = %e, "backend not reachable yet"),
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_interval).await;
            }
        }

        error!(
            port = self.port,
            attempts = self.max_attempts,
            "backend never became reachable, killing it"
        );
        self.kill_process();
        self.transition(SupervisorState::Stopped)?;
        Err(Error::startup(format!(
            "attempted to start backend process, but unable to communicate with it after {} tries",
            self.max_attempts
        )))
    }

    /// Terminate the spawned backend unconditionally.
    ///
    /// Used after a failed submission: a half-broken backend is never left
    /// running.
    pub fn force_kill(&self) {
        warn!(port = self.port, "force-killing backend");
        self.kill_process();
        let mut state = self.state.lock();
        if state.can_transition_to(&SupervisorState::Stopped) {
            *state = SupervisorState::Stopped;
        }
    }

    /// Orderly shutdown: ask the backend to exit over `channel`.
    ///
    /// Callers must resolve or abandon every pending handle first; requests
    /// still in flight are orphaned.
    pub async fn shutdown(&self, channel: &Channel) -> Result<()> {
        if self.state().is_terminal() {
            return Ok(());
        }
        let in_flight = channel.in_flight();
        if in_flight > 0 {
            warn!(in_flight, "shutting down backend with requests still pending");
        }

        let result = match channel.kill_server().await {
            Ok(()) => Ok(()),
            // The backend may exit before acknowledging.
            Err(Error::Cancelled(_)) => Ok(()),
            Err(e) => Err(e),
        };

        let process = self.process.lock().take();
        if let Some(mut process) = process {
            if result.is_ok() && process.wait_for_exit(self.exit_grace).await {
                debug!(port = self.port, "backend exited");
            } else {
                warn!(grace = ?self.exit_grace, "backend did not exit, killing it");
                if let Err(e) = process.kill() {
                    error!(error = %e, "failed to kill backend process");
                }
            }
        }
        info!(port = self.port, "backend shut down");
        self.transition(SupervisorState::Stopped)?;
        result
    }

    fn kill_process(&self) {
        if let Some(mut process) = self.process.lock().take() {
            if let Err(e) = process.kill() {
                error!(error = %e, "failed to kill backend process");
            }
        }
    }
}

impl Drop for ServerSupervisor {
    fn drop(&mut self) {
        if let Some(process) = self.process.get_mut().as_mut() {
            if process.is_alive() {
                debug!(pid = ?process.id(), "supervisor dropped, killing backend");
                let _ = process.kill();
            }
        }
    }
}

struct NoLauncher;

impl BackendLauncher for NoLauncher {
    fn launch(&self, _port: u16, _output: &OutputPolicy) -> Result<Box<dyn BackendProcess>> {
        Err(Error::startup("backend is managed externally"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockLauncher};
    use crate::types::protocol::TaskResponse;
    use std::collections::VecDeque;

    struct ScriptedProbe {
        replies: Mutex<VecDeque<Result<ServerStatus>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProbe {
        fn new(replies: Vec<Result<ServerStatus>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl StatusProbe for ScriptedProbe {
        async fn status(&self) -> Result<ServerStatus> {
            *self.calls.lock() += 1;
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Unavailable("refused".to_string())))
        }
    }

    struct SilentProbe {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl StatusProbe for SilentProbe {
        async fn status(&self) -> Result<ServerStatus> {
            *self.calls.lock() += 1;
            futures::future::pending().await
        }
    }

    fn unavailable() -> Result<ServerStatus> {
        Err(Error::Unavailable("refused".to_string()))
    }

    #[test]
    fn test_transitions() {
        use SupervisorState::*;
        assert!(NotStarted.can_transition_to(&Starting));
        assert!(NotStarted.can_transition_to(&Ready));
        assert!(Starting.can_transition_to(&Stopped));
        assert!(Ready.can_transition_to(&Stopped));
        assert!(!Ready.can_transition_to(&Starting));
        assert!(!Stopped.can_transition_to(&Ready));
        assert!(!Starting.can_transition_to(&Starting));
        assert!(Stopped.validate_transition(&Ready).is_err());
    }

    #[tokio::test]
    async fn test_already_running_spawns_nothing() {
        let launcher = Arc::new(MockLauncher::new());
        let supervisor = ServerSupervisor::new(50051, launcher.clone());
        let probe = ScriptedProbe::new(vec![Ok(ServerStatus::Running)]);

        supervisor.ensure_running(&probe).await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Ready);
        assert_eq!(launcher.launches(), 0);

        // A second call is a no-op.
        supervisor.ensure_running(&probe).await.unwrap();
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawns_and_polls_until_running() {
        let launcher = Arc::new(MockLauncher::new());
        let supervisor = ServerSupervisor::new(50051, launcher.clone());
        let probe = ScriptedProbe::new(vec![
            unavailable(),
            unavailable(),
            unavailable(),
            Ok(ServerStatus::Running),
        ]);

        supervisor.ensure_running(&probe).await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Ready);
        assert_eq!(launcher.launches(), 1);
        assert_eq!(probe.calls(), 4);
        assert!(supervisor.is_process_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_kill_the_process() {
        let launcher = Arc::new(MockLauncher::new());
        let supervisor = ServerSupervisor::new(50051, launcher.clone())
            .with_max_attempts(20)
            .with_retry_interval(Duration::from_secs(5));
        let probe = ScriptedProbe::new(vec![]);

        let started = tokio::time::Instant::now();
        let err = supervisor.ensure_running(&probe).await.unwrap_err();

        assert!(matches!(err, Error::Startup(ref msg) if msg.contains("20 tries")));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(launcher.kills(), 1);
        assert!(!supervisor.is_process_alive());
        assert_eq!(probe.calls(), 21);
        assert_eq!(started.elapsed(), Duration::from_secs(5 * 19));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_backend_exhausts_attempts() {
        let launcher = Arc::new(MockLauncher::new());
        let supervisor = ServerSupervisor::new(50051, launcher.clone())
            .with_max_attempts(3)
            .with_retry_interval(Duration::from_secs(1))
            .with_probe_timeout(Duration::from_secs(2));
        let probe = SilentProbe {
            calls: Mutex::new(0),
        };

        let err = supervisor.ensure_running(&probe).await.unwrap_err();
        assert!(matches!(err, Error::Startup(ref msg) if msg.contains("3 tries")));
        assert_eq!(*probe.calls.lock(), 4);
        assert_eq!(launcher.launches(), 1);
        assert_eq!(launcher.kills(), 1);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_accepting_but_mute_listener_fails_startup() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let launcher = Arc::new(MockLauncher::new());
        let supervisor = ServerSupervisor::new(port, launcher.clone())
            .with_max_attempts(2)
            .with_retry_interval(Duration::from_millis(10))
            .with_probe_timeout(Duration::from_millis(50));
        let probe = ChannelProbe::new(Endpoint::local(port).unwrap());

        let result = tokio::time::timeout(Duration::from_secs(5), supervisor.ensure_running(&probe))
            .await
            .expect("startup must not hang on a mute backend");
        assert!(matches!(result, Err(Error::Startup(_))));
        assert_eq!(launcher.kills(), 1);
        holder.abort();
    }

    #[tokio::test]
    async fn test_non_availability_fault_fails_immediately() {
        let launcher = Arc::new(MockLauncher::new());
        let supervisor = ServerSupervisor::new(50051, launcher.clone());
        let probe = ScriptedProbe::new(vec![Err(Error::Transport("reset".to_string()))]);

        let err = supervisor.ensure_running(&probe).await.unwrap_err();
        assert!(matches!(err, Error::Startup(_)));
        assert_eq!(launcher.launches(), 0);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_stops_supervisor() {
        let launcher = Arc::new(MockLauncher::failing());
        let supervisor = ServerSupervisor::new(50051, launcher);
        let probe = ScriptedProbe::new(vec![unavailable()]);

        assert!(supervisor.ensure_running(&probe).await.is_err());
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_kill_after_start() {
        let launcher = Arc::new(MockLauncher::new());
        let supervisor = ServerSupervisor::new(50051, launcher.clone());
        let probe = ScriptedProbe::new(vec![unavailable(), Ok(ServerStatus::Running)]);
        supervisor.ensure_running(&probe).await.unwrap();

        supervisor.force_kill();
        assert_eq!(launcher.kills(), 1);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.ensure_running(&probe).await.is_err());
    }

    async fn started(launcher: Arc<MockLauncher>) -> ServerSupervisor {
        let supervisor = ServerSupervisor::new(50051, launcher).with_exit_grace(Duration::from_secs(3));
        let probe = ScriptedProbe::new(vec![unavailable(), Ok(ServerStatus::Running)]);
        supervisor.ensure_running(&probe).await.unwrap();
        supervisor
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_backend_exit_on_its_own() {
        let launcher = Arc::new(MockLauncher::new());
        let supervisor = started(launcher.clone()).await;
        let mock = MockBackend::new(|_| TaskResponse::error("unused").into());

        supervisor.shutdown(&mock.connect()).await.unwrap();
        assert_eq!(mock.kill_requests(), 1);
        assert_eq!(launcher.graceful_exits(), 1);
        assert_eq!(launcher.kills(), 0);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_kills_backend_after_grace() {
        let launcher = Arc::new(MockLauncher::new().ignoring_shutdown());
        let supervisor = started(launcher.clone()).await;
        let mock = MockBackend::new(|_| TaskResponse::error("unused").into());

        let started_at = tokio::time::Instant::now();
        supervisor.shutdown(&mock.connect()).await.unwrap();
        assert!(started_at.elapsed() >= Duration::from_secs(3));
        assert_eq!(launcher.graceful_exits(), 0);
        assert_eq!(launcher.kills(), 1);
        assert!(!supervisor.is_process_alive());
    }

    #[test]
    fn test_external_supervisor_is_ready() {
        let supervisor = ServerSupervisor::external(50051);
        assert_eq!(supervisor.state(), SupervisorState::Ready);
        assert!(!supervisor.is_process_alive());
    }
}
