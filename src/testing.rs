//! In-process stand-ins for the backend, for tests and demos.
//!
//! [`MockBackend`] speaks the same newline-delimited JSON-RPC as a real
//! backend, either over an in-memory duplex stream or a local TCP listener.
//! Each `submitTask` is answered by a caller-supplied responder that can
//! reply immediately, after a delay, with a JSON-RPC error, or never.
//!
//! [`MockLauncher`] records spawn and kill calls without starting a process.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::server::process::{BackendLauncher, BackendProcess, OutputPolicy};
use crate::shared::channel::Channel;
use crate::shared::jsonrpc::{decode_line, encode_line, JsonRpcRequest, JsonRpcResponse};
use crate::task::TaskKind;
use crate::types::protocol::{
    AutomanTask, EstimateAnswerWire, OutcomePayload, RadioAnswerWire, RegistrationStatus,
    ServerStatus, TaskPayload, TaskResponse, WireOutcome, METHOD_KILL_SERVER,
    METHOD_REGISTER_ADAPTER, METHOD_SERVER_STATUS, METHOD_SUBMIT_TASK,
};

/// How the mock answers one submission.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Reply at once.
    Respond(TaskResponse),
    /// Reply after a delay.
    Delayed(Duration, TaskResponse),
    /// Reply with a JSON-RPC error object.
    RpcError {
        /// Error code
        code: i64,
        /// Error message
        message: String,
    },
    /// Never reply.
    Withhold,
}

impl From<TaskResponse> for MockReply {
    fn from(response: TaskResponse) -> Self {
        Self::Respond(response)
    }
}

type Responder = dyn Fn(&AutomanTask) -> MockReply + Send + Sync;
type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

struct MockState {
    responder: Box<Responder>,
    status: Mutex<ServerStatus>,
    registration: Mutex<RegistrationStatus>,
    submissions: AtomicUsize,
    tasks: Mutex<Vec<AutomanTask>>,
    registrations: Mutex<Vec<Value>>,
    kill_requests: AtomicUsize,
    tasks_spawned: Mutex<Vec<JoinHandle<()>>>,
}

/// A scripted in-process backend.
///
/// Dropping the mock (or calling [`MockBackend::disconnect`]) closes every
/// stream it serves, so replies it withheld surface as cancellations.
pub struct MockBackend {
    state: Arc<MockState>,
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("submissions", &self.submissions())
            .field("kill_requests", &self.kill_requests())
            .finish()
    }
}

impl MockBackend {
    /// Create a mock answering submissions with `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&AutomanTask) -> MockReply + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(MockState {
                responder: Box::new(responder),
                status: Mutex::new(ServerStatus::Running),
                registration: Mutex::new(RegistrationStatus::Okay),
                submissions: AtomicUsize::new(0),
                tasks: Mutex::new(Vec::new()),
                registrations: Mutex::new(Vec::new()),
                kill_requests: AtomicUsize::new(0),
                tasks_spawned: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Status reported to `serverStatus`.
    pub fn with_status(self, status: ServerStatus) -> Self {
        *self.state.status.lock() = status;
        self
    }

    /// Status reported to `registerAdapter`.
    pub fn with_registration(self, status: RegistrationStatus) -> Self {
        *self.state.registration.lock() = status;
        self
    }

    /// Open an in-memory channel to this mock.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Channel {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, server_write) = tokio::io::split(server_side);
        spawn_serve(&self.state, server_read, server_write);
        Channel::from_io(client_read, client_write)
    }

    /// Accept TCP connections on `127.0.0.1:port` (`0` picks a free port)
    /// and return the bound port.
    pub async fn listen(&self, port: u16) -> Result<u16> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let port = listener.local_addr()?.port();
        spawn_accept(&self.state, listener);
        Ok(port)
    }

    /// A [`MockLauncher`] hook that starts listening on the launched port,
    /// so a supervisor "spawning" the backend finds this mock.
    pub fn launch_hook(&self) -> impl Fn(u16) + Send + Sync + 'static {
        let state = Arc::clone(&self.state);
        move |port| {
            let bound = std::net::TcpListener::bind(("127.0.0.1", port)).and_then(|listener| {
                listener.set_nonblocking(true)?;
                TcpListener::from_std(listener)
            });
            match bound {
                Ok(listener) => spawn_accept(&state, listener),
                Err(e) => warn!(port, error = %e, "mock backend could not listen"),
            }
        }
    }

    /// Close every stream and stop answering.
    pub fn disconnect(&self) {
        for handle in self.state.tasks_spawned.lock().drain(..) {
            handle.abort();
        }
    }

    /// Number of `submitTask` requests received.
    pub fn submissions(&self) -> usize {
        self.state.submissions.load(Ordering::SeqCst)
    }

    /// Every task received, in arrival order.
    pub fn tasks(&self) -> Vec<AutomanTask> {
        self.state.tasks.lock().clone()
    }

    /// Raw parameters of every `registerAdapter` request.
    pub fn registrations(&self) -> Vec<Value> {
        self.state.registrations.lock().clone()
    }

    /// Number of `killServer` requests received.
    pub fn kill_requests(&self) -> usize {
        self.state.kill_requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn spawn_accept(state: &Arc<MockState>, listener: TcpListener) {
    let shared = Arc::clone(state);
    let accept = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "mock backend accepted connection");
                    let (reader, writer) = stream.into_split();
                    spawn_serve(&shared, reader, writer);
                },
                Err(e) => {
                    warn!(error = %e, "mock backend accept failed");
                    break;
                },
            }
        }
    });
    state.tasks_spawned.lock().push(accept);
}

fn spawn_serve<R, W>(state: &Arc<MockState>, reader: R, writer: W)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Box::new(writer)));
    let handle = tokio::spawn(serve_stream(reader, writer, Arc::clone(state)));
    state.tasks_spawned.lock().push(handle);
}

async fn serve_stream<R>(reader: R, writer: SharedWriter, state: Arc<MockState>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let request: JsonRpcRequest = match decode_line(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "mock backend received an undecodable request");
                continue;
            },
        };

        let id = request.id;
        let params = request.params.unwrap_or(Value::Null);
        let response = match request.method.as_str() {
            METHOD_SERVER_STATUS => {
                JsonRpcResponse::success(id, json!({ "status": *state.status.lock() }))
            },
            METHOD_REGISTER_ADAPTER => {
                state.registrations.lock().push(params);
                JsonRpcResponse::success(id, json!({ "status": *state.registration.lock() }))
            },
            METHOD_KILL_SERVER => {
                state.kill_requests.fetch_add(1, Ordering::SeqCst);
                *state.status.lock() = ServerStatus::Killed;
                JsonRpcResponse::success(id, json!({}))
            },
            METHOD_SUBMIT_TASK => {
                let task: AutomanTask = match serde_json::from_value(params) {
                    Ok(task) => task,
                    Err(e) => {
                        let reply = JsonRpcResponse::failure(id, -32602, e.to_string());
                        write_reply(&writer, &reply).await;
                        continue;
                    },
                };
                state.submissions.fetch_add(1, Ordering::SeqCst);
                let reply = (state.responder)(&task);
                state.tasks.lock().push(task);
                match reply {
                    MockReply::Respond(response) => {
                        JsonRpcResponse::success(id, task_response_value(&response))
                    },
                    MockReply::RpcError { code, message } => {
                        JsonRpcResponse::failure(id, code, message)
                    },
                    MockReply::Delayed(delay, response) => {
                        let writer = Arc::clone(&writer);
                        let delayed = tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let reply = JsonRpcResponse::success(id, task_response_value(&response));
                            write_reply(&writer, &reply).await;
                        });
                        state.tasks_spawned.lock().push(delayed);
                        continue;
                    },
                    MockReply::Withhold => continue,
                }
            },
            other => JsonRpcResponse::failure(id, -32601, format!("method not found: {other}")),
        };
        write_reply(&writer, &response).await;
    }
}

fn task_response_value(response: &TaskResponse) -> Value {
    serde_json::to_value(response).unwrap_or(Value::Null)
}

async fn write_reply(writer: &SharedWriter, reply: &JsonRpcResponse) {
    let Ok(bytes) = encode_line(reply) else {
        return;
    };
    let mut writer = writer.lock().await;
    if writer.write_all(&bytes).await.is_ok() {
        let _ = writer.flush().await;
    }
}

/// A `CONFIDENT` estimate response.
pub fn confident_estimate(low: f64, high: f64, est: f64, conf: f64, cost: f64) -> TaskResponse {
    TaskResponse::valid(OutcomePayload::EstimateOutcome(WireOutcome::confident(
        EstimateAnswerWire {
            low,
            high,
            est,
            conf,
            cost,
        },
    )))
}

/// A `LOW_CONFIDENCE` estimate response.
pub fn low_confidence_estimate(low: f64, high: f64, est: f64, conf: f64, cost: f64) -> TaskResponse {
    TaskResponse::valid(OutcomePayload::EstimateOutcome(WireOutcome::low_confidence(
        EstimateAnswerWire {
            low,
            high,
            est,
            conf,
            cost,
        },
    )))
}

/// A `CONFIDENT` radio response.
pub fn confident_radio(option: impl Into<String>, conf: f64, cost: f64) -> TaskResponse {
    TaskResponse::valid(OutcomePayload::RadioOutcome(WireOutcome::confident(
        RadioAnswerWire {
            option: option.into(),
            conf,
            cost,
        },
    )))
}

/// An `OVERBUDGET` response for a task of `kind`.
pub fn over_budget(kind: TaskKind, need: f64, have: f64) -> TaskResponse {
    let payload = match kind {
        TaskKind::Estimate => OutcomePayload::EstimateOutcome(WireOutcome::over_budget(need, have)),
        TaskKind::Radio => OutcomePayload::RadioOutcome(WireOutcome::over_budget(need, have)),
    };
    TaskResponse::valid(payload)
}

/// The kind of a received task.
pub fn task_kind(task: &AutomanTask) -> TaskKind {
    match task.task {
        TaskPayload::Estimate(_) => TaskKind::Estimate,
        TaskPayload::Radio(_) => TaskKind::Radio,
    }
}

type LaunchHook = dyn Fn(u16) + Send + Sync;

/// A launcher that starts nothing and records what it was asked to do.
pub struct MockLauncher {
    fail: bool,
    ignores_shutdown: bool,
    launches: AtomicUsize,
    kills: Arc<AtomicUsize>,
    graceful_exits: Arc<AtomicUsize>,
    last_output: Mutex<Option<OutputPolicy>>,
    next_pid: AtomicU32,
    on_launch: Option<Box<LaunchHook>>,
}

impl fmt::Debug for MockLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockLauncher")
            .field("fail", &self.fail)
            .field("launches", &self.launches())
            .field("kills", &self.kills())
            .field("graceful_exits", &self.graceful_exits())
            .finish()
    }
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    /// A launcher whose processes run until killed or asked to exit.
    pub fn new() -> Self {
        Self {
            fail: false,
            ignores_shutdown: false,
            launches: AtomicUsize::new(0),
            kills: Arc::new(AtomicUsize::new(0)),
            graceful_exits: Arc::new(AtomicUsize::new(0)),
            last_output: Mutex::new(None),
            next_pid: AtomicU32::new(40_000),
            on_launch: None,
        }
    }

    /// A launcher whose every launch fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Processes that never exit on their own and must be killed.
    pub fn ignoring_shutdown(mut self) -> Self {
        self.ignores_shutdown = true;
        self
    }

    /// Run `hook` with the port on every launch, e.g. to start a
    /// [`MockBackend`] listener.
    pub fn with_on_launch<F>(mut self, hook: F) -> Self
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        self.on_launch = Some(Box::new(hook));
        self
    }

    /// Number of launches.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of kills across all launched processes.
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Number of processes that exited on their own when waited on.
    pub fn graceful_exits(&self) -> usize {
        self.graceful_exits.load(Ordering::SeqCst)
    }

    /// Output policy of the most recent launch.
    pub fn last_output(&self) -> Option<OutputPolicy> {
        self.last_output.lock().clone()
    }
}

impl BackendLauncher for MockLauncher {
    fn launch(&self, port: u16, output: &OutputPolicy) -> Result<Box<dyn BackendProcess>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_output.lock() = Some(output.clone());
        if self.fail {
            return Err(Error::startup("mock launcher configured to fail"));
        }
        if let Some(hook) = &self.on_launch {
            hook(port);
        }
        Ok(Box::new(MockProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            alive: AtomicBool::new(true),
            exits_on_request: !self.ignores_shutdown,
            kills: Arc::clone(&self.kills),
            graceful_exits: Arc::clone(&self.graceful_exits),
        }))
    }
}

#[derive(Debug)]
struct MockProcess {
    pid: u32,
    alive: AtomicBool,
    exits_on_request: bool,
    kills: Arc<AtomicUsize>,
    graceful_exits: Arc<AtomicUsize>,
}

#[async_trait]
impl BackendProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        self.alive.load(Ordering::SeqCst).then_some(self.pid)
    }

    fn kill(&mut self) -> Result<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.kills.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn wait_for_exit(&mut self, grace: Duration) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return true;
        }
        if self.exits_on_request {
            self.alive.store(false, Ordering::SeqCst);
            self.graceful_exits.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        tokio::time::sleep(grace).await;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_status_and_counts_submissions() {
        let mock = MockBackend::new(|_| MockReply::Respond(TaskResponse::error("nope")));
        let channel = mock.connect();

        assert_eq!(channel.server_status().await.unwrap(), ServerStatus::Running);
        assert_eq!(mock.submissions(), 0);

        let unknown: Result<Value> = channel.call("listTasks", None).await;
        assert!(matches!(unknown, Err(Error::Backend { .. })));
    }

    #[tokio::test]
    async fn test_mock_launcher_counts() {
        let launcher = MockLauncher::new();
        let mut process = launcher.launch(1234, &OutputPolicy::ShowAll).unwrap();
        assert!(process.is_alive());
        process.kill().unwrap();
        process.kill().unwrap();
        assert!(!process.is_alive());
        assert_eq!(launcher.launches(), 1);
        assert_eq!(launcher.kills(), 1);
        assert_eq!(launcher.last_output(), Some(OutputPolicy::ShowAll));
    }
}
