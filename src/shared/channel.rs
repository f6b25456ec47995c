//! Request/response channel to one backend endpoint.
//!
//! A [`Channel`] owns a single byte stream to the backend. Requests are
//! written as newline-delimited JSON-RPC; a background reader task routes
//! each reply to the `oneshot` sender registered for its request id. When
//! the stream closes, every outstanding sender is dropped and the waiting
//! callers observe [`Error::Cancelled`].

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{BackendErrorCode, Error, Result};
use crate::shared::jsonrpc::{
    decode_line, encode_line, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
};
use crate::types::adapter::AdapterCredentials;
use crate::types::protocol::{
    AutomanTask, RegistrationResponse, RegistrationStatus, ServerStatus, ServerStatusResponse,
    METHOD_KILL_SERVER, METHOD_REGISTER_ADAPTER, METHOD_SERVER_STATUS, METHOD_SUBMIT_TASK,
};

/// The only address currently supported.
pub const LOCALHOST: &str = "localhost";

/// Default backend port.
pub const DEFAULT_PORT: u16 = 50051;

type Reply = std::result::Result<Value, JsonRpcError>;
type PendingMap = DashMap<u64, oneshot::Sender<Reply>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A validated backend address.
///
/// Only `localhost` is accepted; anything else is rejected before any
/// network attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: String,
    port: u16,
}

impl Endpoint {
    /// Validate an address and port.
    ///
    /// # Errors
    ///
    /// - [`Error::Argument`] for an empty address or port `0`
    /// - [`Error::UnsupportedServer`] for any address other than `localhost`
    pub fn new(address: impl Into<String>, port: u16) -> Result<Self> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(Error::argument(
                "server_addr cannot be empty (only 'localhost' supported)",
            ));
        }
        if port == 0 {
            return Err(Error::argument("port must be greater than 0"));
        }
        if !address.trim().eq_ignore_ascii_case(LOCALHOST) {
            return Err(Error::UnsupportedServer { address });
        }
        Ok(Self {
            address: LOCALHOST.to_string(),
            port,
        })
    }

    /// `localhost:<port>`.
    pub fn local(port: u16) -> Result<Self> {
        Self::new(LOCALHOST, port)
    }

    /// The host name.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

struct ChannelInner {
    label: String,
    writer: Mutex<BoxedWriter>,
    next_id: AtomicU64,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// One request/response channel, shared by every call in a session.
///
/// Cloning is cheap; clones share the underlying stream.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.inner.label)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Channel {
    /// Open a channel to `endpoint`.
    ///
    /// The channel is plain TCP with no authentication or encryption.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] if nothing is listening, or
    /// [`Error::Transport`] for other connection failures.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        warn!(endpoint = %endpoint, "making an insecure, unauthenticated channel to the backend");
        let stream = TcpStream::connect((endpoint.address(), endpoint.port())).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::spawn(endpoint.to_string(), reader, writer))
    }

    /// Build a channel over an arbitrary byte stream pair.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::spawn("in-process".to_string(), reader, writer)
    }

    fn spawn<R, W>(label: String, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(Self::reader_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Self {
            inner: Arc::new(ChannelInner {
                label,
                writer: Mutex::new(Box::new(writer)),
                next_id: AtomicU64::new(1),
                pending,
                closed,
                reader,
            }),
        }
    }

    /// Number of requests sent but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns `true` once the underlying stream has closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Send a request and return the reply future without waiting on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the channel is closed or the write fails.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<PendingReply> {
        if self.is_closed() {
            return Err(Error::Transport("channel is closed".to_string()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = encode_line(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);

        // The reader may have closed between the check above and the insert.
        if self.is_closed() {
            self.inner.pending.remove(&id);
            return Err(Error::Transport("channel is closed".to_string()));
        }

        let write = async {
            let mut writer = self.inner.writer.lock().await;
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        if let Err(e) = write.await {
            self.inner.pending.remove(&id);
            return Err(Error::Transport(format!("failed to send '{method}': {e}")));
        }

        trace!(id, method, "request sent");
        Ok(PendingReply {
            id,
            method: method.to_string(),
            rx,
        })
    }

    /// Send a request and wait for its decoded reply.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        let value = self.send_request(method, params).await?.await?;
        serde_json::from_value(value)
            .map_err(|e| Error::protocol(format!("unexpected reply to '{method}': {e}")))
    }

    /// Query the backend's status.
    pub async fn server_status(&self) -> Result<ServerStatus> {
        let resp: ServerStatusResponse = self.call(METHOD_SERVER_STATUS, None).await?;
        Ok(resp.status)
    }

    /// Register adapter credentials with the backend.
    pub async fn register_adapter(
        &self,
        credentials: &AdapterCredentials,
    ) -> Result<RegistrationStatus> {
        let params = serde_json::to_value(credentials)?;
        let resp: RegistrationResponse = self.call(METHOD_REGISTER_ADAPTER, Some(params)).await?;
        Ok(resp.status)
    }

    /// Ask the backend process to exit.
    pub async fn kill_server(&self) -> Result<()> {
        let _ack: Value = self.call(METHOD_KILL_SERVER, None).await?;
        Ok(())
    }

    /// Send a task and return its in-flight response.
    pub async fn submit_task(&self, task: &AutomanTask) -> Result<PendingReply> {
        let params = serde_json::to_value(task)?;
        self.send_request(METHOD_SUBMIT_TASK, Some(params)).await
    }

    async fn reader_loop<R>(reader: R, pending: Arc<PendingMap>, closed: Arc<AtomicBool>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut reader = BufReader::new(reader);
        let mut frame = Vec::new();
        loop {
            frame.clear();
            match reader.read_until(b'\n', &mut frame).await {
                Ok(0) => {
                    debug!("backend closed the channel");
                    break;
                },
                Ok(_) => {
                    if frame.trim_ascii().is_empty() {
                        continue;
                    }
                    let response: JsonRpcResponse = match decode_line(&frame) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error = %e, "discarding undecodable message from backend");
                            continue;
                        },
                    };
                    let Some(id) = response.id else {
                        debug!("ignoring message without id");
                        continue;
                    };
                    match pending.remove(&id) {
                        Some((_, sender)) => {
                            let _ = sender.send(response.into_result());
                        },
                        None => debug!(id, "reply for unknown or abandoned request"),
                    }
                },
                Err(e) => {
                    warn!(error = %e, "channel read failed");
                    break;
                },
            }
        }

        closed.store(true, Ordering::Release);
        // Dropping the senders cancels every waiter.
        pending.clear();
    }
}

/// The reply to one request, not yet received.
///
/// Resolves to the raw JSON result. A JSON-RPC error object from the
/// backend becomes [`Error::Backend`]; a closed channel becomes
/// [`Error::Cancelled`].
#[derive(Debug)]
pub struct PendingReply {
    id: u64,
    method: String,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// The request id this reply is correlated with.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(Error::Backend {
                code: BackendErrorCode::Error,
                message: format!("{} (code {})", error.message, error.code),
            })),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled(format!(
                "channel closed before '{}' (id={}) was answered",
                this.method, this.id
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_validation() {
        assert_eq!(Endpoint::new("LocalHost", 50051).unwrap().to_string(), "localhost:50051");
        assert!(matches!(
            Endpoint::new("10.0.0.5", 50051),
            Err(Error::UnsupportedServer { .. })
        ));
        assert!(matches!(Endpoint::new("", 50051), Err(Error::Argument(_))));
        assert!(matches!(Endpoint::new("localhost", 0), Err(Error::Argument(_))));
    }

    #[tokio::test]
    async fn test_replies_are_routed_by_id() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);
        let channel = Channel::from_io(client_read, client_write);

        let first = channel.send_request("a", None).await.unwrap();
        let second = channel.send_request("b", None).await.unwrap();
        assert_eq!(channel.in_flight(), 2);

        let (server_read, mut server_write) = tokio::io::split(server_side);
        let mut lines = BufReader::new(server_read).lines();
        let _ = lines.next_line().await.unwrap();
        let _ = lines.next_line().await.unwrap();

        // Answer out of order.
        for (id, value) in [(second.id(), json!("two")), (first.id(), json!("one"))] {
            let bytes = encode_line(&JsonRpcResponse::success(id, value)).unwrap();
            server_write.write_all(&bytes).await.unwrap();
        }

        assert_eq!(first.await.unwrap(), json!("one"));
        assert_eq!(second.await.unwrap(), json!("two"));
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_garbage_frames_do_not_close_the_channel() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);
        let channel = Channel::from_io(client_read, client_write);

        let first = channel.send_request("submitTask", None).await.unwrap();
        let second = channel.send_request("submitTask", None).await.unwrap();

        let (_server_read, mut server_write) = tokio::io::split(server_side);
        server_write.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        server_write.write_all(b"{not json}\n").await.unwrap();
        let bytes = encode_line(&JsonRpcResponse::success(second.id(), json!("two"))).unwrap();
        server_write.write_all(&bytes).await.unwrap();

        assert_eq!(second.await.unwrap(), json!("two"));
        assert!(!channel.is_closed());
        assert_eq!(channel.in_flight(), 1);

        let bytes = encode_line(&JsonRpcResponse::success(first.id(), json!("one"))).unwrap();
        server_write.write_all(&bytes).await.unwrap();
        assert_eq!(first.await.unwrap(), json!("one"));
    }

    #[tokio::test]
    async fn test_closed_stream_cancels_waiters() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);
        let channel = Channel::from_io(client_read, client_write);

        let pending = channel.send_request("submitTask", None).await.unwrap();
        drop(server_side);

        assert!(matches!(pending.await, Err(Error::Cancelled(_))));
        assert!(channel.is_closed());
        assert!(channel.send_request("serverStatus", None).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_unavailable() {
        // Bind then drop a listener to find a port nobody is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = Endpoint::local(port).unwrap();
        let err = Channel::connect(&endpoint).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)), "got {err:?}");
    }
}
