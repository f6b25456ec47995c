//! Transport shared by the session, the supervisor and the test backend.

pub mod channel;
pub mod jsonrpc;

pub use channel::{Channel, Endpoint, PendingReply, DEFAULT_PORT, LOCALHOST};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
