//! Client-side handle for one in-flight task.

use futures::FutureExt;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

use crate::client::resolver::resolve_response;
use crate::error::{Error, Result};
use crate::shared::channel::PendingReply;
use crate::task::TaskKind;
use crate::types::outcome::{Outcome, OutcomeType};

/// The client-side representative of one submitted task.
///
/// A handle starts out pending and is resolved at most once. The first
/// successful resolution (or terminal failure) is cached and returned to
/// every later caller without contacting the backend again. A resolution
/// that times out leaves the handle pending.
///
/// Concurrent callers are serialized: the first one drives the response and
/// the rest observe its cached result.
pub struct OutcomeHandle {
    id: Uuid,
    request_id: u64,
    kind: TaskKind,
    reply: Mutex<Option<PendingReply>>,
    resolved: OnceLock<Result<Outcome>>,
}

impl fmt::Debug for OutcomeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutcomeHandle")
            .field("id", &self.id)
            .field("request_id", &self.request_id)
            .field("kind", &self.kind)
            .field("resolved", &self.resolved.get())
            .finish()
    }
}

impl OutcomeHandle {
    pub(crate) fn new(kind: TaskKind, reply: PendingReply) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: reply.id(),
            kind,
            reply: Mutex::new(Some(reply)),
            resolved: OnceLock::new(),
        }
    }

    /// Unique id of this handle.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Id of the underlying request on the channel.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Kind of the submitted task.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Wait for the outcome.
    ///
    /// With `timeout = None` this waits indefinitely.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if `timeout` elapsed first; the handle stays pending
    /// - [`Error::Cancelled`] if the channel closed before a reply arrived
    /// - [`Error::Backend`] / [`Error::ProtocolVersion`] / [`Error::Protocol`]
    ///   from classifying the reply
    ///
    /// Every error other than a timeout is cached like an outcome.
    pub async fn resolve(&self, timeout: Option<Duration>) -> Result<Outcome> {
        if let Some(cached) = self.resolved.get() {
            return cached.clone();
        }

        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.drive())
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => self.drive().await,
        }
    }

    async fn drive(&self) -> Result<Outcome> {
        let mut reply = self.reply.lock().await;
        if let Some(cached) = self.resolved.get() {
            return cached.clone();
        }

        let Some(pending) = reply.as_mut() else {
            return Err(Error::protocol("handle has no response to wait on"));
        };
        let result = match pending.await {
            Ok(raw) => resolve_response(self.kind, raw),
            Err(e) => Err(e),
        };
        trace!(handle = %self.id, ok = result.is_ok(), "handle resolved");

        reply.take();
        let _ = self.resolved.set(result.clone());
        result
    }

    /// Try to resolve without waiting.
    ///
    /// Returns `true` if the handle is resolved afterwards (successfully or
    /// not).
    pub fn poll_done(&self) -> bool {
        if self.is_done() {
            return true;
        }
        let _ = self.drive().now_or_never();
        self.is_done()
    }

    /// Wait for resolution and discard the outcome.
    pub async fn done(&self, timeout: Option<Duration>) -> Result<()> {
        self.resolve(timeout).await.map(|_| ())
    }

    /// Returns `true` once an outcome or terminal error is cached. Never blocks.
    pub fn is_done(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// The cached classification, if resolved successfully. Never blocks.
    pub fn outcome_type(&self) -> Option<OutcomeType> {
        match self.resolved.get() {
            Some(Ok(outcome)) => Some(outcome.outcome_type()),
            _ => None,
        }
    }

    /// Resolve if needed and test for a confident answer.
    pub async fn is_confident(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.resolve(timeout).await?.is_confident())
    }

    /// Resolve if needed and test for a low-confidence answer.
    pub async fn is_low_confidence(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.resolve(timeout).await?.is_low_confidence())
    }

    /// Resolve if needed and test for an overbudget signal.
    pub async fn is_over_budget(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.resolve(timeout).await?.is_over_budget())
    }

    /// Resolve if needed and print the outcome report to stdout.
    pub async fn print_outcome(&self, timeout: Option<Duration>) -> Result<()> {
        let outcome = self.resolve(timeout).await?;
        println!("{}", outcome.report());
        Ok(())
    }
}
