//! Coordinating many handles submitted together.

use futures::stream::{self, BoxStream, FuturesUnordered, Stream, StreamExt};
use std::time::Duration;
use tracing::trace;

use crate::client::handle::OutcomeHandle;
use crate::error::{Error, Result};
use crate::types::outcome::Outcome;

/// An ordered group of handles.
///
/// Indexed access follows submission order. Completion order is only
/// observable through [`Batch::as_completed`] and
/// [`Batch::as_completed_polling`].
#[derive(Debug, Default)]
pub struct Batch {
    handles: Vec<OutcomeHandle>,
}

impl Batch {
    /// Group `handles`, keeping their order.
    pub fn new(handles: Vec<OutcomeHandle>) -> Self {
        Self { handles }
    }

    /// Number of handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if the batch has no handles.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Handles in submission order.
    pub fn iter(&self) -> std::slice::Iter<'_, OutcomeHandle> {
        self.handles.iter()
    }

    /// The handle at submission index `index`.
    pub fn handle(&self, index: usize) -> Option<&OutcomeHandle> {
        self.handles.get(index)
    }

    /// Resolve and return the outcome at submission index `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] if `index` is out of range, otherwise
    /// whatever resolving that handle returns.
    pub async fn get(&self, index: usize) -> Result<Outcome> {
        let handle = self.handles.get(index).ok_or_else(|| {
            Error::argument(format!(
                "batch index {index} out of range (batch has {} tasks)",
                self.handles.len()
            ))
        })?;
        handle.resolve(None).await
    }

    /// Resolve every handle in submission order.
    ///
    /// Stops at the first failure and returns it; later handles are left
    /// as they were.
    pub async fn wait_all_done(&self) -> Result<()> {
        for (index, handle) in self.handles.iter().enumerate() {
            trace!(index, "waiting on batch member");
            handle.done(None).await?;
        }
        Ok(())
    }

    /// Yield each handle once, in completion order.
    ///
    /// All handles are awaited concurrently; a handle is yielded as soon as
    /// it resolves, whether to an outcome or to an error.
    pub fn as_completed(&self) -> impl Stream<Item = &OutcomeHandle> + '_ {
        self.handles
            .iter()
            .map(|handle| async move {
                let _ = handle.done(None).await;
                handle
            })
            .collect::<FuturesUnordered<_>>()
    }

    /// Yield each handle once, scanning for resolved handles and sleeping
    /// `interval` between scans that find none.
    pub fn as_completed_polling(&self, interval: Duration) -> BoxStream<'_, &OutcomeHandle> {
        let remaining: Vec<&OutcomeHandle> = self.handles.iter().collect();
        stream::unfold(remaining, move |mut remaining| async move {
            loop {
                if remaining.is_empty() {
                    return None;
                }
                if let Some(pos) = remaining.iter().position(|h| h.poll_done()) {
                    let handle = remaining.remove(pos);
                    return Some((handle, remaining));
                }
                tokio::time::sleep(interval).await;
            }
        })
        .boxed()
    }

    /// Apply `f` to each handle as it completes.
    pub fn for_each_completed<'a, F, T>(&'a self, f: F) -> impl Stream<Item = T> + 'a
    where
        F: FnMut(&'a OutcomeHandle) -> T + 'a,
        T: 'a,
    {
        self.as_completed().map(f)
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a OutcomeHandle;
    type IntoIter = std::slice::Iter<'a, OutcomeHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<OutcomeHandle> for Batch {
    fn from_iter<I: IntoIterator<Item = OutcomeHandle>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
