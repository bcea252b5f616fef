//! Cancellable handles for pending device lookups

use std::sync::Arc;
use std::time::Duration;

use droidrun_core::prelude::*;
use droidrun_core::DeviceKind;
use tokio::sync::{oneshot, watch};

/// How a lookup ended
#[derive(Debug)]
pub enum Lookup<D> {
    /// A device of the requested kind
    Found(Arc<D>),
    /// No device will appear (the emulator failed to start or exited)
    Unavailable,
    /// The handle was cancelled or dropped
    Cancelled,
}

impl<D> Lookup<D> {
    pub fn device(&self) -> Option<&Arc<D>> {
        match self {
            Lookup::Found(device) => Some(device),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Lookup::Cancelled)
    }
}

/// Result of waiting on a handle for a bounded time
#[derive(Debug)]
pub enum LookupPoll<D> {
    Ready(Result<Lookup<D>>),
    Pending,
}

/// A lookup queued on the registry worker
pub(crate) struct LookupRequest<D> {
    pub kind: DeviceKind,
    pub cancel: CancelToken,
    pub reply: oneshot::Sender<Result<Lookup<D>>>,
}

/// The worker's view of a handle's cancel flag
#[derive(Debug, Clone)]
pub(crate) struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Cancelled explicitly, or the handle is gone
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves when the flag is set or the handle is dropped
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// A device that will be available at some point
///
/// Await it in slices with [`LookupHandle::wait_timeout`], or stop the lookup
/// with [`LookupHandle::cancel`]. Dropping the handle also cancels it.
#[derive(Debug)]
pub struct LookupHandle<D> {
    kind: DeviceKind,
    reply: oneshot::Receiver<Result<Lookup<D>>>,
    cancel: watch::Sender<bool>,
    finished: bool,
}

impl<D> LookupHandle<D> {
    pub(crate) fn new(kind: DeviceKind) -> (Self, LookupRequest<D>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = Self {
            kind,
            reply: reply_rx,
            cancel: cancel_tx,
            finished: false,
        };
        let request = LookupRequest {
            kind,
            cancel: CancelToken { rx: cancel_rx },
            reply: reply_tx,
        };
        (handle, request)
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Wait at most `slice` for the lookup to finish
    ///
    /// Once `Ready` has been returned, later calls return `Ready(Cancelled)`.
    pub async fn wait_timeout(&mut self, slice: Duration) -> LookupPoll<D> {
        if self.finished {
            return LookupPoll::Ready(Ok(Lookup::Cancelled));
        }

        match tokio::time::timeout(slice, &mut self.reply).await {
            Ok(result) => {
                self.finished = true;
                LookupPoll::Ready(result.unwrap_or(Err(Error::ChannelClosed)))
            }
            Err(_) => LookupPoll::Pending,
        }
    }

    /// Wait until the lookup finishes
    pub async fn wait(mut self) -> Result<Lookup<D>> {
        if self.finished {
            return Ok(Lookup::Cancelled);
        }
        self.finished = true;
        (&mut self.reply).await.unwrap_or(Err(Error::ChannelClosed))
    }

    /// Ask the worker to stop looking; observed at its next retry
    pub fn cancel(&self) {
        debug!("Cancelling {} lookup", self.kind.noun());
        self.cancel.send_replace(true);
    }
}
