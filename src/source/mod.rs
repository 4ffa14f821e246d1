//! Sources: producers of bounded, cancellable item streams.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::pipeline::cancel::CancelToken;

pub mod amqp;
pub mod integer;

/// Capacity of every source's output channel: one item in flight.
pub const SOURCE_CAPACITY: usize = 1;

/// A producer of items.
///
/// `emit` starts the producing task and may be called once. The task stops
/// and closes the stream when `cancel` (or a token it derives from) is
/// cancelled, when the source runs out of items, or on an unrecoverable
/// error, which the source logs.
pub trait Source: Send + Sync {
    type Item: Send + 'static;

    fn emit(&self, cancel: &CancelToken) -> Result<SourceStream<Self::Item>>;

    /// Cancel the producing task. Safe to call more than once, and before
    /// `emit`.
    fn close(&self) -> Result<()>;
}

/// Receiving end of a running source.
///
/// The producer owns the only sender, so the stream ends (`next` returns
/// `None`) exactly once, after the producer exits on any path.
pub struct SourceStream<T> {
    rx: mpsc::Receiver<T>,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl<T: Send + 'static> SourceStream<T> {
    /// Run `producer` on its own task, feeding a channel of
    /// [`SOURCE_CAPACITY`]. A panic in the producer is contained and logged;
    /// the channel still closes because the sender is dropped while
    /// unwinding.
    pub fn spawn<F, Fut>(stage: &'static str, cancel: CancelToken, producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<T>, CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<T>(SOURCE_CAPACITY);
        let task = tokio::spawn(producer(tx, cancel.clone()));

        let handle = tokio::spawn(async move {
            if let Err(err) = task.await {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::ERROR, event = "brokerpipe.source.panic", stage = stage, panic = err.is_panic(), error = %err, "brokerpipe.source.panic");
                #[cfg(not(feature = "tracing"))]
                let _ = (stage, err);
            }
        });

        Self { rx, cancel, handle }
    }

    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Cancel the producer and discard whatever it still hands over until
    /// the stream closes.
    pub async fn drain(&mut self) -> usize {
        self.cancel();
        let mut discarded = 0;
        while self.rx.recv().await.is_some() {
            discarded += 1;
        }
        discarded
    }

    /// Wait for the producer task to finish. Dropping the receiver first
    /// unblocks a producer stuck on a send.
    pub async fn join(self) -> Result<()> {
        drop(self.rx);
        self.handle.await?;
        Ok(())
    }

    pub fn into_receiver(self) -> mpsc::Receiver<T> {
        self.rx
    }
}

/// Emit-once bookkeeping shared by the built-in sources.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    own: CancelToken,
    emitted: AtomicBool,
}

impl Lifecycle {
    /// Token for a new producer: cancelled by the caller's token or by
    /// [`Lifecycle::close`].
    pub(crate) fn begin(&self, caller: &CancelToken) -> Result<CancelToken> {
        if self.emitted.swap(true, Ordering::SeqCst) {
            return Err(Error::pipeline("source already emitted"));
        }
        let token = caller.child_token();
        self.own.attach(&token);
        Ok(token)
    }

    pub(crate) fn close(&self) {
        self.own.cancel();
    }
}
