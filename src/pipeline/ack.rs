use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::pipeline::transform::{Flow, Transform};

/// Items that can confirm receipt to the broker they came from.
///
/// `ack(false)` confirms this item only; `ack(true)` confirms this item and
/// every earlier unacknowledged item on the same channel. An item must be
/// acknowledged at most once; implementations report a second attempt as an
/// error.
#[async_trait]
pub trait Acknowledgeable: Send + Sync {
    /// What the item was built from, for logging and diagnostics.
    type Handle: ?Sized;

    async fn ack(&self, multiple: bool) -> Result<()>;

    fn back_ref(&self) -> &Self::Handle;
}

/// At-most-once acknowledgement guard for a single delivery.
///
/// The claim is taken before the broker is contacted, so a claim whose
/// acknowledgement then fails stays taken.
#[derive(Debug, Default)]
pub struct AckOnce {
    acked: AtomicBool,
}

impl AckOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the single acknowledgement for `delivery_tag`. Every later
    /// claim returns [`Error::AlreadyAcked`].
    pub fn try_claim(&self, delivery_tag: u64) -> Result<()> {
        if self.acked.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyAcked { delivery_tag });
        }
        Ok(())
    }

    pub fn is_claimed(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }
}

/// Filter that acknowledges each item and forwards it.
///
/// When the broker rejects the acknowledgement the item is still forwarded,
/// inside [`Flow::Fail`], together with the broker's error.
#[derive(Debug, Clone, Copy)]
pub struct Acknowledge {
    multiple: bool,
}

pub fn acknowledge(multiple: bool) -> Acknowledge {
    Acknowledge { multiple }
}

#[async_trait]
impl<T> Transform<T, T> for Acknowledge
where
    T: Acknowledgeable + 'static,
{
    async fn transform(&self, input: T) -> Flow<T> {
        match input.ack(self.multiple).await {
            Ok(()) => Flow::Emit(input),
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::WARN, event = "brokerpipe.ack.failed", multiple = self.multiple, error = %error, "brokerpipe.ack.failed");
                Flow::Fail {
                    item: Some(input),
                    error,
                }
            }
        }
    }
}
