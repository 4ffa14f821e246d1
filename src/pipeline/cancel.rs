use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cooperative cancellation signal shared between a pipeline owner, its
/// source and its stages.
///
/// Tokens form a tree: cancelling a token cancels every live token derived
/// from it with [`CancelToken::child_token`], never the other way round.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register as a waiter before re-checking the flag, otherwise a
        // cancel landing in between is lost.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// New token that is cancelled together with `self`.
    pub fn child_token(&self) -> CancelToken {
        let child = CancelToken::new();
        self.attach(&child);
        child
    }

    /// Make `child` follow `self`. A token may follow several parents.
    pub(crate) fn attach(&self, child: &CancelToken) {
        {
            let mut children = self
                .inner
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.is_cancelled() {
                children.retain(|weak| weak.strong_count() > 0);
                children.push(Arc::downgrade(&child.inner));
                return;
            }
        }
        child.cancel();
    }

    /// Cancel this token once `delay` has elapsed. Must be called from
    /// within a tokio runtime.
    pub fn cancel_after(&self, delay: Duration) {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => token.cancel(),
            }
        });
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
