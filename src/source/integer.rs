//! Arbitrary-precision integer sequences.
//!
//! [`IntegerSource`] emits `start, start + step, start + 2·step, …` on a
//! bounded stream. With `until` set the sequence stops before reaching it
//! (exclusive bound, in the direction of `step`). A zero step repeats
//! `start` until cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::{BigInt, Sign};
use num_traits::{One, Zero};
use tokio::sync::mpsc::Sender;

use crate::error::Result;
use crate::pipeline::ack::Acknowledgeable;
use crate::pipeline::cancel::CancelToken;
use crate::source::{Lifecycle, Source, SourceStream};

/// One generated value. Acknowledging it is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntItem {
    value: BigInt,
}

impl IntItem {
    pub fn new(value: BigInt) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &BigInt {
        &self.value
    }

    pub fn into_value(self) -> BigInt {
        self.value
    }
}

#[async_trait]
impl Acknowledgeable for IntItem {
    type Handle = BigInt;

    async fn ack(&self, _multiple: bool) -> Result<()> {
        Ok(())
    }

    fn back_ref(&self) -> &BigInt {
        &self.value
    }
}

/// Lazy, side-effect free view of an [`IntegerSource`]'s values.
#[derive(Debug, Clone)]
pub struct Sequence {
    next: BigInt,
    step: BigInt,
    until: Option<BigInt>,
}

impl Sequence {
    fn finished(&self) -> bool {
        let Some(until) = &self.until else {
            return false;
        };
        match self.step.sign() {
            Sign::Plus => self.next >= *until,
            Sign::Minus => self.next <= *until,
            Sign::NoSign => false,
        }
    }
}

impl Iterator for Sequence {
    type Item = BigInt;

    fn next(&mut self) -> Option<BigInt> {
        if self.finished() {
            return None;
        }
        let current = self.next.clone();
        self.next += &self.step;
        Some(current)
    }
}

pub struct IntegerSource {
    start: BigInt,
    step: BigInt,
    until: Option<BigInt>,
    emitted: Arc<AtomicU64>,
    lifecycle: Lifecycle,
}

impl IntegerSource {
    /// `0, 1, 2, …` without end.
    pub fn new() -> Self {
        Self {
            start: BigInt::zero(),
            step: BigInt::one(),
            until: None,
            emitted: Arc::new(AtomicU64::new(0)),
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn start(mut self, start: impl Into<BigInt>) -> Self {
        self.start = start.into();
        self
    }

    pub fn step(mut self, step: impl Into<BigInt>) -> Self {
        self.step = step.into();
        self
    }

    /// Exclusive end. Ignored when the step is zero.
    pub fn until(mut self, until: impl Into<BigInt>) -> Self {
        self.until = Some(until.into());
        self
    }

    /// A fresh iterator over the configured values; every call restarts
    /// from `start`.
    pub fn sequence(&self) -> Sequence {
        Sequence {
            next: self.start.clone(),
            step: self.step.clone(),
            until: self.until.clone(),
        }
    }

    /// Feed values to `visitor` until it returns `false`, the sequence ends
    /// or `cancel` fires.
    pub fn visit<F>(&self, cancel: &CancelToken, mut visitor: F)
    where
        F: FnMut(BigInt) -> bool,
    {
        for value in self.sequence() {
            if cancel.is_cancelled() || !visitor(value) {
                break;
            }
        }
    }

    /// Number of items handed to the output channel so far.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }
}

impl Default for IntegerSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for IntegerSource {
    type Item = IntItem;

    fn emit(&self, cancel: &CancelToken) -> Result<SourceStream<IntItem>> {
        let token = self.lifecycle.begin(cancel)?;
        let sequence = self.sequence();
        let emitted = Arc::clone(&self.emitted);

        Ok(SourceStream::spawn("integer_source", token, move |output, cancel| {
            produce(sequence, output, cancel, emitted)
        }))
    }

    fn close(&self) -> Result<()> {
        self.lifecycle.close();
        Ok(())
    }
}

async fn produce(
    sequence: Sequence,
    output: Sender<IntItem>,
    cancel: CancelToken,
    emitted: Arc<AtomicU64>,
) {
    for value in sequence {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.cancelled", stage = "integer_source", where_ = "send", "brokerpipe.cancelled");
                return;
            },
            sent = output.send(IntItem::new(value)) => {
                if sent.is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::INFO, event = "brokerpipe.downstream.closed", stage = "integer_source", "brokerpipe.downstream.closed");
                    return;
                }
                emitted.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
