#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use brokerpipe::error::{Error, Result};
use brokerpipe::pipeline::ack::{AckOnce, Acknowledgeable};
use brokerpipe::sink::Sink;
use brokerpipe::source::SourceStream;

pub struct CollectSink<T> {
    out: Arc<Mutex<Vec<T>>>,
    fail_after: Option<usize>,
    flushes: Arc<AtomicUsize>,
}

impl<T> CollectSink<T> {
    pub fn new(out: Arc<Mutex<Vec<T>>>) -> Self {
        Self {
            out,
            fail_after: None,
            flushes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Count `flush` calls into `flushes`.
    pub fn count_flushes(mut self, flushes: Arc<AtomicUsize>) -> Self {
        self.flushes = flushes;
        self
    }

    /// Reject every write once `n` items have been collected.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

#[async_trait]
impl<T> Sink<T> for CollectSink<T>
where
    T: Send + 'static,
{
    async fn write(&mut self, item: T) -> Result<()> {
        let mut out = self.out.lock().expect("mutex poisoned");
        if self.fail_after.is_some_and(|n| out.len() >= n) {
            return Err(Error::pipeline("sink full"));
        }
        out.push(item);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Acknowledgeable test double that records every acknowledgement.
#[derive(Debug)]
pub struct RecordingItem {
    pub tag: u64,
    acked: AckOnce,
    ack_calls: Arc<AtomicUsize>,
    broker_rejects: bool,
}

impl RecordingItem {
    pub fn new(tag: u64, ack_calls: Arc<AtomicUsize>) -> Self {
        Self {
            tag,
            acked: AckOnce::new(),
            ack_calls,
            broker_rejects: false,
        }
    }

    pub fn rejecting(mut self) -> Self {
        self.broker_rejects = true;
        self
    }

    pub fn is_acked(&self) -> bool {
        self.acked.is_claimed()
    }
}

#[async_trait]
impl Acknowledgeable for RecordingItem {
    type Handle = u64;

    async fn ack(&self, _multiple: bool) -> Result<()> {
        self.ack_calls.fetch_add(1, Ordering::SeqCst);
        self.acked.try_claim(self.tag)?;
        if self.broker_rejects {
            return Err(Error::pipeline("channel closed"));
        }
        Ok(())
    }

    fn back_ref(&self) -> &u64 {
        &self.tag
    }
}

/// Read the stream to its end, failing the test if it does not close in time.
pub async fn collect_all<T: Send + 'static>(stream: &mut SourceStream<T>, within: Duration) -> Vec<T> {
    tokio::time::timeout(within, async {
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        items
    })
    .await
    .expect("stream did not close in time")
}
