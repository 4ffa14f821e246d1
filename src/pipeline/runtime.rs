use tokio::task::JoinHandle;

use crate::error::Result;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::transform::{Flow, Transform};
use crate::sink::Sink;
use crate::source::{Source, SourceStream};

/// What the owner does with an item whose transform failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and move on to the next item.
    #[default]
    Skip,
    /// Log, then write the item the failing stage handed back, if any.
    Forward,
    /// Stop the pipeline and return the error.
    Abort,
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub received: u64,
    pub written: u64,
    pub dropped: u64,
    pub failed: u64,
    /// A stage asked the pipeline to stop.
    pub quit: bool,
}

/// Drives `source -> transform -> sink` on the calling task.
pub struct Runtime {
    on_failure: FailurePolicy,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            on_failure: FailurePolicy::default(),
        }
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Run until the source ends, `cancel` fires, a stage quits, or a
    /// failure aborts the run.
    ///
    /// On every exit path the source is cancelled, its remaining items are
    /// discarded and its task is joined before the sink is flushed. A failed
    /// run still flushes what the sink has buffered before returning the
    /// error.
    pub async fn run<S, X, K, O>(
        &self,
        source: &S,
        transform: &X,
        sink: &mut K,
        cancel: CancelToken,
    ) -> Result<RunReport>
    where
        S: Source,
        X: Transform<S::Item, O>,
        K: Sink<O>,
        O: Send + 'static,
    {
        let mut stream = source.emit(&cancel)?;
        let mut report = RunReport::default();

        let outcome = self
            .drive(&mut stream, transform, sink, &cancel, &mut report)
            .await;

        let _discarded = stream.drain().await;
        #[cfg(feature = "tracing")]
        if _discarded > 0 {
            tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.pipeline.drained", discarded = _discarded, "brokerpipe.pipeline.drained");
        }
        stream.join().await?;

        if let Err(error) = outcome {
            // Best effort: the run error wins over a flush error.
            if let Err(_flush) = sink.flush().await {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::WARN, event = "brokerpipe.sink.flush_failed", error = %_flush, "brokerpipe.sink.flush_failed");
            }
            return Err(error);
        }
        sink.flush().await?;
        Ok(report)
    }

    async fn drive<T, X, K, O>(
        &self,
        stream: &mut SourceStream<T>,
        transform: &X,
        sink: &mut K,
        cancel: &CancelToken,
        report: &mut RunReport,
    ) -> Result<()>
    where
        T: Send + 'static,
        X: Transform<T, O>,
        K: Sink<O>,
        O: Send + 'static,
    {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.cancelled", stage = "runtime", where_ = "recv", "brokerpipe.cancelled");
                    return Ok(());
                },
                item = stream.next() => item,
            };
            let Some(item) = item else {
                return Ok(());
            };
            report.received += 1;

            match transform.transform(item).await {
                Flow::Emit(out) => {
                    sink.write(out).await?;
                    report.written += 1;
                }
                Flow::Drop => {
                    report.dropped += 1;
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.item.dropped", dropped = report.dropped, "brokerpipe.item.dropped");
                }
                Flow::Quit => {
                    report.quit = true;
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::INFO, event = "brokerpipe.pipeline.quit", received = report.received, "brokerpipe.pipeline.quit");
                    return Ok(());
                }
                Flow::Fail { item, error } => {
                    report.failed += 1;
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::WARN, event = "brokerpipe.item.failed", policy = ?self.on_failure, error = %error, "brokerpipe.item.failed");

                    match self.on_failure {
                        FailurePolicy::Skip => {}
                        FailurePolicy::Forward => {
                            if let Some(out) = item {
                                sink.write(out).await?;
                                report.written += 1;
                            }
                        }
                        FailurePolicy::Abort => return Err(error),
                    }
                }
            }
        }
    }

    /// Run on a new task with a fresh cancellation root.
    pub fn spawn<S, X, K, O>(
        self,
        source: S,
        transform: X,
        mut sink: K,
    ) -> (CancelToken, JoinHandle<Result<RunReport>>)
    where
        S: Source + 'static,
        X: Transform<S::Item, O> + 'static,
        K: Sink<O> + 'static,
        O: Send + 'static,
    {
        let cancel = CancelToken::new();
        let cancel_task = cancel.clone();

        #[cfg(feature = "tracing")]
        let handle = {
            use tracing::Instrument;
            let span = tracing::info_span!("brokerpipe.pipeline", policy = ?self.on_failure);
            tokio::spawn(
                async move {
                    self.run(&source, &transform, &mut sink, cancel_task)
                        .await
                }
                .instrument(span),
            )
        };

        #[cfg(not(feature = "tracing"))]
        let handle = tokio::spawn(async move {
            self.run(&source, &transform, &mut sink, cancel_task).await
        });

        (cancel, handle)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
