//! # brokerpipe
//!
//! **Typed, backpressured message pipelines in Rust.**
//!
//! `brokerpipe` moves items from a **source** (an AMQP 0-9-1 queue, or an
//! integer generator) through a chain of typed **stages** into a **sink**.
//!
//! - one item in flight between a source and its consumer
//! - explicit, per-message acknowledgement (at-least-once delivery)
//! - a single cancellation root for the whole pipeline
//! - composable stages with in-band control signals
//!
//! ---
//!
//! ## Core Model
//!
//! ```text
//! Source ──(capacity 1)──▶ Transform ∘ Transform ∘ … ──▶ Sink
//! ```
//!
//! Sources implement [`Source`] and hand out a [`SourceStream`]. Stages
//! implement [`Transform`] and return a [`Flow`]: the next item, `Drop`
//! (skip this item), `Quit` (stop the pipeline) or `Fail`. Stages run inline
//! on the consumer task.
//!
//! ---
//!
//! ## Example
//!
//! ```no_run
//! use brokerpipe::prelude::*;
//! use brokerpipe::sink::writer::{display_lines, WriterSink};
//! use brokerpipe::source::integer::{IntItem, IntegerSource};
//!
//! #[tokio::main]
//! async fn main() -> brokerpipe::error::Result<()> {
//!     let source = IntegerSource::new().start(0).step(2).until(10);
//!     let stages = map(|item: IntItem| item.into_value() * 10u32);
//!     let mut sink = WriterSink::open("-", false, display_lines).await?;
//!
//!     let report = Runtime::new()
//!         .run(&source, &stages, &mut sink, CancelToken::new())
//!         .await?;
//!     assert_eq!(report.written, 5);
//!     Ok(())
//! }
//! ```
//!
//! ---
//!
//! ## Composition
//!
//! ```no_run
//! use brokerpipe::error::Error;
//! use brokerpipe::prelude::*;
//!
//! let parse = try_stage("parse", |s: String| {
//!     s.parse::<i64>().map_err(|e| Error::stage("parse", e))
//! });
//! let pipeline = parse
//!     .map(|n: i64| n * 2)
//!     .retain(|n: &i64| *n > 0)
//!     .then(stage(|n: i64| if n > 1_000 { Flow::Quit } else { Flow::Emit(n) }))
//!     .inspect(|n: &i64| println!("value = {n}"));
//! # let _ = pipeline;
//! ```
//!
//! If a stage does not emit, the stages after it never run.
//!
//! ---
//!
//! ## Acknowledgement
//!
//! Broker messages implement [`Acknowledgeable`]. Put [`acknowledge`] where
//! the pipeline has done everything it must do before the broker may forget
//! the message; anything not acknowledged before the connection drops is
//! redelivered.
//!
//! ---
//!
//! ## Cancellation
//!
//! ```no_run
//! use brokerpipe::prelude::*;
//! use brokerpipe::source::integer::IntegerSource;
//! # use brokerpipe::sink::Sink;
//! # async fn demo<K: Sink<brokerpipe::source::integer::IntItem> + 'static>(sink: K) -> brokerpipe::error::Result<()> {
//! let (cancel, handle) = Runtime::new().spawn(IntegerSource::new(), identity(), sink);
//!
//! // Stop everything
//! cancel.cancel();
//!
//! let report = handle.await??;
//! # let _ = report;
//! # Ok(())
//! # }
//! ```
//!
//! ---
//!
//! ## Observability
//!
//! Structured `tracing` events are emitted with stable names such as
//! `brokerpipe.source.state`, `brokerpipe.amqp.reconnect`,
//! `brokerpipe.ack.failed`, `brokerpipe.item.dropped`,
//! `brokerpipe.item.failed`, `brokerpipe.pipeline.quit` and
//! `brokerpipe.cancelled`.
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_target(false)
//!     .with_env_filter("brokerpipe=info")
//!     .init();
//! ```
//!
//! ---
//!
//! ## Feature Flags
//!
//! - `tracing` *(default)*: structured events.
//! - `amqp` *(default)*: the `lapin`-backed [`AmqpSource`].
//!
//! ---
//!
//! [`Source`]: source::Source
//! [`SourceStream`]: source::SourceStream
//! [`Transform`]: pipeline::transform::Transform
//! [`Flow`]: pipeline::transform::Flow
//! [`Acknowledgeable`]: pipeline::ack::Acknowledgeable
//! [`acknowledge`]: pipeline::ack::acknowledge
//! [`AmqpSource`]: source::amqp::AmqpSource

// Public modules
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod source;

pub mod prelude {
    //! Convenient imports for most `brokerpipe` users.

    pub use crate::pipeline::ack::{acknowledge, Acknowledgeable};
    pub use crate::pipeline::cancel::CancelToken;
    pub use crate::pipeline::chain::Chain;
    pub use crate::pipeline::runtime::{FailurePolicy, RunReport, Runtime};
    pub use crate::pipeline::transform::{
        apply, identity, map, stage, try_stage, Flow, Transform, TransformExt,
    };
    pub use crate::sink::Sink;
    pub use crate::source::{Source, SourceStream};
}
