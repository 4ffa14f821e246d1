//! AMQP To File Example
//!
//! Run with:
//!   cargo run --example amqp_to_file -- topology.yaml out.jsonl
//!
//! Consumes the queue described by a topology document, acknowledges each
//! message and appends it to a JSON-lines file (`-` for stdout). Stops on
//! Ctrl-C.
//!
//! Set `RUST_LOG=brokerpipe=debug` to follow connection state changes.

use brokerpipe::error::{Error, Result};
use brokerpipe::pipeline::ack::acknowledge;
use brokerpipe::pipeline::runtime::{FailurePolicy, Runtime};
use brokerpipe::pipeline::transform::{identity, TransformExt};
use brokerpipe::sink::writer::{json_lines, WriterSink};
use brokerpipe::source::amqp::{AmqpSource, Message, MessageRecord};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("brokerpipe=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let topology = args
        .next()
        .ok_or_else(|| Error::config("usage: amqp_to_file <topology> [output]"))?;
    let output = args.next().unwrap_or_else(|| "-".to_string());

    let source = AmqpSource::from_path(&topology)?.prefetch_count(16);
    let sink = WriterSink::open(&output, false, json_lines::<MessageRecord>).await?;
    let stages = identity::<Message>()
        .then(acknowledge(false))
        .map(|message: Message| message.record());

    let (cancel, handle) = Runtime::new()
        .on_failure(FailurePolicy::Forward)
        .spawn(source, stages, sink);

    tokio::signal::ctrl_c().await?;
    cancel.cancel();

    let report = handle.await??;
    tracing::info!(
        received = report.received,
        written = report.written,
        failed = report.failed,
        "stopped"
    );
    Ok(())
}
