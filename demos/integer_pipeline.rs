//! Integer Pipeline Example
//!
//! Run with:
//!   cargo run --example integer_pipeline
//!
//! Generates `0, 3, 6, …`, drops odd values, stops the pipeline once a value
//! passes 60 and prints the rest to stdout. A second, unbounded run is
//! stopped from the outside with a cancellation timer.

use std::time::Duration;

use brokerpipe::error::Result;
use brokerpipe::pipeline::ack::acknowledge;
use brokerpipe::pipeline::cancel::CancelToken;
use brokerpipe::pipeline::runtime::Runtime;
use brokerpipe::pipeline::transform::{identity, stage, Flow, Transform, TransformExt};
use brokerpipe::sink::writer::{display_lines, WriterSink};
use brokerpipe::source::integer::{IntItem, IntegerSource};
use num_bigint::BigInt;
use num_traits::Zero;

fn stages() -> impl Transform<IntItem, BigInt> {
    identity::<IntItem>()
        .then(acknowledge(false))
        .map(|item: IntItem| item.into_value())
        .retain(|v: &BigInt| (v % 2u32).is_zero())
        .then(stage(|v: BigInt| {
            if v > BigInt::from(60) {
                Flow::Quit
            } else {
                Flow::Emit(v)
            }
        }))
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Bounded by a quitting stage ===");
    let source = IntegerSource::new().step(3);
    let mut sink = WriterSink::open("-", false, display_lines::<BigInt>).await?;

    let report = Runtime::new()
        .run(&source, &stages(), &mut sink, CancelToken::new())
        .await?;
    println!(
        "received={} written={} dropped={} quit={}",
        report.received, report.written, report.dropped, report.quit
    );

    println!("\n=== Bounded by cancellation ===");
    let sink = WriterSink::open("-", false, display_lines::<BigInt>)
        .await?
        .accept(|v| (v % 1000u32).is_zero());
    let (cancel, handle) = Runtime::new().spawn(
        IntegerSource::new().start(1).step(7),
        identity::<IntItem>().map(|item: IntItem| item.into_value()),
        sink,
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let report = handle.await??;
    println!("received={} before cancel", report.received);
    Ok(())
}
