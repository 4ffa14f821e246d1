use std::time::Duration;

use brokerpipe::error::{Error, Result};
use brokerpipe::pipeline::ack::Acknowledgeable;
use brokerpipe::pipeline::cancel::CancelToken;
use brokerpipe::source::integer::IntegerSource;
use brokerpipe::source::Source;
use num_bigint::BigInt;

mod common;
use common::collect_all;

fn values(items: Vec<brokerpipe::source::integer::IntItem>) -> Vec<BigInt> {
    items.into_iter().map(|i| i.into_value()).collect()
}

fn big(values: &[i64]) -> Vec<BigInt> {
    values.iter().copied().map(BigInt::from).collect()
}

#[tokio::test]
async fn finite_sequence_then_close() -> Result<()> {
    let source = IntegerSource::new().start(0).step(2).until(10);
    let mut stream = source.emit(&CancelToken::new())?;

    let items = collect_all(&mut stream, Duration::from_secs(1)).await;
    assert_eq!(values(items), big(&[0, 2, 4, 6, 8]));
    assert_eq!(source.emitted(), 5);

    stream.join().await
}

#[tokio::test]
async fn negative_step_counts_down_to_exclusive_end() -> Result<()> {
    let source = IntegerSource::new().start(5).step(-2).until(-2);
    let mut stream = source.emit(&CancelToken::new())?;

    let items = collect_all(&mut stream, Duration::from_secs(1)).await;
    assert_eq!(values(items), big(&[5, 3, 1, -1]));
    Ok(())
}

#[tokio::test]
async fn end_behind_start_is_empty() -> Result<()> {
    let source = IntegerSource::new().start(10).until(10);
    let mut stream = source.emit(&CancelToken::new())?;

    let items = collect_all(&mut stream, Duration::from_secs(1)).await;
    assert!(items.is_empty());
    Ok(())
}

#[tokio::test]
async fn zero_step_repeats_until_cancelled() -> Result<()> {
    let cancel = CancelToken::new();
    let source = IntegerSource::new().start(5).step(0);
    let mut stream = source.emit(&cancel)?;

    cancel.cancel_after(Duration::from_millis(100));

    let items = collect_all(&mut stream, Duration::from_secs(2)).await;
    assert!(!items.is_empty());
    assert!(items.iter().all(|i| *i.value() == BigInt::from(5)));
    Ok(())
}

#[tokio::test]
async fn cancellation_closes_channel_promptly() -> Result<()> {
    let cancel = CancelToken::new();
    let source = IntegerSource::new();
    let mut stream = source.emit(&cancel)?;

    assert_eq!(stream.next().await.map(|i| i.into_value()), Some(BigInt::from(0)));
    cancel.cancel();

    // At most the one item already buffered may still arrive.
    let rest = collect_all(&mut stream, Duration::from_millis(300)).await;
    assert!(rest.len() <= 1, "got {} items after cancel", rest.len());

    let emitted = source.emitted();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.emitted(), emitted, "no sends after close");
    Ok(())
}

#[tokio::test]
async fn capacity_one_backpressure() -> Result<()> {
    let source = IntegerSource::new();
    let mut stream = source.emit(&CancelToken::new())?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.emitted(), 1, "one buffered item, producer blocked");

    let first = stream.next().await.expect("first item");
    assert_eq!(first.into_value(), BigInt::from(0));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.emitted(), 2);

    stream.cancel();
    stream.join().await
}

#[tokio::test]
async fn raw_receiver_sees_the_same_items() -> Result<()> {
    let source = IntegerSource::new().start(-3).until(0);
    let mut rx = source.emit(&CancelToken::new())?.into_receiver();

    let mut seen = Vec::new();
    while let Some(item) = rx.recv().await {
        seen.push(item.into_value());
    }
    assert_eq!(seen, big(&[-3, -2, -1]));
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent_and_ends_stream() -> Result<()> {
    let source = IntegerSource::new().step(0);
    let mut stream = source.emit(&CancelToken::new())?;

    source.close()?;
    source.close()?;

    let rest = collect_all(&mut stream, Duration::from_millis(300)).await;
    assert!(rest.len() <= 1);
    Ok(())
}

#[tokio::test]
async fn emit_is_single_use() -> Result<()> {
    let source = IntegerSource::new().until(3);
    let _stream = source.emit(&CancelToken::new())?;

    match source.emit(&CancelToken::new()) {
        Err(Error::Pipeline { context }) => assert_eq!(context, "source already emitted"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("second emit must fail"),
    }
    Ok(())
}

#[tokio::test]
async fn emit_after_close_yields_closed_stream() -> Result<()> {
    let source = IntegerSource::new();
    source.close()?;

    let mut stream = source.emit(&CancelToken::new())?;
    let items = collect_all(&mut stream, Duration::from_millis(300)).await;
    assert!(items.len() <= 1);
    Ok(())
}

#[tokio::test]
async fn items_are_independent_copies() -> Result<()> {
    let source = IntegerSource::new().start(1).until(3);
    let mut stream = source.emit(&CancelToken::new())?;

    let mut first = stream.next().await.expect("first").into_value();
    first *= 1000;
    let second = stream.next().await.expect("second").into_value();

    assert_eq!(first, BigInt::from(1000));
    assert_eq!(second, BigInt::from(2));
    Ok(())
}

#[tokio::test]
async fn ack_is_a_no_op() -> Result<()> {
    let source = IntegerSource::new().start(7).until(8);
    let mut stream = source.emit(&CancelToken::new())?;

    let item = stream.next().await.expect("item");
    item.ack(false).await?;
    item.ack(true).await?;
    assert_eq!(item.back_ref(), &BigInt::from(7));
    Ok(())
}

#[tokio::test]
async fn huge_values_do_not_overflow() -> Result<()> {
    let start = BigInt::from(u128::MAX);
    let source = IntegerSource::new()
        .start(start.clone())
        .step(u128::MAX)
        .until(start.clone() * 3u32 + 1u32);
    let mut stream = source.emit(&CancelToken::new())?;

    let items = values(collect_all(&mut stream, Duration::from_secs(1)).await);
    assert_eq!(items, vec![start.clone(), start.clone() * 2u32, start * 3u32]);
    Ok(())
}

#[test]
fn sequence_is_restartable() {
    let source = IntegerSource::new().start(3).step(3).until(12);

    let first: Vec<BigInt> = source.sequence().collect();
    let second: Vec<BigInt> = source.sequence().collect();

    assert_eq!(first, big(&[3, 6, 9]));
    assert_eq!(first, second);
}

#[test]
fn visitor_can_stop_early() {
    let source = IntegerSource::new();
    let mut seen = Vec::new();

    source.visit(&CancelToken::new(), |v| {
        seen.push(v);
        seen.len() < 4
    });

    assert_eq!(seen, big(&[0, 1, 2, 3]));
}

#[test]
fn visitor_respects_cancellation() {
    let cancel = CancelToken::new();
    let source = IntegerSource::new().step(0);
    let mut calls = 0;

    source.visit(&cancel, |_| {
        calls += 1;
        if calls == 10 {
            cancel.cancel();
        }
        true
    });

    assert_eq!(calls, 10);
}
