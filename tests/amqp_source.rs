#![cfg(feature = "amqp")]

use std::time::Duration;

use brokerpipe::error::{Error, Result};
use brokerpipe::pipeline::ack::{acknowledge, Acknowledgeable};
use brokerpipe::pipeline::cancel::CancelToken;
use brokerpipe::pipeline::transform::Transform;
use brokerpipe::source::amqp::topology::{
    BindingConfig, ClientConfig, ExchangeConfig, ExchangeKind, QueueConfig, ServerConfig,
    Topology,
};
use brokerpipe::source::amqp::{AmqpSource, Message, SourceState, DEFAULT_CLIENT_ID};
use brokerpipe::source::Source;

mod common;
use common::collect_all;

fn unreachable_topology() -> Topology {
    Topology {
        client: ClientConfig {
            id: String::new(),
            tag: String::new(),
        },
        servers: vec![ServerConfig {
            address: "127.0.0.1".into(),
            port: 1,
            username: None,
            password: None,
            tls: None,
        }],
        queue: QueueConfig {
            name: "brokerpipe-test".into(),
            durable: false,
            declare: true,
            exclusive: false,
            auto_delete: true,
        },
        bindings: vec![BindingConfig {
            exchange: ExchangeConfig {
                name: "brokerpipe-test".into(),
                kind: ExchangeKind::Topic,
                durable: false,
                declare: true,
                auto_delete: true,
            },
            routing_keys: vec!["a.#".into()],
        }],
    }
}

#[test]
fn invalid_topology_is_rejected_up_front() {
    let mut topology = unreachable_topology();
    topology.bindings[0].routing_keys.clear();
    assert!(matches!(AmqpSource::new(topology), Err(Error::Config(_))));

    let mut topology = unreachable_topology();
    topology.servers[0].port = 0;
    assert!(matches!(AmqpSource::new(topology), Err(Error::Config(_))));
}

#[test]
fn empty_client_settings_use_build_identifier() -> Result<()> {
    let source = AmqpSource::new(unreachable_topology())?;
    assert_eq!(source.client_id(), DEFAULT_CLIENT_ID);
    assert_eq!(source.consumer_tag(), DEFAULT_CLIENT_ID);
    assert!(DEFAULT_CLIENT_ID.starts_with("brokerpipe/"));

    let mut topology = unreachable_topology();
    topology.client.id = "ingest-1".into();
    let source = AmqpSource::new(topology)?;
    assert_eq!(source.client_id(), "ingest-1");
    assert_eq!(source.state(), SourceState::Idle);
    Ok(())
}

#[tokio::test]
async fn gives_up_after_bounded_reconnects() -> Result<()> {
    let source = AmqpSource::new(unreachable_topology())?
        .reconnect_delay(Duration::ZERO)
        .max_reconnects(Some(2));
    let mut state = source.watch_state();

    let mut stream = source.emit(&CancelToken::new())?;
    let items = collect_all(&mut stream, Duration::from_secs(5)).await;
    assert!(items.is_empty());

    state
        .wait_for(|s| *s == SourceState::Terminating)
        .await
        .expect("state channel open");
    Ok(())
}

#[tokio::test]
async fn close_interrupts_reconnect_wait() -> Result<()> {
    let source = AmqpSource::new(unreachable_topology())?.reconnect_delay(Duration::from_secs(60));
    let mut state = source.watch_state();
    let mut stream = source.emit(&CancelToken::new())?;

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == SourceState::Reconnecting),
    )
    .await
    .expect("never reached reconnecting")
    .expect("state channel open");

    source.close()?;
    let items = collect_all(&mut stream, Duration::from_secs(2)).await;
    assert!(items.is_empty());
    assert_eq!(source.state(), SourceState::Terminating);
    Ok(())
}

#[tokio::test]
async fn unreadable_ca_certificate_is_fatal() -> Result<()> {
    let mut topology = unreachable_topology();
    topology.servers[0].tls = Some(brokerpipe::source::amqp::topology::TlsConfig {
        enabled: true,
        ca_cert: Some("/nonexistent/brokerpipe-ca.pem".into()),
        ..Default::default()
    });
    let source = AmqpSource::new(topology)?.reconnect_delay(Duration::from_secs(60));

    let mut stream = source.emit(&CancelToken::new())?;
    let items = collect_all(&mut stream, Duration::from_secs(2)).await;
    assert!(items.is_empty());
    Ok(())
}

#[tokio::test]
async fn emit_is_single_use() -> Result<()> {
    let source = AmqpSource::new(unreachable_topology())?.max_reconnects(Some(1));
    let _stream = source.emit(&CancelToken::new())?;
    assert!(source.emit(&CancelToken::new()).is_err());
    source.close()
}

/// Needs a broker. Point `BROKERPIPE_TOPOLOGY` at a topology whose first
/// binding routes `a.#` from a topic exchange into the queue.
#[tokio::test]
#[ignore = "needs BROKERPIPE_TOPOLOGY"]
async fn consumes_and_acknowledges_bound_messages() -> Result<()> {
    let path = std::env::var("BROKERPIPE_TOPOLOGY")
        .map_err(|_| Error::config("BROKERPIPE_TOPOLOGY is not set"))?;
    let source = AmqpSource::from_path(&path)?.prefetch_count(1);
    let topology = source.topology().clone();

    let cancel = CancelToken::new();
    let mut state = source.watch_state();
    let mut stream = source.emit(&cancel)?;
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == SourceState::Consuming),
    )
    .await
    .expect("never started consuming")
    .expect("state channel open");

    publish(&topology, &["a.1", "b.1"]).await?;

    let message: Message = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no delivery")
        .expect("stream closed");
    assert_eq!(message.routing_key(), "a.1");
    assert_eq!(message.body(), b"a.1");
    assert!(message.headers().is_none());
    assert_eq!(message.record().routing_key, "a.1");

    let message = acknowledge(false)
        .transform(message)
        .await
        .emitted()
        .expect("ack succeeded");
    assert!(message.is_acked());
    assert!(matches!(
        message.ack(false).await,
        Err(Error::AlreadyAcked { .. })
    ));

    let unexpected = tokio::time::timeout(Duration::from_millis(300), stream.next()).await;
    assert!(unexpected.is_err(), "b.1 must not be routed to the queue");

    cancel.cancel();
    stream.drain().await;
    stream.join().await
}

async fn publish(topology: &Topology, routing_keys: &[&str]) -> Result<()> {
    use lapin::options::BasicPublishOptions;
    use lapin::{BasicProperties, Connection, ConnectionProperties};

    let connection =
        Connection::connect(&topology.servers[0].url(), ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    let exchange = &topology.bindings[0].exchange.name;

    for key in routing_keys {
        channel
            .basic_publish(
                exchange,
                key,
                BasicPublishOptions::default(),
                key.as_bytes(),
                BasicProperties::default(),
            )
            .await?
            .await?;
    }
    connection.close(200, "published").await?;
    Ok(())
}
