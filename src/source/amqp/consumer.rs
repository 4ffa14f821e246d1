use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::tcp::OwnedTLSConfig;
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use serde::Serialize;
use tokio::sync::mpsc::Sender;
use tokio::sync::watch;

use super::topology::{ExchangeKind, TlsConfig, Topology};
use super::DEFAULT_CLIENT_ID;
use crate::error::{Error, Result};
use crate::pipeline::ack::{AckOnce, Acknowledgeable};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::retry::ReconnectPolicy;
use crate::source::{Lifecycle, Source, SourceStream};

const REPLY_SUCCESS: u16 = 200;
const DEFAULT_RESEND_DELAY: Duration = Duration::from_secs(5);

/// Lifecycle of the consuming task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Connecting,
    Consuming,
    Reconnecting,
    Terminating,
}

/// One broker delivery, acknowledgeable at most once.
pub struct Message {
    delivery: Delivery,
    acked: AckOnce,
}

/// Serializable projection of a [`Message`]. The body is decoded lossily as
/// UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub body: String,
}

impl Message {
    fn new(delivery: Delivery) -> Self {
        Self {
            delivery,
            acked: AckOnce::new(),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery.delivery_tag
    }

    pub fn exchange(&self) -> &str {
        self.delivery.exchange.as_str()
    }

    pub fn routing_key(&self) -> &str {
        self.delivery.routing_key.as_str()
    }

    pub fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    pub fn headers(&self) -> Option<&FieldTable> {
        self.delivery.properties.headers().as_ref()
    }

    pub fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    /// Whether an acknowledgement was attempted. The flag is set before the
    /// broker answers, so it stays `true` after an ack that failed; such a
    /// delivery is redelivered once the channel closes.
    pub fn is_acked(&self) -> bool {
        self.acked.is_claimed()
    }

    pub fn record(&self) -> MessageRecord {
        MessageRecord {
            delivery_tag: self.delivery_tag(),
            exchange: self.exchange().to_owned(),
            routing_key: self.routing_key().to_owned(),
            redelivered: self.redelivered(),
            body: String::from_utf8_lossy(self.body()).into_owned(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("delivery_tag", &self.delivery_tag())
            .field("exchange", &self.exchange())
            .field("routing_key", &self.routing_key())
            .field("redelivered", &self.redelivered())
            .field("body_len", &self.body().len())
            .field("acked", &self.is_acked())
            .finish()
    }
}

#[async_trait]
impl Acknowledgeable for Message {
    type Handle = Delivery;

    async fn ack(&self, multiple: bool) -> Result<()> {
        self.acked.try_claim(self.delivery_tag())?;
        self.delivery
            .acker
            .ack(BasicAckOptions { multiple })
            .await?;
        Ok(())
    }

    fn back_ref(&self) -> &Delivery {
        &self.delivery
    }
}

/// Consumes one queue, declared and bound per a [`Topology`], and emits its
/// deliveries one at a time.
///
/// Connection failures are retried with a fixed delay; configuration
/// problems discovered while connecting (an unreadable CA file) end the
/// stream.
pub struct AmqpSource {
    topology: Arc<Topology>,
    prefetch_count: u16,
    prefetch_size: u32,
    reconnect: ReconnectPolicy,
    resend: ReconnectPolicy,
    state: Arc<watch::Sender<SourceState>>,
    lifecycle: Lifecycle,
}

impl AmqpSource {
    pub fn new(topology: Topology) -> Result<Self> {
        topology.validate()?;
        let (state, _) = watch::channel(SourceState::Idle);
        Ok(Self {
            topology: Arc::new(topology),
            prefetch_count: 0,
            prefetch_size: 0,
            reconnect: ReconnectPolicy::default(),
            resend: ReconnectPolicy::new(DEFAULT_RESEND_DELAY),
            state: Arc::new(state),
            lifecycle: Lifecycle::default(),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Topology::load(path)?)
    }

    /// Maximum unacknowledged deliveries in flight; 0 means unlimited.
    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = count;
        self
    }

    /// Accepted for configuration compatibility. The broker client only
    /// transmits the prefetch count.
    pub fn prefetch_size(mut self, size: u32) -> Self {
        self.prefetch_size = size;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect = self.reconnect.with_delay(delay);
        self
    }

    /// Delay before re-opening a channel whose declarations failed.
    pub fn resend_delay(mut self, delay: Duration) -> Self {
        self.resend = self.resend.with_delay(delay);
        self
    }

    /// Bound consecutive failed connection attempts; `None` retries forever.
    pub fn max_reconnects(mut self, max: Option<u32>) -> Self {
        self.reconnect = self.reconnect.max_attempts(max);
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn client_id(&self) -> &str {
        non_empty_or_default(&self.topology.client.id)
    }

    pub fn consumer_tag(&self) -> &str {
        non_empty_or_default(&self.topology.client.tag)
    }

    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }
}

impl Source for AmqpSource {
    type Item = Message;

    fn emit(&self, cancel: &CancelToken) -> Result<SourceStream<Message>> {
        let token = self.lifecycle.begin(cancel)?;

        #[cfg(feature = "tracing")]
        for server in &self.topology.servers {
            if let Some(tls) = server.tls.as_ref().filter(|tls| tls.enabled) {
                if tls.skip_verify || tls.private_key.is_some() || tls.certificate.is_some() {
                    tracing::event!(tracing::Level::WARN, event = "brokerpipe.amqp.tls_ignored", server = %server.redacted_url(), "skipverify and client certificates are not supported; only cacert is used");
                }
            }
        }

        let session = ConsumeTask {
            topology: Arc::clone(&self.topology),
            client_id: self.client_id().to_owned(),
            consumer_tag: self.consumer_tag().to_owned(),
            prefetch_count: self.prefetch_count,
            prefetch_size: self.prefetch_size,
            reconnect: self.reconnect.clone(),
            resend: self.resend.clone(),
            state: Arc::clone(&self.state),
        };

        Ok(SourceStream::spawn("amqp_source", token, move |output, cancel| {
            session.run(output, cancel)
        }))
    }

    fn close(&self) -> Result<()> {
        self.lifecycle.close();
        Ok(())
    }
}

fn non_empty_or_default(value: &str) -> &str {
    if value.trim().is_empty() {
        DEFAULT_CLIENT_ID
    } else {
        value
    }
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

fn tls_config(tls: &TlsConfig) -> Result<OwnedTLSConfig> {
    let cert_chain = match &tls.ca_cert {
        Some(path) => Some(std::fs::read_to_string(path).map_err(|err| {
            Error::config(format!("cacert {}: {err}", path.display()))
        })?),
        None => None,
    };
    Ok(OwnedTLSConfig {
        cert_chain,
        ..OwnedTLSConfig::default()
    })
}

struct Session {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

impl Session {
    async fn close(self) {
        let _ = self.channel.close(REPLY_SUCCESS, "consumer closing").await;
        let _ = self.connection.close(REPLY_SUCCESS, "consumer closing").await;
    }
}

enum OpenFailure {
    Connect(Error),
    Declare(Error),
}

enum ConsumeExit {
    Stop,
    Transport(Error),
}

struct ConsumeTask {
    topology: Arc<Topology>,
    client_id: String,
    consumer_tag: String,
    prefetch_count: u16,
    prefetch_size: u32,
    reconnect: ReconnectPolicy,
    resend: ReconnectPolicy,
    state: Arc<watch::Sender<SourceState>>,
}

impl ConsumeTask {
    fn transition(&self, next: SourceState) {
        let _prev = self.state.send_replace(next);
        #[cfg(feature = "tracing")]
        tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.source.state", stage = "amqp_source", from = ?_prev, to = ?next, "brokerpipe.source.state");
    }

    async fn run(self, output: Sender<Message>, cancel: CancelToken) {
        self.transition(SourceState::Connecting);
        let mut failures = 0_u32;

        loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                opened = self.open() => opened,
            };

            let policy = match opened {
                Ok(mut session) => {
                    failures = 0;
                    self.transition(SourceState::Consuming);
                    let exit = self.consume(&mut session, &output, &cancel).await;
                    session.close().await;
                    match exit {
                        ConsumeExit::Stop => break,
                        ConsumeExit::Transport(_error) => {
                            #[cfg(feature = "tracing")]
                            tracing::event!(tracing::Level::WARN, event = "brokerpipe.amqp.transport", error = %_error, "brokerpipe.amqp.transport");
                        }
                    }
                    &self.reconnect
                }
                Err(OpenFailure::Connect(error)) if error.is_fatal() => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::ERROR, event = "brokerpipe.amqp.fatal", error = %error, "brokerpipe.amqp.fatal");
                    #[cfg(not(feature = "tracing"))]
                    let _ = error;
                    break;
                }
                Err(OpenFailure::Connect(_error)) => {
                    failures += 1;
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::WARN, event = "brokerpipe.amqp.connect_failed", failures = failures, error = %_error, "brokerpipe.amqp.connect_failed");
                    &self.reconnect
                }
                Err(OpenFailure::Declare(_error)) => {
                    failures += 1;
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::WARN, event = "brokerpipe.amqp.declare_failed", failures = failures, error = %_error, "brokerpipe.amqp.declare_failed");
                    &self.resend
                }
            };

            if !self.reconnect.allows(failures) {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::ERROR, event = "brokerpipe.amqp.gave_up", failures = failures, "brokerpipe.amqp.gave_up");
                break;
            }

            self.transition(SourceState::Reconnecting);
            #[cfg(feature = "tracing")]
            tracing::event!(tracing::Level::INFO, event = "brokerpipe.amqp.reconnect", delay_ms = policy.delay().as_millis() as u64, "brokerpipe.amqp.reconnect");
            if !policy.wait(&cancel).await {
                break;
            }
            self.transition(SourceState::Connecting);
        }

        self.transition(SourceState::Terminating);
    }

    async fn open(&self) -> std::result::Result<Session, OpenFailure> {
        let connection = self.connect().await.map_err(OpenFailure::Connect)?;
        match self.declare(&connection).await {
            Ok((channel, consumer)) => Ok(Session {
                connection,
                channel,
                consumer,
            }),
            Err(error) => {
                let _ = connection.close(REPLY_SUCCESS, "declare failed").await;
                Err(OpenFailure::Declare(error))
            }
        }
    }

    /// Try each configured server in order.
    async fn connect(&self) -> Result<Connection> {
        let mut last_error = None;

        for server in &self.topology.servers {
            let url = server.url();
            let properties =
                ConnectionProperties::default().with_connection_name(self.client_id.clone().into());

            let connected = match server.tls.as_ref().filter(|tls| tls.enabled) {
                Some(tls) => {
                    Connection::connect_with_config(&url, properties, tls_config(tls)?).await
                }
                None => Connection::connect(&url, properties).await,
            };

            match connected {
                Ok(connection) => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::INFO, event = "brokerpipe.amqp.connected", server = %server.redacted_url(), "brokerpipe.amqp.connected");
                    return Ok(connection);
                }
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.amqp.server_unreachable", server = %server.redacted_url(), error = %err, "brokerpipe.amqp.server_unreachable");
                    last_error = Some(Error::from(err));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::config("no servers configured")))
    }

    async fn declare(&self, connection: &Connection) -> Result<(Channel, Consumer)> {
        let channel = connection.create_channel().await?;

        #[cfg(feature = "tracing")]
        if self.prefetch_size != 0 {
            tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.amqp.prefetch_size_ignored", prefetch_size = self.prefetch_size, "brokerpipe.amqp.prefetch_size_ignored");
        }
        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await?;

        for binding in &self.topology.bindings {
            let exchange = &binding.exchange;
            if !exchange.declare {
                continue;
            }
            channel
                .exchange_declare(
                    &exchange.name,
                    exchange_kind(exchange.kind),
                    ExchangeDeclareOptions {
                        durable: exchange.durable,
                        auto_delete: exchange.auto_delete,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        let queue = &self.topology.queue;
        if queue.declare {
            channel
                .queue_declare(
                    &queue.name,
                    QueueDeclareOptions {
                        durable: queue.durable,
                        exclusive: queue.exclusive,
                        auto_delete: queue.auto_delete,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        for binding in &self.topology.bindings {
            for key in &binding.routing_keys {
                channel
                    .queue_bind(
                        &queue.name,
                        &binding.exchange.name,
                        key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
            }
        }

        let consumer = channel
            .basic_consume(
                &queue.name,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok((channel, consumer))
    }

    async fn consume(
        &self,
        session: &mut Session,
        output: &Sender<Message>,
        cancel: &CancelToken,
    ) -> ConsumeExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.cancelled", stage = "amqp_source", where_ = "recv", "brokerpipe.cancelled");
                    return ConsumeExit::Stop;
                },
                next = session.consumer.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => return ConsumeExit::Transport(err.into()),
                None => return ConsumeExit::Transport(Error::pipeline("consumer stream ended")),
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "brokerpipe.cancelled", stage = "amqp_source", where_ = "send", "brokerpipe.cancelled");
                    return ConsumeExit::Stop;
                },
                sent = output.send(Message::new(delivery)) => {
                    if sent.is_err() {
                        #[cfg(feature = "tracing")]
                        tracing::event!(tracing::Level::INFO, event = "brokerpipe.downstream.closed", stage = "amqp_source", "brokerpipe.downstream.closed");
                        return ConsumeExit::Stop;
                    }
                }
            }
        }
    }
}
