//! AMQP 0-9-1 consumer source.
//!
//! The topology document ([`topology::Topology`]) is always available; the
//! broker client itself sits behind the `amqp` feature.

pub mod topology;

#[cfg(feature = "amqp")]
mod consumer;

#[cfg(feature = "amqp")]
pub use consumer::{AmqpSource, Message, MessageRecord, SourceState};

/// Connection name and consumer tag used when the topology leaves them empty.
pub const DEFAULT_CLIENT_ID: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
