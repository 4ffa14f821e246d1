//! Declarative broker topology: which servers to reach, which exchanges and
//! queue to declare, and how the queue is bound.
//!
//! The document reads the same from JSON and YAML:
//!
//! ```yaml
//! client: { id: ingest-1, tag: ingest }
//! servers:
//!   - { address: localhost, port: 5672, username: guest, password: guest }
//! queue: { name: events, durable: true, declare: true, exclusive: false, autodelete: false }
//! bindings:
//!   - exchange: { name: events, type: topic, durable: true, declare: true, autodelete: false }
//!     routingkeys: ["a.#"]
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub client: ClientConfig,
    pub servers: Vec<ServerConfig>,
    pub queue: QueueConfig,
    pub bindings: Vec<BindingConfig>,
}

/// Connection name and consumer tag. Empty values fall back to the crate's
/// build identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, rename = "tlsinfo", skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub enabled: bool,
    #[serde(default, rename = "skipverify")]
    pub skip_verify: bool,
    #[serde(default, rename = "cacert", skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
    #[serde(default, rename = "privatekey", skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub durable: bool,
    pub declare: bool,
    pub exclusive: bool,
    #[serde(rename = "autodelete")]
    pub auto_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub exchange: ExchangeConfig,
    #[serde(rename = "routingkeys")]
    pub routing_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ExchangeKind,
    pub durable: bool,
    pub declare: bool,
    #[serde(rename = "autodelete")]
    pub auto_delete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExchangeKind {
    Fanout,
    Topic,
    Direct,
    Headers,
}

impl ExchangeKind {
    pub const ALL: [ExchangeKind; 4] = [
        ExchangeKind::Fanout,
        ExchangeKind::Topic,
        ExchangeKind::Direct,
        ExchangeKind::Headers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ExchangeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::config(format!("unknown exchange type {s:?}")))
    }
}

impl TryFrom<String> for ExchangeKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ExchangeKind> for String {
    fn from(kind: ExchangeKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|tls| tls.enabled)
    }

    /// `amqp[s]://[user:pass@]host:port/`. Credentials are embedded only
    /// when both are present.
    pub fn url(&self) -> String {
        let scheme = if self.tls_enabled() { "amqps" } else { "amqp" };
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!(
                "{scheme}://{user}:{pass}@{}:{}/",
                self.address, self.port
            ),
            _ => format!("{scheme}://{}:{}/", self.address, self.port),
        }
    }

    /// [`ServerConfig::url`] with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        let scheme = if self.tls_enabled() { "amqps" } else { "amqp" };
        match (&self.username, &self.password) {
            (Some(user), Some(_)) => {
                format!("{scheme}://{user}:***@{}:{}/", self.address, self.port)
            }
            _ => format!("{scheme}://{}:{}/", self.address, self.port),
        }
    }
}

impl Topology {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let topology: Topology = serde_json::from_str(s)?;
        topology.validate()?;
        Ok(topology)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let topology: Topology = serde_yaml::from_str(s)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Read a `.json`, `.yaml` or `.yml` document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => Err(Error::config(format!(
                "unsupported topology format: {}",
                path.display()
            ))),
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::config("at least one server is required"));
        }
        for (i, server) in self.servers.iter().enumerate() {
            if server.address.trim().is_empty() {
                return Err(Error::config(format!("servers[{i}]: address is required")));
            }
            if server.port == 0 {
                return Err(Error::config(format!(
                    "servers[{i}]: port must be in 1..=65535"
                )));
            }
        }

        if self.queue.name.trim().is_empty() {
            return Err(Error::config("queue.name is required"));
        }

        for (i, binding) in self.bindings.iter().enumerate() {
            if binding.exchange.name.trim().is_empty() {
                return Err(Error::config(format!(
                    "bindings[{i}]: exchange.name is required"
                )));
            }
            if binding.routing_keys.is_empty() {
                return Err(Error::config(format!(
                    "bindings[{i}]: at least one routing key is required"
                )));
            }
        }
        Ok(())
    }
}
