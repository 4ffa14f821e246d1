use std::fmt::Display;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("pipeline error: {context}")]
    Pipeline { context: &'static str },

    #[error("stage `{stage}` failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("delivery {delivery_tag} already acknowledged")]
    AlreadyAcked { delivery_tag: u64 },

    #[cfg(feature = "amqp")]
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn pipeline(context: &'static str) -> Self {
        Self::Pipeline { context }
    }

    pub fn stage(stage: &'static str, message: impl Display) -> Self {
        Self::Stage {
            stage,
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Errors that reconnecting cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
