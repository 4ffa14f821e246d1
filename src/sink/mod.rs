//! Terminal stages.

use async_trait::async_trait;

use crate::error::Result;

pub mod writer;

/// Consumes the items leaving a pipeline.
#[async_trait]
pub trait Sink<T: Send + 'static>: Send {
    async fn write(&mut self, item: T) -> Result<()>;

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
