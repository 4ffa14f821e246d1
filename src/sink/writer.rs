use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::sink::Sink;

pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Render<T> = Arc<dyn Fn(&T) -> Result<Bytes> + Send + Sync>;
type Accept<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Open an output target.
///
/// `-` is standard output. Any other non-empty path is opened write-only,
/// created with mode `0600` if missing, and either truncated or appended to.
pub async fn open_writer(path: impl AsRef<Path>, truncate: bool) -> Result<BoxWriter> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(Error::config("output path is empty"));
    }
    if path == Path::new("-") {
        return Ok(Box::new(tokio::io::stdout()));
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if truncate {
        options.truncate(true);
    } else {
        options.append(true);
    }
    #[cfg(unix)]
    options.mode(0o600);

    let file = options.open(path).await?;
    Ok(Box::new(file))
}

/// Render one item as a JSON document followed by a newline.
pub fn json_lines<T: Serialize>(item: &T) -> Result<Bytes> {
    let mut buf = serde_json::to_vec(item)?;
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

/// Render one item with its `Display` impl followed by a newline.
pub fn display_lines<T: Display>(item: &T) -> Result<Bytes> {
    Ok(Bytes::from(format!("{item}\n")))
}

/// Writes rendered items to an [`AsyncWrite`], optionally skipping items
/// the `accept` predicate rejects.
pub struct WriterSink<T> {
    writer: BoxWriter,
    render: Render<T>,
    accept: Option<Accept<T>>,
    written: u64,
    rejected: u64,
}

impl<T> WriterSink<T> {
    pub fn new<R>(writer: BoxWriter, render: R) -> Self
    where
        R: Fn(&T) -> Result<Bytes> + Send + Sync + 'static,
    {
        Self {
            writer,
            render: Arc::new(render),
            accept: None,
            written: 0,
            rejected: 0,
        }
    }

    /// [`open_writer`] followed by [`WriterSink::new`].
    pub async fn open<R>(path: impl AsRef<Path>, truncate: bool, render: R) -> Result<Self>
    where
        R: Fn(&T) -> Result<Bytes> + Send + Sync + 'static,
    {
        Ok(Self::new(open_writer(path, truncate).await?, render))
    }

    /// Only write items for which `pred` holds. Without a predicate every
    /// item is written.
    pub fn accept<P>(mut self, pred: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.accept = Some(Arc::new(pred));
        self
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

#[async_trait]
impl<T: Send + 'static> Sink<T> for WriterSink<T> {
    async fn write(&mut self, item: T) -> Result<()> {
        if let Some(accept) = &self.accept {
            if !accept(&item) {
                self.rejected += 1;
                return Ok(());
            }
        }

        let payload = (self.render)(&item)?;
        self.writer.write_all(&payload).await?;
        self.written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}
