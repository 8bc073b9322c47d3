use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::{encode_length, FrameConfig};
use crate::error::{FrameError, Result};

/// Writes complete frames to any async byte stream.
pub struct FrameWriter<W> {
    inner: W,
    config: FrameConfig,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: W, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Encode and send one payload as a frame.
    ///
    /// The length prefix and the body are flushed separately, so a peer
    /// reading the prefix can start sizing its buffer before the body lands.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.inner
            .write_all(&encode_length(payload.len() as u64))
            .await?;
        self.inner.flush().await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        trace!(len = payload.len(), "wrote frame");
        Ok(())
    }

    /// Shut down the underlying stream for writing.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(FrameError::Io)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
