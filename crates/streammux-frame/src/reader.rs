use std::io::ErrorKind;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::codec::{decode_length, FrameConfig, LENGTH_PREFIX_SIZE};
use crate::error::{FrameError, Result};

/// Maximum bytes pulled from the transport in one read call.
pub const READ_CHUNK_SIZE: usize = 9048;

/// Reads complete frames from any async byte stream.
///
/// Handles partial reads internally — callers always get complete payloads.
pub struct FrameReader<R> {
    inner: R,
    config: FrameConfig,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the peer closes the
    /// stream, whether before a length prefix or mid-body.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        if let Err(err) = self.inner.read_exact(&mut prefix).await {
            if err.kind() == ErrorKind::UnexpectedEof {
                return Err(FrameError::ConnectionClosed);
            }
            return Err(FrameError::Io(err));
        }

        let len = decode_length(&prefix)?;
        if len > self.config.max_payload_size as u64 {
            return Err(FrameError::PayloadTooLarge {
                size: len as usize,
                max: self.config.max_payload_size,
            });
        }

        let mut remaining = len as usize;
        let mut body = BytesMut::with_capacity(remaining.min(READ_CHUNK_SIZE));
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(READ_CHUNK_SIZE);
            let read = self.inner.read(&mut chunk[..want]).await?;
            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }
            body.extend_from_slice(&chunk[..read]);
            remaining -= read;
        }

        trace!(len, "read frame");
        Ok(body.freeze())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode_frame, encode_length};
    use crate::writer::FrameWriter;

    #[tokio::test]
    async fn read_single_frame() {
        let mut wire = BytesMut::new();
        encode_frame(b"hello", &mut wire);

        let mut reader = FrameReader::new(&wire[..]);
        let payload = reader.read_frame().await.unwrap();
        assert_eq!(payload.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn read_multiple_frames() {
        let mut wire = BytesMut::new();
        encode_frame(b"one", &mut wire);
        encode_frame(b"two", &mut wire);
        encode_frame(b"three", &mut wire);

        let mut reader = FrameReader::new(&wire[..]);
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"one");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"two");
        assert_eq!(reader.read_frame().await.unwrap().as_ref(), b"three");
    }

    #[tokio::test]
    async fn read_empty_frame() {
        let mut wire = BytesMut::new();
        encode_frame(b"", &mut wire);

        let mut reader = FrameReader::new(&wire[..]);
        let payload = reader.read_frame().await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn read_frame_spanning_multiple_chunks() {
        let payload = vec![0xAB; READ_CHUNK_SIZE * 3 + 17];
        let mut wire = BytesMut::new();
        encode_frame(&payload, &mut wire);

        let mut reader = FrameReader::new(&wire[..]);
        let got = reader.read_frame().await.unwrap();
        assert_eq!(got.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn connection_closed_before_prefix() {
        let mut reader = FrameReader::new(&[][..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connection_closed_mid_prefix() {
        let wire = encode_length(4);
        let mut reader = FrameReader::new(&wire[..12]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connection_closed_mid_body() {
        let mut wire = BytesMut::new();
        encode_frame(b"full-payload", &mut wire);
        wire.truncate(LENGTH_PREFIX_SIZE + 4);

        let mut reader = FrameReader::new(&wire[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let wire = encode_length(1024);
        let cfg = FrameConfig {
            max_payload_size: 16,
        };
        let mut reader = FrameReader::with_config(&wire[..], cfg);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn overflowing_prefix_rejected() {
        let mut wire = encode_length(1);
        wire[3] = 0xFF;
        let mut reader = FrameReader::new(&wire[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::LengthOverflow));
    }

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let send = tokio::spawn(async move {
            writer.send(b"ping").await.unwrap();
            writer
        });

        let payload = reader.read_frame().await.unwrap();
        assert_eq!(payload.as_ref(), b"ping");
        send.await.unwrap();
    }

    #[tokio::test]
    async fn roundtrip_large_payload_over_duplex() {
        let payload = vec![0x42u8; 65536];
        let expected = payload.clone();
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let send = tokio::spawn(async move {
            writer.send(&payload).await.unwrap();
        });

        let got = reader.read_frame().await.unwrap();
        assert_eq!(got.as_ref(), expected.as_slice());
        send.await.unwrap();
    }
}
