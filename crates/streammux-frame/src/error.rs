use std::io::ErrorKind;

/// Errors that can occur while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The length prefix encodes a value beyond the representable range.
    #[error("frame length prefix overflows u64")]
    LengthOverflow,

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True if the error is a connection reset or broken pipe.
    ///
    /// The send path uses this to decide whether a redial is worth trying.
    pub fn is_reset(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if matches!(err.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe)
        )
    }

    /// True if the peer is gone, whether by clean close or reset.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FrameError::ConnectionClosed) || self.is_reset()
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
