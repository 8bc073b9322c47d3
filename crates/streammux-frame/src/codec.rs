use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Width of the frame length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 32;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode a payload length into the wire prefix.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────┬──────────────────┐
/// │ Length (32B, big-endian) │ Payload          │
/// │ zero-padded              │ (Length bytes)   │
/// └──────────────────────────┴──────────────────┘
/// ```
pub fn encode_length(len: u64) -> [u8; LENGTH_PREFIX_SIZE] {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix[LENGTH_PREFIX_SIZE - 8..].copy_from_slice(&len.to_be_bytes());
    prefix
}

/// Decode a wire prefix into a payload length.
///
/// The prefix is wide enough to express lengths no allocator could satisfy;
/// any value beyond `u64` is rejected outright.
pub fn decode_length(prefix: &[u8; LENGTH_PREFIX_SIZE]) -> Result<u64> {
    if prefix[..LENGTH_PREFIX_SIZE - 8].iter().any(|&b| b != 0) {
        return Err(FrameError::LengthOverflow);
    }
    let tail: [u8; 8] = prefix[LENGTH_PREFIX_SIZE - 8..].try_into().unwrap();
    Ok(u64::from_be_bytes(tail))
}

/// Encode a complete frame (prefix + payload) into a buffer.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_slice(&encode_length(payload.len() as u64));
    dst.put_slice(payload);
}

/// Configuration for frame reading and writing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_roundtrip() {
        for len in [0u64, 1, 9048, 65536, u64::from(u32::MAX) + 1] {
            let prefix = encode_length(len);
            assert_eq!(decode_length(&prefix).unwrap(), len);
        }
    }

    #[test]
    fn prefix_is_big_endian_and_zero_padded() {
        let prefix = encode_length(0x0102);
        assert!(prefix[..30].iter().all(|&b| b == 0));
        assert_eq!(prefix[30], 0x01);
        assert_eq!(prefix[31], 0x02);
    }

    #[test]
    fn nonzero_high_bytes_rejected() {
        let mut prefix = encode_length(1);
        prefix[0] = 0x01;
        assert!(matches!(
            decode_length(&prefix),
            Err(FrameError::LengthOverflow)
        ));
    }

    #[test]
    fn frame_wire_size() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf);
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + 5);
        assert_eq!(&buf[LENGTH_PREFIX_SIZE..], b"hello");
    }

    #[test]
    fn empty_frame_is_prefix_only() {
        let mut buf = BytesMut::new();
        encode_frame(b"", &mut buf);
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
