//! Length-prefixed message framing for streammux peer streams.
//!
//! Every message on a peer connection is one frame:
//! - A 32-byte big-endian unsigned payload length
//! - Exactly that many payload bytes
//!
//! No checksum, no compression, no multiplexing tag; one frame occupies
//! the whole connection until fully read. Partial reads and writes are
//! handled internally, so callers always see complete frames.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_length, encode_frame, encode_length, FrameConfig, DEFAULT_MAX_PAYLOAD,
    LENGTH_PREFIX_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::{FrameReader, READ_CHUNK_SIZE};
pub use writer::FrameWriter;
