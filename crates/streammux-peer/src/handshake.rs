use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{PeerError, Result};
use crate::node_id::{NodeId, NODE_ID_LEN};

/// Magic prefix opening every introduction block.
pub const INTRODUCTION_MAGIC: [u8; 4] = [0xE4, 0xE5, 0xF3, 0xC6];

/// Total size of the introduction block: magic + node id.
pub const INTRODUCTION_LEN: usize = 4 + NODE_ID_LEN;

/// Read the peer's introduction block within `timeout`.
///
/// A connection that fails to introduce itself (timeout, wrong magic, or a
/// truncated block) is simply dropped by the caller; no registry entry is
/// created and no callback fires.
pub async fn read_introduction<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<NodeId> {
    let mut block = [0u8; INTRODUCTION_LEN];
    match tokio::time::timeout(timeout, reader.read_exact(&mut block)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => return Err(PeerError::Io(err)),
        Err(_) => {
            debug!("peer did not introduce itself in time");
            return Err(PeerError::HandshakeTimeout);
        }
    }

    if block[..4] != INTRODUCTION_MAGIC {
        debug!("wrong introduction magic");
        return Err(PeerError::HandshakeRejected("bad magic"));
    }

    let node_id: [u8; NODE_ID_LEN] = block[4..].try_into().unwrap();
    Ok(NodeId::new(node_id))
}

/// Write the local introduction block and flush it.
pub async fn write_introduction<W: AsyncWrite + Unpin>(
    writer: &mut W,
    local_id: &NodeId,
) -> Result<()> {
    let mut block = [0u8; INTRODUCTION_LEN];
    block[..4].copy_from_slice(&INTRODUCTION_MAGIC);
    block[4..].copy_from_slice(local_id.as_bytes());
    writer.write_all(&block).await?;
    writer.flush().await?;
    Ok(())
}
