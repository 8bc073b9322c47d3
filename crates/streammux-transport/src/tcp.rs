use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Listen backlog for the peer listener.
pub const DEFAULT_BACKLOG: u32 = 128;

/// TCP listener transport.
///
/// The listening socket is opened with address and port reuse enabled so
/// that outbound dials may bind the same local port (see [`connect`]).
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on a TCP address.
    ///
    /// Binding to port 0 selects an ephemeral port; `local_addr` reports
    /// the actual bound address.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = reusable_socket(&addr).map_err(|source| TransportError::Bind {
            addr,
            source,
        })?;
        socket
            .bind(addr)
            .map_err(|source| TransportError::Bind { addr, source })?;
        let listener = socket
            .listen(DEFAULT_BACKLOG)
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening for peer connections");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next inbound connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!(%addr, "accepted connection");
        Ok((stream, addr))
    }

    /// Actual bound address of the listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Open an outbound TCP connection with a bounded timeout.
///
/// When `local` is given the socket is bound to that address before
/// connecting; combined with port reuse this lets a peer dial out from its
/// listening port. Passing `None` uses an ephemeral local port.
pub async fn connect(
    local: Option<SocketAddr>,
    remote: SocketAddr,
    timeout: Duration,
) -> Result<TcpStream> {
    let socket = reusable_socket(&remote).map_err(|source| TransportError::Connect {
        addr: remote,
        source,
    })?;
    if let Some(local) = local {
        socket
            .bind(local)
            .map_err(|source| TransportError::Bind { addr: local, source })?;
    }

    match tokio::time::timeout(timeout, socket.connect(remote)).await {
        Ok(Ok(stream)) => {
            debug!(%remote, "connected");
            Ok(stream)
        }
        Ok(Err(source)) => Err(TransportError::Connect {
            addr: remote,
            source,
        }),
        Err(_) => Err(TransportError::ConnectTimeout { addr: remote }),
    }
}

fn reusable_socket(addr: &SocketAddr) -> std::io::Result<TcpSocket> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    Ok(socket)
}
