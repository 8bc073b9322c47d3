use std::net::SocketAddr;
use std::time::Duration;

use streammux_frame::FrameConfig;

use crate::node_id::NodeId;

/// Configuration for a [`StreamService`](crate::service::StreamService).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// This node's id, sent in every introduction block.
    pub local_id: NodeId,
    /// Address the stream listener binds to. Port 0 selects an ephemeral
    /// port.
    pub bind_addr: SocketAddr,
    /// Proactively dial peers reported by the composition layer.
    pub always_connect: bool,
    /// How long an accepted connection may take to introduce itself.
    pub handshake_timeout: Duration,
    /// How long an outbound dial may take to connect.
    pub dial_timeout: Duration,
    /// Pause before redialing after a send hits a reset connection.
    pub retry_cooldown: Duration,
    /// Maximum physical write attempts per logical send.
    pub max_send_attempts: u8,
    /// Framing limits applied to every connection.
    pub frame: FrameConfig,
}

impl StreamConfig {
    /// Configuration with the protocol's default timeouts and limits.
    pub fn new(local_id: NodeId, bind_addr: SocketAddr) -> Self {
        Self {
            local_id,
            bind_addr,
            always_connect: false,
            handshake_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(10),
            retry_cooldown: Duration::from_secs(3),
            max_send_attempts: 3,
            frame: FrameConfig::default(),
        }
    }

    /// Dial peers as soon as the composition layer reports them.
    pub fn with_always_connect(mut self, always_connect: bool) -> Self {
        self.always_connect = always_connect;
        self
    }

    /// Override the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Override the dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Override the send-retry cooldown.
    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    /// Override framing limits.
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }
}
