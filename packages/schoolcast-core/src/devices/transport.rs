//! Fire-and-forget delivery of command frames to the receiver.
//!
//! The receiver protocol has no acknowledgment. A "sent" outcome only means
//! the datagram left this host.

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::devices::packet::CommandPacket;

/// Best-effort delivery result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed(String),
}

/// Trait for delivering built frames.
///
/// Implementations never return errors; failures are reported in the
/// outcome and logged by the caller.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send(&self, packet: &CommandPacket) -> SendOutcome;
}

/// UDP transport bound to an ephemeral local port.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds an unspecified IPv4 address on an ephemeral port.
    pub async fn bind() -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        log::info!(
            "[Transport] UDP socket bound on {}",
            socket.local_addr()?
        );
        Ok(Self { socket })
    }
}

#[async_trait]
impl CommandTransport for UdpTransport {
    async fn send(&self, packet: &CommandPacket) -> SendOutcome {
        log::debug!(
            "[Transport] {} -> {}: {}",
            packet.target,
            packet.destination,
            packet.hex()
        );
        match self.socket.send_to(&packet.bytes, packet.destination).await {
            Ok(n) if n == packet.bytes.len() => SendOutcome::Sent,
            Ok(n) => SendOutcome::Failed(format!(
                "short send: {} of {} bytes",
                n,
                packet.bytes.len()
            )),
            Err(e) => SendOutcome::Failed(e.to_string()),
        }
    }
}
