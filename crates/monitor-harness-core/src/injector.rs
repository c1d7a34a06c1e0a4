//! Trap injection towards the agent's trap listener.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::snmp::TrapSpec;

/// Sends encoded traps as single datagrams to `127.0.0.1:<port>`.
///
/// Fire-and-forget: nothing is awaited after the send, and a failed send is
/// not retried.
#[derive(Debug)]
pub struct EventInjector {
    socket: UdpSocket,
}

impl EventInjector {
    /// Bind the sending socket on an ephemeral loopback port.
    pub async fn bind() -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| HarnessError::io("binding trap injection socket", e))?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| HarnessError::io("reading trap injection address", e))
    }

    /// Encode `trap` and send it to the listener on `port`.
    pub async fn send_event(&self, port: u16, trap: &TrapSpec) -> Result<()> {
        let datagram = trap.encode()?;
        let sent = self
            .socket
            .send_to(&datagram, (Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| HarnessError::io(format!("sending trap to port {port}"), e))?;
        if sent != datagram.len() {
            return Err(HarnessError::io(
                format!("sending trap to port {port}"),
                std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short datagram: {sent} of {} bytes", datagram.len()),
                ),
            ));
        }
        debug!(port, version = ?trap.version, generic = ?trap.generic, "trap sent");
        Ok(())
    }
}
