//! UDP datagram transport.
//!
//! Connectionless: one datagram out per command, then datagrams are received
//! and accumulated until the reply terminator shows up. Lost packets are not
//! retried; the exchange fails with a timeout if the terminator never
//! arrives. Packet-mode replies over UDP carry a fixed 7-byte preamble
//! between the command echo and the sample payload.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::Result;
use crate::transport::{Transport, TransportKind};

const RECV_BUF_SIZE: usize = 1024;

/// Preamble bytes ahead of the sample payload in UDP packet replies.
const UDP_PACKET_PREAMBLE: usize = 7;

pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral local socket directed at the board.
    pub async fn connect(peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(peer).await?;
        log::debug!("UDP transport directed at {}", peer);
        Ok(Self { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.socket.send(bytes).await?;
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; RECV_BUF_SIZE];
        let n = self.socket.recv(&mut buf).await?;
        Ok(buf[..n].to_vec())
    }

    fn packet_preamble(&self) -> usize {
        UDP_PACKET_PREAMBLE
    }
}
