//! Physical transports to the pulse controller.
//!
//! The board speaks the same framed ASCII protocol over three media: USB
//! serial (CDC), UDP and TCP. The [`Transport`] trait only covers moving raw
//! bytes; frame assembly, deadlines and echo validation live in the board
//! client ([`crate::board`]) so that every backend, including the test mock,
//! goes through the identical framing path.
//!
//! A transport instance is exclusively owned by one board client and carries
//! at most one request at a time: the client writes a command and then reads
//! chunks until the reply terminator arrives or the deadline expires. There
//! is no pipelining and no internal retry.

pub mod mock;
pub mod serial;
pub mod tcp;
pub mod udp;

use async_trait::async_trait;

use crate::error::Result;

pub use mock::{BoardEmulator, MockHandle, MockTransport};
pub use serial::SerialTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// Default TCP/UDP port the controller firmware listens on.
pub const DEFAULT_ETH_PORT: u16 = 7;

/// Which physical medium a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Serial,
    Udp,
    Tcp,
    Mock,
}

/// Byte-level channel to the board.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Transmit the raw command bytes.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read whatever bytes are available, waiting until at least one
    /// arrives. Chunk boundaries carry no meaning.
    async fn read_chunk(&mut self) -> Result<Vec<u8>>;

    /// Drop any stale bytes buffered from a previous exchange.
    async fn flush_input(&mut self) -> Result<()> {
        Ok(())
    }

    /// Fixed preamble length between command echo and payload in
    /// packet-mode replies on this medium.
    fn packet_preamble(&self) -> usize {
        0
    }
}
