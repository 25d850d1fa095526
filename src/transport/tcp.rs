//! TCP transport.
//!
//! The firmware's TCP service accepts one command per connection, so a fresh
//! connection is made for every write and the reply is read from it. Unlike
//! the firmware's reference client, replies are still accumulated through
//! the shared framing loop, so a reply split across several segments is
//! reassembled instead of truncated at the first `recv`.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, SwitchError};
use crate::transport::{Transport, TransportKind};

const RECV_BUF_SIZE: usize = 1024;

pub struct TcpTransport {
    peer: SocketAddr,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer, stream: None }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut stream = TcpStream::connect(self.peer).await?;
        stream.write_all(bytes).await?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            SwitchError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no TCP exchange in progress",
            ))
        })?;
        let mut buf = [0u8; RECV_BUF_SIZE];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            self.stream = None;
            return Err(SwitchError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "TCP connection closed by the board",
            )));
        }
        Ok(buf[..n].to_vec())
    }

    async fn flush_input(&mut self) -> Result<()> {
        // Each command gets a fresh connection; dropping the previous stream
        // discards anything the board may still have queued on it.
        self.stream = None;
        Ok(())
    }
}
