use async_trait::async_trait;
use log::{debug, trace};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Large enough for any datagram the game sends.
pub const UDP_MAX: usize = 2048;

/// One raw datagram and when it arrived, relative to the first frame of its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub offset: Duration,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Playback clock out of range")]
    ClockOverflow,
}

/// Anything frames can be pulled from: a live socket or a recording.
///
/// Implementations must be cancel safe, a `next` future dropped before completion loses no frame.
#[async_trait]
pub trait FrameSource: Send {
    /// `Ok(None)` once the source is exhausted.
    async fn next(&mut self) -> Result<Option<Frame>, SourceError>;

    fn describe(&self) -> String;
}

/// Frames arriving on a bound UDP socket. Never exhausted.
#[derive(Debug)]
pub struct UdpSource {
    socket: UdpSocket,
    local_addr: SocketAddr,
    first_frame: Option<Instant>,
    buffer: Vec<u8>,
}

impl UdpSource {
    pub async fn bind(addr: SocketAddr) -> Result<UdpSource, SourceError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| SourceError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;
        debug!("Listening for telemetry on {}", local_addr);
        Ok(UdpSource {
            socket,
            local_addr,
            first_frame: None,
            buffer: vec![0u8; UDP_MAX],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl FrameSource for UdpSource {
    async fn next(&mut self) -> Result<Option<Frame>, SourceError> {
        // recv_from is cancel safe, nothing is consumed until it resolves
        let (size, peer) = self.socket.recv_from(&mut self.buffer).await?;
        let now = Instant::now();
        let first = *self.first_frame.get_or_insert(now);
        trace!("{} bytes from {}", size, peer);
        Ok(Some(Frame {
            offset: now.duration_since(first),
            bytes: self.buffer[..size].to_vec(),
        }))
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.local_addr)
    }
}
