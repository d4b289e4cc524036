//! Connection-oriented channel over a connected TCP stream.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::SocketConfig;
use crate::diag::{record, Level, Recorder};
use crate::error::{Error, Result};

/// A connected stream endpoint.
///
/// Bytes arrive in transmission order; read boundaries carry no meaning.
/// Dropping the channel releases the socket on every exit path, `close()`
/// additionally flushes and performs an orderly shutdown.
pub struct StreamChannel {
    stream: TcpStream,
    local: SocketAddr,
    peer: SocketAddr,
    read_limit: usize,
    closed: bool,
    recorder: Arc<dyn Recorder>,
}

impl StreamChannel {
    pub(crate) fn new(stream: TcpStream, config: &SocketConfig) -> Result<Self> {
        let local = stream.local_addr().map_err(Error::Connection)?;
        let peer = stream.peer_addr().map_err(Error::Connection)?;
        Ok(Self {
            stream,
            local,
            peer,
            read_limit: config.read_limit,
            closed: false,
            recorder: config.recorder.clone(),
        })
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_address(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes all of `data`, waiting while the transport applies backpressure.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.stream.write_all(data).await.map_err(Error::Connection)?;
        self.stream.flush().await.map_err(Error::Connection)?;
        record!(self.recorder, Level::Trace, "{} sent {} bytes to {}", self.local, data.len(), self.peer);
        Ok(())
    }

    /// Reads at most `max_bytes` (further capped by the configured read limit).
    ///
    /// Waits for at least one byte. An empty result means the peer shut down
    /// its write side; a request for zero bytes also returns empty.
    pub async fn receive(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut buf = vec![0u8; max_bytes.min(self.read_limit)];
        if buf.is_empty() {
            return Ok(buf);
        }
        let n = self.stream.read(&mut buf).await.map_err(Error::Connection)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Reads until the peer closes the stream. May wait forever.
    pub async fn receive_to_end(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut buf = Vec::new();
        self.stream
            .read_to_end(&mut buf)
            .await
            .map_err(Error::Connection)?;
        Ok(buf)
    }

    /// Reads exactly `n` bytes.
    ///
    /// If the stream ends first the bytes collected so far are dropped and
    /// [`Error::IncompleteRead`] reports how many there were.
    pub async fn receive_exactly(&mut self, n: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = self
                .stream
                .read(&mut buf[filled..])
                .await
                .map_err(Error::Connection)?;
            if read == 0 {
                return Err(Error::IncompleteRead {
                    expected: n,
                    received: filled,
                });
            }
            filled += read;
        }
        Ok(buf)
    }

    /// Like [`receive`](Self::receive) but gives up after `deadline`.
    ///
    /// A timeout leaves the channel open and usable.
    pub async fn receive_with_timeout(&mut self, max_bytes: usize, deadline: Duration) -> Result<Vec<u8>> {
        tokio::time::timeout(deadline, self.receive(max_bytes))
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Flushes best-effort and shuts the stream down. Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Errors here mean the peer is already gone.
        let _ = self.stream.flush().await;
        let _ = self.stream.shutdown().await;
        record!(self.recorder, Level::Debug, "closed stream {} -> {}", self.local, self.peer);
    }

    /// Runs `body` with the channel and closes it afterwards, whatever `body` returned.
    pub async fn scope<R>(mut self, body: impl AsyncFnOnce(&mut StreamChannel) -> R) -> R {
        let out = body(&mut self).await;
        self.close().await;
        out
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed { Err(Error::Closed) } else { Ok(()) }
    }
}

impl fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel")
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("closed", &self.closed)
            .finish()
    }
}
