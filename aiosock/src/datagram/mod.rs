//! Connectionless channel.
//!
//! A background receive loop plays the role of the transport's delivery
//! callback and feeds a [`DatagramBridge`]; `receive` pulls from the bridge.
//! Sends are handed to a background send loop so `send_to` never waits.
//! Transport errors from either loop are latched in the bridge and surfaced
//! by the next `receive` or `send_to`.

mod bridge;

pub use bridge::{DatagramBridge, Envelope};

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SocketConfig;
use crate::diag::{record, Level, Recorder};
use crate::error::{Error, Result};
use crate::MAX_DATAGRAM_SIZE;

struct Outgoing {
    payload: Vec<u8>,
    target: Option<SocketAddr>,
}

pub struct DatagramChannel {
    bridge: Arc<DatagramBridge>,
    outbox: Option<mpsc::UnboundedSender<Outgoing>>,
    receiver: JoinHandle<()>,
    local: SocketAddr,
    remote: Option<SocketAddr>,
    /// The closing sentinel has been handed to the caller.
    finished: bool,
    reported_overflow: u64,
    recorder: Arc<dyn Recorder>,
}

impl DatagramChannel {
    /// Wraps a bound (and, with `remote`, connected) socket. Must run inside a tokio runtime.
    pub(crate) fn new(socket: UdpSocket, remote: Option<SocketAddr>, config: &SocketConfig) -> Result<Self> {
        let local = socket.local_addr().map_err(Error::Bind)?;
        let socket = Arc::new(socket);
        let bridge = Arc::new(DatagramBridge::new(config.queue_capacity));
        let (outbox, pending) = mpsc::unbounded_channel();

        let receiver = tokio::spawn(deliver(
            socket.clone(),
            bridge.clone(),
            config.recorder.clone(),
        ));
        tokio::spawn(transmit(socket, bridge.clone(), pending));

        record!(config.recorder, Level::Debug, "datagram channel bound on {} remote {:?}", local, remote);

        Ok(Self {
            bridge,
            outbox: Some(outbox),
            receiver,
            local,
            remote,
            finished: false,
            reported_overflow: 0,
            recorder: config.recorder.clone(),
        })
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local
    }

    /// The fixed remote, if the channel was bound with one.
    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// True after `close()` or once the receive loop has stopped on a fatal error.
    pub fn is_closed(&self) -> bool {
        self.outbox.is_none() || self.bridge.is_closed()
    }

    /// Datagrams dropped so far because the receive queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.bridge.overflow_count()
    }

    /// Fails with [`Error::QueueOverflow`] if datagrams were dropped since the last check.
    pub fn check_overflow(&mut self) -> Result<()> {
        let total = self.bridge.overflow_count();
        let dropped = total - self.reported_overflow;
        self.reported_overflow = total;
        if dropped > 0 {
            return Err(Error::QueueOverflow { dropped });
        }
        Ok(())
    }

    /// Submits `data` without waiting.
    ///
    /// With `target` unset the configured remote is used. Any error latched
    /// by earlier traffic is returned after the submission.
    pub fn send_to(&self, data: &[u8], target: Option<SocketAddr>) -> Result<()> {
        let outbox = self.outbox.as_ref().ok_or(Error::Closed)?;
        if self.bridge.is_closed() {
            return Err(Error::Closed);
        }
        let target = match (target, self.remote) {
            (None, None) => return Err(Error::NotConnected),
            (Some(given), Some(remote)) if given != remote => {
                return Err(Error::AddressMismatch { given, remote });
            }
            (_, Some(_)) => None,
            (Some(given), None) => Some(given),
        };

        outbox
            .send(Outgoing {
                payload: data.to_vec(),
                target,
            })
            .map_err(|_| Error::Closed)?;
        self.raise_if_error()
    }

    /// Waits for the next datagram.
    ///
    /// Returns `Ok(None)` once the transport has closed. After that no more
    /// datagrams will arrive and further calls keep returning `Ok(None)`.
    pub async fn receive(&mut self) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.bridge.next().await {
                Envelope::Datagram { payload, source } => return Ok(Some((payload, source))),
                Envelope::Failed => {
                    // The latch may already have been reported by `send_to`.
                    self.raise_if_error()?;
                }
                Envelope::Closed => {
                    self.finished = true;
                    self.raise_if_error()?;
                    return Ok(None);
                }
            }
        }
    }

    /// Like [`receive`](Self::receive) but gives up after `deadline`, leaving
    /// the queue and the latched error untouched.
    pub async fn receive_with_timeout(&mut self, deadline: Duration) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        tokio::time::timeout(deadline, self.receive())
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Stops delivery and lets queued sends drain. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.outbox.take().is_none() {
            return;
        }
        self.receiver.abort();
        self.bridge.on_close();
        record!(self.recorder, Level::Debug, "closed datagram channel {}", self.local);
    }

    /// Runs `body` with the channel and closes it afterwards.
    pub async fn scope<R>(mut self, body: impl AsyncFnOnce(&mut DatagramChannel) -> R) -> R {
        let out = body(&mut self).await;
        self.close();
        out
    }

    fn raise_if_error(&self) -> Result<()> {
        match self.bridge.take_error() {
            Some(err) => Err(Error::Transport(err)),
            None => Ok(()),
        }
    }
}

impl Drop for DatagramChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DatagramChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatagramChannel")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("queued", &self.bridge.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Errors after which the socket keeps working, mostly ICMP feedback.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
    )
}

async fn deliver(socket: Arc<UdpSocket>, bridge: Arc<DatagramBridge>, recorder: Arc<dyn Recorder>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, source)) => {
                if !bridge.on_datagram(buf[..n].to_vec(), source) {
                    record!(recorder, Level::Warn, "receive queue full, dropped {} bytes from {}", n, source);
                }
            }
            Err(err) if is_transient(&err) => {
                record!(recorder, Level::Debug, "datagram receive error: {}", err);
                bridge.on_error(err);
            }
            Err(err) => {
                record!(recorder, Level::Error, "datagram socket failed: {}", err);
                bridge.on_error(err);
                bridge.on_close();
                return;
            }
        }
    }
}

async fn transmit(
    socket: Arc<UdpSocket>,
    bridge: Arc<DatagramBridge>,
    mut pending: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(out) = pending.recv().await {
        let sent = match out.target {
            Some(target) => socket.send_to(&out.payload, target).await,
            None => socket.send(&out.payload).await,
        };
        if let Err(err) = sent {
            bridge.on_error(err);
        }
    }
}
