//! Connection factory: dial, listen and bind.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;

use crate::address::{self, Family};
use crate::config::SocketConfig;
use crate::datagram::DatagramChannel;
use crate::diag::{record, Level};
use crate::error::{Error, Result};
use crate::stream::StreamChannel;
use crate::supervisor::panic_message;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Connects to `host:port`, trying every resolved address in turn.
pub async fn dial(host: &str, port: u16, config: &SocketConfig) -> Result<StreamChannel> {
    let mut last_err = None;
    for addr in address::resolve(host, port, config.family).await? {
        match connect(addr, config.connect_timeout).await {
            Ok(stream) => {
                let channel = StreamChannel::new(stream, config)?;
                record!(config.recorder, Level::Debug, "connected {} -> {}", channel.local_address(), addr);
                return Ok(channel);
            }
            Err(err) => {
                record!(config.recorder, Level::Debug, "connect to {} failed: {}", addr, err);
                last_err = Some(err);
            }
        }
    }
    Err(Error::Connection(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{host} did not resolve"))
    })))
}

async fn connect(addr: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))?,
        None => TcpStream::connect(addr).await,
    }
}

/// Binds a listener on `host:port` and serves `handler` forever.
///
/// Only binding can fail; see [`StreamListener::serve`].
pub async fn listen<H, Fut, E>(handler: H, host: &str, port: u16, config: SocketConfig) -> Result<()>
where
    H: Fn(StreamChannel) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let listener = StreamListener::bind(host, port, config).await?;
    match listener.serve(handler).await {}
}

/// A bound, listening stream socket.
pub struct StreamListener {
    listener: TcpListener,
    local: SocketAddr,
    config: SocketConfig,
}

impl StreamListener {
    /// Binds `host:port`. An empty host listens on every address of the configured family.
    pub async fn bind(host: &str, port: u16, config: SocketConfig) -> Result<Self> {
        let addr = address::resolve(host, port, config.family)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Bind(io::Error::from(io::ErrorKind::AddrNotAvailable)))?;

        let socket = new_socket(addr, Type::STREAM, Protocol::TCP, &config).map_err(Error::Bind)?;
        socket.set_reuse_address(true).map_err(Error::Bind)?;
        socket.bind(&addr.into()).map_err(Error::Bind)?;
        let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
        socket.listen(backlog).map_err(Error::Bind)?;

        let listener = TcpListener::from_std(socket.into()).map_err(Error::Bind)?;
        let local = listener.local_addr().map_err(Error::Bind)?;
        record!(config.recorder, Level::Info, "listening on {} ({:?})", local, config.family);
        Ok(Self {
            listener,
            local,
            config,
        })
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local
    }

    /// Accepts connections forever, running `handler` for each in its own task.
    ///
    /// A handler that fails or panics is reported with its peer address and
    /// its channel is released; the listener and the other handlers go on.
    pub async fn serve<H, Fut, E>(self, handler: H) -> Infallible
    where
        H: Fn(StreamChannel) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let recorder = self.config.recorder.clone();
        let mut handlers = JoinSet::new();
        let mut peers = HashMap::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => match StreamChannel::new(stream, &self.config) {
                        Ok(channel) => {
                            record!(recorder, Level::Debug, "accepted {}", peer);
                            let task = handlers.spawn(handler(channel));
                            peers.insert(task.id(), peer);
                        }
                        Err(err) => record!(recorder, Level::Warn, "dropping {}: {}", peer, err),
                    },
                    Err(err) => {
                        record!(recorder, Level::Warn, "accept on {} failed: {}", self.local, err);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                Some(done) = handlers.join_next_with_id(), if !handlers.is_empty() => {
                    match done {
                        Ok((id, outcome)) => {
                            let peer = peers.remove(&id);
                            if let Err(err) = outcome {
                                record!(recorder, Level::Error, "handler for {:?} failed: {}", peer, err);
                            }
                        }
                        Err(err) => {
                            let peer = peers.remove(&err.id());
                            if err.is_panic() {
                                let message = panic_message(err.into_panic());
                                record!(recorder, Level::Error, "handler for {:?} panicked: {}", peer, message);
                            } else {
                                record!(recorder, Level::Debug, "handler for {:?} cancelled", peer);
                            }
                        }
                    }
                }
            }
        }
    }
}

impl fmt::Debug for StreamListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamListener").field("local", &self.local).finish()
    }
}

/// Creates a datagram channel.
///
/// Without `local` the socket binds the wildcard address: of the remote's
/// family when `remote` is given, otherwise of the configured family. With
/// `remote` the socket is connected and only talks to that peer.
pub async fn bind_datagram(
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    config: &SocketConfig,
) -> Result<DatagramChannel> {
    let bind_addr = match (local, remote) {
        (Some(local), _) => local,
        (None, Some(remote)) => Family::of(&remote).unspecified(0),
        (None, None) => config.family.unspecified(0),
    };

    let socket = new_socket(bind_addr, Type::DGRAM, Protocol::UDP, config).map_err(Error::Bind)?;
    if config.allow_broadcast {
        socket.set_broadcast(true).map_err(Error::Bind)?;
    }
    socket.bind(&bind_addr.into()).map_err(Error::Bind)?;

    let socket = UdpSocket::from_std(socket.into()).map_err(Error::Bind)?;
    if let Some(remote) = remote {
        socket.connect(remote).await.map_err(Error::Connection)?;
    }
    DatagramChannel::new(socket, remote, config)
}

/// Non-blocking socket with the family and reuse options applied.
fn new_socket(addr: SocketAddr, ty: Type, protocol: Protocol, config: &SocketConfig) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol))?;
    if addr.is_ipv6() {
        socket.set_only_v6(config.family == Family::V6)?;
    }
    if config.reuse_port {
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    Ok(socket)
}
