use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use aiosock::address::{self, Family};
use aiosock::{bind_datagram, listen, DatagramChannel, Error, ErrorKind, SocketConfig, StreamChannel};
use clap::ValueEnum;
use log::*;
use serde_json::{json, Value};

/// Upper bound for one TCP read.
const STREAM_READ: usize = 8192;

/// Which transports the server answers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Net {
    Tcp,
    Udp,
    All,
}

pub struct EchoServer {
    host: String,
    port: u16,
    net: Net,
    disconnect: bool,
    config: SocketConfig,
}

impl EchoServer {
    /// An empty host listens on every IPv4 and IPv6 interface.
    pub fn new(host: impl Into<String>, port: u16, net: Net) -> Self {
        let host = host.into();
        let config = SocketConfig::default().with_family(Family::for_host(&host));
        Self {
            host,
            port,
            net,
            disconnect: false,
            config,
        }
    }

    /// Close every TCP connection after its first reply.
    pub fn with_disconnect(mut self, disconnect: bool) -> Self {
        self.disconnect = disconnect;
        self
    }

    pub fn with_config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Serves until a listener fails to bind.
    pub async fn run(&self) -> aiosock::Result<()> {
        match self.net {
            Net::Tcp => self.run_stream().await,
            Net::Udp => self.run_datagram().await,
            Net::All => tokio::try_join!(self.run_stream(), self.run_datagram()).map(|_| ()),
        }
    }

    async fn run_stream(&self) -> aiosock::Result<()> {
        let disconnect = self.disconnect;
        listen(
            move |channel| serve_stream(channel, disconnect),
            &self.host,
            self.port,
            self.config.clone(),
        )
        .await
    }

    async fn run_datagram(&self) -> aiosock::Result<()> {
        let local = address::resolve(&self.host, self.port, self.config.family)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Bind(io::Error::from(io::ErrorKind::AddrNotAvailable)))?;
        let channel = bind_datagram(Some(local), None, &self.config).await?;
        info!("UDP echo listening on {}", channel.local_address());
        serve_datagrams(channel).await
    }
}

/// Answers one TCP client until it hangs up.
pub async fn serve_stream(mut channel: StreamChannel, disconnect: bool) -> aiosock::Result<()> {
    let peer = channel.peer_address();
    info!("TCP client {} connected", peer);

    loop {
        let data = channel.receive(STREAM_READ).await?;
        if data.is_empty() {
            info!("TCP client {} closed the connection", peer);
            break;
        }
        info!("TCP {} -> {}", peer, String::from_utf8_lossy(&data));

        channel.send(&reply_for(&data, address::unmap(peer))).await?;
        if disconnect {
            info!("disconnecting {}", peer);
            break;
        }
    }

    channel.close().await;
    Ok(())
}

/// Answers datagrams until the channel is closed.
///
/// Transport errors reported by the channel are logged and skipped.
pub async fn serve_datagrams(mut channel: DatagramChannel) -> aiosock::Result<()> {
    loop {
        let (data, source) = match channel.receive().await {
            Ok(Some(datagram)) => datagram,
            Ok(None) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Transport => {
                warn!("UDP receive: {}", err);
                continue;
            }
            Err(err) => return Err(err),
        };
        let peer = address::unmap(source);
        info!("UDP {} -> {}", peer, String::from_utf8_lossy(&data));

        if let Err(err) = channel.send_to(&reply_for(&data, peer), Some(source)) {
            warn!("UDP reply to {} failed: {}", peer, err);
        }
        if let Err(err) = channel.check_overflow() {
            warn!("{}", err);
        }
    }
}

/// Builds the JSON reply for `request` received from `peer`.
pub fn reply_for(request: &[u8], peer: SocketAddr) -> Vec<u8> {
    let mut reply = json!({
        "time": timestamp(),
        "client": format!("{}:{}", peer.ip(), peer.port()),
    });
    if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(request) {
        if let Some(seq) = fields.get("seq") {
            reply["seq"] = seq.clone();
        }
    }
    reply.to_string().into_bytes()
}

/// Seconds since the Unix epoch with microsecond precision.
pub fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

/// The address this host uses for outbound traffic, if it has a route.
pub fn lan_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    // No packet is sent; connecting only selects the route.
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
