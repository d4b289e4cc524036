use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aiosock::address::{self, Family};
use aiosock::{bind_datagram, dial, ErrorKind, SocketConfig};
use log::*;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// How long a TCP client waits for each reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

const STREAM_READ: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTarget {
    Tcp,
    Udp,
}

/// Lines typed by the user, shared by every client.
///
/// Each line wakes exactly one client.
#[derive(Clone)]
pub struct Prompt {
    lines: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    quit: CancellationToken,
}

impl Prompt {
    pub fn new() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let prompt = Self {
            lines: Arc::new(Mutex::new(rx)),
            quit: CancellationToken::new(),
        };
        (prompt, tx)
    }

    pub fn quit(&self) -> CancellationToken {
        self.quit.clone()
    }

    /// Waits for the next line; `None` once the user quit or input ended.
    pub async fn next_line(&self) -> Option<String> {
        tokio::select! {
            _ = self.quit.cancelled() => None,
            line = async { self.lines.lock().await.recv().await } => line,
        }
    }
}

/// Feeds stdin lines to `lines` until EOF or a line reading `q`.
pub async fn read_input(lines: mpsc::UnboundedSender<String>, quit: CancellationToken) -> std::io::Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match stdin.next_line().await? {
            Some(line) if line.trim() == "q" => {
                info!("quit requested");
                break;
            }
            Some(line) => {
                if lines.send(line).is_err() {
                    break;
                }
            }
            None => break,
        }
    }
    quit.cancel();
    Ok(())
}

pub struct EchoClient {
    target: ClientTarget,
    server: String,
    port: u16,
    config: SocketConfig,
}

impl EchoClient {
    pub fn new(target: ClientTarget, server: impl Into<String>, port: u16) -> Self {
        let server = server.into();
        let config = SocketConfig::default().with_family(Family::for_host(&server));
        Self {
            target,
            server,
            port,
            config,
        }
    }

    /// Talks to the server once per line typed until the user quits.
    pub async fn run(self, id: usize, prompt: Prompt) -> aiosock::Result<()> {
        info!("[{}] connecting to {:?} {}:{}", id, self.target, self.server, self.port);
        match self.target {
            ClientTarget::Tcp => self.run_stream(id, prompt).await,
            ClientTarget::Udp => self.run_datagram(id, prompt).await,
        }
    }

    async fn run_stream(self, id: usize, prompt: Prompt) -> aiosock::Result<()> {
        let mut channel = dial(&self.server, self.port, &self.config).await?;
        info!("[{}] connected from {}", id, channel.local_address());

        loop {
            let request = json!({ "time": timestamp() }).to_string();
            channel.send(request.as_bytes()).await?;

            match channel.receive_with_timeout(STREAM_READ, REPLY_TIMEOUT).await {
                Ok(reply) if reply.is_empty() => {
                    info!("[{}] server closed the connection", id);
                    break;
                }
                Ok(reply) => info!("[{}] reply: {}", id, String::from_utf8_lossy(&reply)),
                Err(err) if err.kind() == ErrorKind::Timeout => warn!("[{}] no reply within {:?}", id, REPLY_TIMEOUT),
                Err(err) => return Err(err),
            }

            if prompt.next_line().await.is_none() {
                break;
            }
        }

        channel.close().await;
        // Closing again is harmless.
        channel.close().await;
        Ok(())
    }

    async fn run_datagram(self, id: usize, prompt: Prompt) -> aiosock::Result<()> {
        let remote = server_address(&self.server, self.port, self.config.family).await?;
        let mut channel = bind_datagram(None, Some(remote), &self.config).await?;
        info!("[{}] sending from {}", id, channel.local_address());

        let mut seq = 0u64;
        channel.send_to(json!({ "time": timestamp(), "seq": seq }).to_string().as_bytes(), None)?;

        loop {
            tokio::select! {
                received = channel.receive() => match received {
                    Ok(Some((reply, source))) => {
                        info!("[{}] reply from {}: {}", id, address::unmap(source), String::from_utf8_lossy(&reply));
                    }
                    Ok(None) => break,
                    Err(err) => warn!("[{}] {}", id, err),
                },
                line = prompt.next_line() => {
                    if line.is_none() {
                        break;
                    }
                    seq += 1;
                    let request = json!({ "time": timestamp(), "seq": seq }).to_string();
                    if let Err(err) = channel.send_to(request.as_bytes(), None) {
                        warn!("[{}] {}", id, err);
                    }
                }
            }
        }

        channel.close();
        Ok(())
    }
}

async fn server_address(host: &str, port: u16, family: Family) -> aiosock::Result<SocketAddr> {
    address::resolve(host, port, family)
        .await?
        .into_iter()
        .next()
        .ok_or(aiosock::Error::NotConnected)
}

fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}
