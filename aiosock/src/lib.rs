//! # aiosock - cooperative stream and datagram channels
//!
//! aiosock puts TCP streams and UDP sockets behind one pull-based async API
//! on tokio, and ships a supervisor for sets of tasks that keep spawning more
//! tasks:
//!
//! - **Stream channels**: bounded, exact-length, read-to-end and timed reads
//! - **Datagram channels**: a push-to-pull bridge with a bounded FIFO, an
//!   overflow counter and deferred transport errors
//! - **Connection factory**: dial, listen and bind with IPv4, IPv6 or
//!   dual-stack sockets
//! - **Task supervisor**: per-task outcome reports without cross-cancellation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! ├─────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐ ┌──────────────────────────────┐   │
//! │  │ StreamChannel   │ │ DatagramChannel              │   │
//! │  │                 │ │  ┌────────────────────────┐  │   │
//! │  │                 │ │  │ DatagramBridge (FIFO)  │  │   │
//! │  └─────────────────┘ └──┴────────────────────────┴──┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │        Connection Factory (dial / listen / bind)         │
//! ├─────────────────────────────────────────────────────────┤
//! │                tokio sockets + socket2                   │
//! └─────────────────────────────────────────────────────────┘
//!              Task Supervisor (TaskGroup / supervise)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use aiosock::{bind_datagram, SocketConfig};
//!
//! # async fn run() -> aiosock::Result<()> {
//! let remote = "127.0.0.1:25000".parse().unwrap();
//! let mut channel = bind_datagram(None, Some(remote), &SocketConfig::default()).await?;
//! channel.send_to(br#"{"seq": 0}"#, None)?;
//! if let Some((reply, from)) = channel.receive().await? {
//!     println!("{from}: {}", String::from_utf8_lossy(&reply));
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod address;
pub mod config;
pub mod datagram;
pub mod diag;
pub mod error;
pub mod factory;
pub mod stream;
pub mod supervisor;

// Re-export commonly used types
pub use address::Family;
pub use config::{SocketConfig, SupervisorConfig};
pub use datagram::{DatagramBridge, DatagramChannel, Envelope};
pub use diag::{LogRecorder, Recorder};
pub use error::{Error, ErrorKind, Result};
pub use factory::{bind_datagram, dial, listen, StreamListener};
pub use stream::StreamChannel;
pub use supervisor::{supervise, Report, Task, TaskFailure, TaskGroup, TaskId, TaskReport};

/// Default upper bound for one stream read.
pub const DEFAULT_READ_LIMIT: usize = 64 * 1024;

/// Largest datagram the receive loop accepts.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 100;

/// Discovery-mode supervision stops after more than this many empty scans.
pub const DEFAULT_IDLE_ROUNDS: usize = 2;
