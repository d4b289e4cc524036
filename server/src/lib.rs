//! TCP and UDP echo server built on aiosock.
//!
//! Every request is answered with a JSON object carrying the server time
//! and the client address. UDP requests that carry a `seq` field get it
//! echoed back so clients can match replies to requests.

pub mod echo;

pub use echo::{lan_ip, reply_for, serve_datagrams, serve_stream, timestamp, EchoServer, Net};

/// Port used when none is given on the command line.
pub const DEFAULT_PORT: u16 = 25000;
