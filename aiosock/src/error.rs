use std::io;
use std::net::SocketAddr;

/// Coarse classification of an [`Error`], stable across variants that carry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Timeout,
    IncompleteRead,
    Transport,
    QueueOverflow,
    NotConnected,
    AddressMismatch,
    Closed,
    Bind,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Dial, accept or stream I/O failed.
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),

    #[error("operation timed out")]
    Timeout,

    /// The stream closed before `expected` bytes were collected. The
    /// `received` bytes were discarded.
    #[error("stream closed after {received} of {expected} bytes")]
    IncompleteRead { expected: usize, received: usize },

    /// An asynchronous datagram failure, latched and surfaced on the next call.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("datagram queue overflowed, {dropped} datagrams dropped")]
    QueueOverflow { dropped: u64 },

    #[error("no destination address and no remote address configured")]
    NotConnected,

    #[error("destination {given} differs from connected remote {remote}")]
    AddressMismatch { given: SocketAddr, remote: SocketAddr },

    #[error("channel is closed")]
    Closed,

    /// Socket creation, option setting or local bind failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::Connection,
            Error::Timeout => ErrorKind::Timeout,
            Error::IncompleteRead { .. } => ErrorKind::IncompleteRead,
            Error::Transport(_) => ErrorKind::Transport,
            Error::QueueOverflow { .. } => ErrorKind::QueueOverflow,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::AddressMismatch { .. } => ErrorKind::AddressMismatch,
            Error::Closed => ErrorKind::Closed,
            Error::Bind(_) => ErrorKind::Bind,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match &err {
            Error::Connection(e) | Error::Transport(e) | Error::Bind(e) => e.kind(),
            Error::Timeout => io::ErrorKind::TimedOut,
            Error::IncompleteRead { .. } => io::ErrorKind::UnexpectedEof,
            Error::NotConnected | Error::Closed => io::ErrorKind::NotConnected,
            Error::AddressMismatch { .. } => io::ErrorKind::InvalidInput,
            Error::QueueOverflow { .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
