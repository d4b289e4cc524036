//! Push-to-pull adapter for datagram delivery.
//!
//! The delivery side (`on_datagram`, `on_error`, `on_close`) never waits: it
//! takes a short lock, pushes onto the queue and wakes the consumer. The
//! consumer side (`next`) waits until something is queued.
//!
//! Overflow policy for bounded queues: the newest datagram is dropped and
//! counted, queued data is left as is. Sentinels are not counted against the
//! capacity so a waiting consumer always wakes up.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// One queued item.
#[derive(Debug, PartialEq, Eq)]
pub enum Envelope {
    Datagram { payload: Vec<u8>, source: SocketAddr },
    /// An error was latched when this was queued.
    Failed,
    /// The transport closed; nothing follows.
    Closed,
}

impl Envelope {
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Envelope::Datagram { .. })
    }
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Envelope>,
    datagrams: usize,
    latch: Option<io::Error>,
    /// A `Failed` envelope is waiting in `queue`.
    failed_queued: bool,
    overflowed: u64,
    closed: bool,
}

/// Bounded FIFO of [`Envelope`]s plus a single-slot error latch.
#[derive(Debug)]
pub struct DatagramBridge {
    state: Mutex<State>,
    ready: Notify,
    capacity: usize,
}

impl DatagramBridge {
    /// `capacity == 0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ready: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues a received datagram. Returns `false` if it was dropped.
    pub fn on_datagram(&self, payload: Vec<u8>, source: SocketAddr) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        if self.capacity != 0 && state.datagrams >= self.capacity {
            state.overflowed += 1;
            return false;
        }
        state.datagrams += 1;
        state.queue.push_back(Envelope::Datagram { payload, source });
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Latches `error` unless an earlier one is still unobserved.
    ///
    /// At most one `Failed` sentinel is queued at a time, so repeated errors
    /// without a reader do not grow the queue.
    pub fn on_error(&self, error: io::Error) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        if state.latch.is_none() {
            state.latch = Some(error);
        }
        if state.failed_queued {
            return;
        }
        state.failed_queued = true;
        state.queue.push_back(Envelope::Failed);
        drop(state);
        self.ready.notify_one();
    }

    /// Queues the closing sentinel. Only the first call has an effect.
    pub fn on_close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.queue.push_back(Envelope::Closed);
        drop(state);
        self.ready.notify_one();
    }

    /// Waits for the next envelope.
    ///
    /// Cancel safe: an envelope is only removed when this returns.
    pub async fn next(&self) -> Envelope {
        loop {
            let notified = self.ready.notified();
            if let Some(envelope) = self.pop() {
                return envelope;
            }
            notified.await;
        }
    }

    /// Pops without waiting.
    pub fn try_next(&self) -> Option<Envelope> {
        self.pop()
    }

    /// Takes the latched error, clearing the latch.
    pub fn take_error(&self) -> Option<io::Error> {
        self.lock().latch.take()
    }

    pub fn has_error(&self) -> bool {
        self.lock().latch.is_some()
    }

    /// Number of datagrams dropped because the queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.lock().overflowed
    }

    /// Queued envelopes, sentinels included.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn pop(&self) -> Option<Envelope> {
        let mut state = self.lock();
        let envelope = state.queue.pop_front()?;
        match envelope {
            Envelope::Datagram { .. } => state.datagrams -= 1,
            Envelope::Failed => state.failed_queued = false,
            Envelope::Closed => {}
        }
        Some(envelope)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn datagram(payload: &[u8]) -> Envelope {
        Envelope::Datagram {
            payload: payload.to_vec(),
            source: addr(),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let bridge = DatagramBridge::new(0);
        for payload in [b"d1", b"d2", b"d3"] {
            assert!(bridge.on_datagram(payload.to_vec(), addr()));
        }
        assert_eq!(bridge.next().await, datagram(b"d1"));
        assert_eq!(bridge.next().await, datagram(b"d2"));
        assert_eq!(bridge.next().await, datagram(b"d3"));
        assert!(bridge.is_empty());
    }

    #[tokio::test]
    async fn test_overflow_drops_newest() {
        let bridge = DatagramBridge::new(2);
        assert!(bridge.on_datagram(b"a".to_vec(), addr()));
        assert!(bridge.on_datagram(b"b".to_vec(), addr()));
        assert!(!bridge.on_datagram(b"c".to_vec(), addr()));
        assert!(!bridge.on_datagram(b"d".to_vec(), addr()));
        assert_eq!(bridge.overflow_count(), 2);

        assert_eq!(bridge.next().await, datagram(b"a"));
        // Space freed by the consumer is usable again.
        assert!(bridge.on_datagram(b"e".to_vec(), addr()));
        assert_eq!(bridge.next().await, datagram(b"b"));
        assert_eq!(bridge.next().await, datagram(b"e"));
    }

    #[tokio::test]
    async fn test_sentinel_bypasses_capacity() {
        let bridge = DatagramBridge::new(1);
        bridge.on_datagram(b"full".to_vec(), addr());
        bridge.on_close();
        assert_eq!(bridge.len(), 2);
        assert_eq!(bridge.next().await, datagram(b"full"));
        assert_eq!(bridge.next().await, Envelope::Closed);
    }

    #[test]
    fn test_first_error_wins() {
        let bridge = DatagramBridge::new(0);
        bridge.on_error(io::Error::from(io::ErrorKind::ConnectionRefused));
        bridge.on_error(io::Error::from(io::ErrorKind::HostUnreachable));
        assert_eq!(bridge.len(), 1);

        let err = bridge.take_error().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert!(bridge.take_error().is_none());
    }

    #[test]
    fn test_repeated_errors_stay_bounded() {
        let bridge = DatagramBridge::new(2);
        for _ in 0..10_000 {
            bridge.on_error(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        assert_eq!(bridge.len(), 1);

        // The latch was read elsewhere; the queued sentinel still covers new errors.
        bridge.take_error();
        for _ in 0..100 {
            bridge.on_error(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        assert_eq!(bridge.len(), 1);

        assert_eq!(bridge.try_next(), Some(Envelope::Failed));
        bridge.on_error(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(bridge.try_next(), Some(Envelope::Failed));
        assert!(bridge.is_empty());
    }

    #[test]
    fn test_close_is_enqueued_once() {
        let bridge = DatagramBridge::new(0);
        bridge.on_close();
        bridge.on_close();
        bridge.on_error(io::Error::from(io::ErrorKind::Other));
        assert!(!bridge.on_datagram(b"late".to_vec(), addr()));
        assert_eq!(bridge.try_next(), Some(Envelope::Closed));
        assert_eq!(bridge.try_next(), None);
        assert!(!bridge.has_error());
    }

    #[tokio::test]
    async fn test_next_wakes_on_later_delivery() {
        let bridge = Arc::new(DatagramBridge::new(0));
        let producer = bridge.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.on_datagram(b"late".to_vec(), "127.0.0.1:4000".parse().unwrap());
        });
        assert_eq!(bridge.next().await, datagram(b"late"));
    }

    #[tokio::test]
    async fn test_cancelled_next_loses_nothing() {
        let bridge = DatagramBridge::new(0);
        let waited = tokio::time::timeout(Duration::from_millis(10), bridge.next()).await;
        assert!(waited.is_err());
        bridge.on_datagram(b"kept".to_vec(), addr());
        assert_eq!(bridge.next().await, datagram(b"kept"));
    }
}
