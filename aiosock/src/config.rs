use std::sync::Arc;
use std::time::Duration;

use crate::address::Family;
use crate::diag::{self, Recorder};
use crate::{DEFAULT_BACKLOG, DEFAULT_READ_LIMIT};

/// Options recognized by the connection factory.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub family: Family,
    /// Upper bound for a single stream read.
    pub read_limit: usize,
    pub backlog: u32,
    pub reuse_port: bool,
    pub allow_broadcast: bool,
    /// Datagram queue capacity, `0` means unbounded.
    pub queue_capacity: usize,
    pub connect_timeout: Option<Duration>,
    pub recorder: Arc<dyn Recorder>,
}

impl SocketConfig {
    pub fn new() -> Self {
        Self {
            family: Family::Dual,
            read_limit: DEFAULT_READ_LIMIT,
            backlog: DEFAULT_BACKLOG,
            reuse_port: false,
            allow_broadcast: false,
            queue_capacity: 0,
            connect_timeout: None,
            recorder: diag::default_recorder(),
        }
    }

    pub fn with_family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }

    pub fn with_read_limit(mut self, limit: usize) -> Self {
        self.read_limit = limit.max(1);
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_reuse_port(mut self, reuse: bool) -> Self {
        self.reuse_port = reuse;
        self
    }

    pub fn with_allow_broadcast(mut self, allow: bool) -> Self {
        self.allow_broadcast = allow;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for the task supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Record every collected outcome through `recorder`.
    pub log_results: bool,
    /// Discovery mode stops after more than this many consecutive empty scans.
    pub idle_rounds: usize,
    pub recorder: Arc<dyn Recorder>,
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self {
            log_results: true,
            idle_rounds: crate::DEFAULT_IDLE_ROUNDS,
            recorder: diag::default_recorder(),
        }
    }

    pub fn with_log_results(mut self, log: bool) -> Self {
        self.log_results = log;
        self
    }

    pub fn with_idle_rounds(mut self, rounds: usize) -> Self {
        self.idle_rounds = rounds;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_config_builder() {
        let config = SocketConfig::default()
            .with_family(Family::V4)
            .with_backlog(16)
            .with_queue_capacity(3)
            .with_read_limit(0);

        assert_eq!(config.family, Family::V4);
        assert_eq!(config.backlog, 16);
        assert_eq!(config.queue_capacity, 3);
        assert_eq!(config.read_limit, 1);
        assert!(!config.reuse_port);
        assert!(config.connect_timeout.is_none());
    }

    #[test]
    fn test_supervisor_defaults() {
        let config = SupervisorConfig::default();
        assert!(config.log_results);
        assert_eq!(config.idle_rounds, 2);
    }
}
