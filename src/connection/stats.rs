use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Requests handed to the writer, keepalive probes included
    pub commands_sent: AtomicU64,
    /// Responses matched to a request
    pub responses_received: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub keepalive_probes: AtomicU64,
    /// Callers that stopped waiting before their response arrived
    pub request_timeouts: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_received(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn keepalive_probe(&self) {
        self.keepalive_probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_timed_out(&self) {
        self.request_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            keepalive_probes: self.keepalive_probes.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub commands_sent: u64,
    pub responses_received: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub keepalive_probes: u64,
    pub request_timeouts: u64,
}
