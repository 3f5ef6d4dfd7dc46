//! Process-local metrics.
//!
//! The ring header's on-wire layout is fixed by the protocol and has no
//! room for shared counters, so metrics here are per-[`Connection`](crate::Connection),
//! not shared across processes. Counters are atomic so a `Connection` can
//! be wrapped in an `Arc` and used from multiple threads without extra
//! locking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live, atomic counters owned by one [`Connection`](crate::Connection).
#[derive(Debug, Default)]
pub struct Metrics {
    messages_written: AtomicU64,
    messages_read: AtomicU64,
    write_timeouts: AtomicU64,
    bad_messages: AtomicU64,
    caught_up: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_write_ok(&self) {
        self.messages_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_timeout(&self) {
        self.write_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_ok(&self) {
        self.messages_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bad_message(&self) {
        self.bad_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_caught_up(&self) {
        self.caught_up.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a consistent-enough point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_written: self.messages_written.load(Ordering::Relaxed),
            messages_read: self.messages_read.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
            bad_messages: self.bad_messages.load(Ordering::Relaxed),
            caught_up: self.caught_up.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`Metrics`]' counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_written: u64,
    pub messages_read: u64,
    pub write_timeouts: u64,
    pub bad_messages: u64,
    pub caught_up: u64,
}
