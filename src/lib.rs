//! ringcove - a lock-free shared-memory ring-buffer transport
//!
//! A single-producer-friendly, multi-reader transport for low-latency
//! inter-process publish/subscribe on one host. A named topic maps to a
//! fixed-size region of POSIX shared memory containing a header and a
//! power-of-two array of fixed-size slots; any process with permission may
//! attach and either publish or consume messages.
//!
//! Synchronisation between writers and readers goes entirely through
//! cache-line-padded atomics on the ring header, with adaptive backoff and
//! debug-only invariant assertions guarding the hot path.
//!
//! # Key properties
//!
//! - Lock-free: all synchronisation is through atomics on the ring header;
//!   producers and consumers never rendezvous directly.
//! - Bounded back-pressure: a writer waits (bounded by a timeout) rather
//!   than silently dropping data it accepted.
//! - Drop-when-behind consumers: a reader that falls more than half a ring
//!   behind jumps forward to the latest message rather than stalling the
//!   writer.
//! - A calibrated raw-cycle-counter timing core backs both the writer's
//!   timeout detection and user-level pacing.
//!
//! # Example
//!
//! ```no_run
//! use ringcove::Connection;
//!
//! let writer = Connection::create_or_attach("/example_topic", 64, 1024).unwrap();
//! writer.write(b"hello").unwrap();
//!
//! let mut reader = Connection::attach("/example_topic").unwrap();
//! let mut buf = [0u8; 64];
//! let (len, _remaining) = reader.read(&mut buf).unwrap();
//! assert_eq!(&buf[..len], b"hello");
//! ```

mod backoff;
mod config;
mod connection;
mod error;
pub mod ffi;
mod header;
mod invariants;
mod metrics;
mod region;
mod ring;
mod timing;

pub use backoff::Backoff;
pub use config::RingConfig;
pub use connection::{delete, Connection, MAX_TOPIC_LEN};
pub use error::{Result, RingError};
pub use header::{round_up_64, round_up_pow2, CACHE_LINE, SLOT_HEADER_SIZE};
pub use metrics::{Metrics, MetricsSnapshot};
pub use ring::TIMEOUT_NS;
pub use timing::{calibrate, now, ns, sleep};
