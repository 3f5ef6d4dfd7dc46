//! Per-process connection handle.
//!
//! Binds a mapped [`ShmRegion`] together with one process's read cursor
//! (`read_index`, `read_stamp`) and exposes the attach/detach/read/write
//! operations. A `Connection` is a thin non-owning view over shared memory
//! that any number of independent processes may open concurrently; the
//! only thing truly private to this process is the cursor.

use std::sync::atomic::Ordering;

use crate::config::RingConfig;
use crate::error::{Result, RingError};
use crate::header::RingHeader;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::region::ShmRegion;
use crate::ring;
use crate::timing;

/// Maximum topic name length: 255 usable bytes, leaving room for a
/// trailing NUL in the C ABI (`ffi`) even though the `String`s this crate
/// stores internally carry no terminator of their own.
pub const MAX_TOPIC_LEN: usize = 255;

/// A process's handle onto one ring-buffer topic.
///
/// Created by [`Connection::create_or_attach`] or [`Connection::attach`];
/// destroyed by `drop`, which unmaps the region but never unlinks the
/// name — other processes may still be attached.
pub struct Connection {
    region: ShmRegion,
    config: RingConfig,
    read_index: u64,
    read_stamp: u64,
    metrics: Metrics,
}

impl Connection {
    /// Create-or-attach mode: both `message_size` and `message_rate` are
    /// caller-supplied and positive. Computes the required region size,
    /// creates it if absent, and on `EEXIST` requires the existing
    /// header's `length`/`message_size` to match (length exactly,
    /// message_size at least the computed padded size).
    pub fn create_or_attach(topic: &str, message_size: u64, message_rate: u64) -> Result<Self> {
        validate_topic(topic)?;
        if message_size == 0 || message_rate == 0 {
            return Err(RingError::Invalid);
        }

        let config = RingConfig::from_rate_and_payload(message_rate, message_size)?;
        let size = config.region_size();
        let (region, created) = ShmRegion::create_or_attach(topic, size as usize)?;

        let header = header_of(&region);
        if created {
            // SAFETY: we just created this mapping; no other process can
            // have observed it yet, so initialising in place is exclusive.
            unsafe {
                RingHeader::init_in_place(
                    region.as_ptr().cast::<RingHeader>(),
                    config.length,
                    config.message_size,
                );
            }
        } else if header.length != config.length || header.message_size < config.message_size {
            return Err(RingError::Invalid);
        }

        Ok(Self::from_parts(region, config))
    }

    /// Attach-only mode: open an existing named region. Fails with
    /// [`RingError::NotFound`] if absent, [`RingError::Invalid`] if the
    /// mapped header is corrupt (zero length or message size).
    pub fn attach(topic: &str) -> Result<Self> {
        validate_topic(topic)?;
        let region = ShmRegion::attach(topic)?;

        let header = header_of(&region);
        let length = header.length;
        let message_size = header.message_size;
        if length == 0 || message_size == 0 {
            return Err(RingError::Invalid);
        }

        Ok(Self::from_parts(
            region,
            RingConfig {
                length,
                message_size,
            },
        ))
    }

    fn from_parts(region: ShmRegion, config: RingConfig) -> Self {
        Self {
            region,
            config,
            read_index: 0,
            read_stamp: timing::now(),
            metrics: Metrics::new(),
        }
    }

    /// Writes `payload` into the next slot. See [`ring::write`] for the
    /// full reservation/back-pressure/publish protocol.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        let header = header_of(&self.region);
        // SAFETY: `self.region` maps at least `header.region_size()` bytes
        // and `header` lives at the front of that same mapping.
        let outcome = unsafe { ring::write(header, self.region.as_ptr(), payload) };
        match &outcome {
            Ok(()) => self.metrics.record_write_ok(),
            Err(RingError::Timeout) => self.metrics.record_write_timeout(),
            _ => {}
        }
        outcome
    }

    /// Reads the next unconsumed message into `out`, applying
    /// drop-when-behind if this connection has fallen too far behind. See
    /// [`ring::read`] for the full protocol. Returns the number of bytes
    /// written into `out` and the number of messages still pending.
    pub fn read(&mut self, out: &mut [u8]) -> Result<(usize, i64)> {
        let header = header_of(&self.region);
        // SAFETY: same as `write`.
        let outcome = unsafe {
            ring::read(
                header,
                self.region.as_ptr(),
                &mut self.read_index,
                &mut self.read_stamp,
                out,
            )
        };
        match &outcome {
            Ok(o) => {
                self.metrics.record_read_ok();
                Ok((o.len, o.remaining))
            }
            Err(RingError::NoData) => {
                self.metrics.record_caught_up();
                Err(RingError::NoData)
            }
            Err(RingError::BadMsg) => {
                self.metrics.record_bad_message();
                Err(RingError::BadMsg)
            }
            Err(e) => Err(*e),
        }
    }

    /// Peek: `read_index - index`, signed, cheap, lock-free. Negative when
    /// this connection is caught up.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        let header = header_of(&self.region);
        let write_cursor = header.index.load(Ordering::Relaxed);
        self.read_index as i64 - write_cursor as i64
    }

    /// This connection's process-local counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The derived ring sizing this connection is bound to.
    #[must_use]
    pub fn config(&self) -> RingConfig {
        self.config
    }

    /// The topic name this connection is attached to.
    #[must_use]
    pub fn name(&self) -> &str {
        self.region.name()
    }
}

/// Deletes a named topic. Unlinks the name; existing mappings remain
/// valid until their last holder detaches. Idempotent: deleting a
/// nonexistent topic is not an error.
pub fn delete(topic: &str) -> Result<()> {
    validate_topic(topic)?;
    ShmRegion::unlink(topic)
}

fn header_of(region: &ShmRegion) -> &RingHeader {
    // SAFETY: `region` maps at least `size_of::<RingHeader>()` bytes
    // (enforced by `ShmRegion::create_or_attach`/`attach` refusing smaller
    // regions) and the header always lives at offset 0.
    unsafe { &*region.as_ptr().cast::<RingHeader>() }
}

fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.len() > MAX_TOPIC_LEN {
        return Err(RingError::Invalid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn unique_topic(tag: &str) -> String {
        let n = COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        format!("/ringcove_conn_test_{tag}_{}_{n}", std::process::id())
    }

    #[test]
    fn create_two_writes_two_reads() {
        let topic = unique_topic("roundtrip");
        let writer = Connection::create_or_attach(&topic, 32, 100).unwrap();
        let mut reader = Connection::attach(&topic).unwrap();

        writer.write(&[1, 2, 3, 4, 5]).unwrap();
        writer.write(&[6, 7, 8, 9, 10]).unwrap();

        let mut buf = [0u8; 32];
        let (len, _remaining) = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3, 4, 5]);

        let (len, remaining) = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[6, 7, 8, 9, 10]);
        assert_eq!(remaining, 0);

        let err = reader.read(&mut buf).unwrap_err();
        assert!(matches!(err, RingError::NoData));

        delete(&topic).unwrap();
    }

    #[test]
    fn header_mismatch_rejects_then_succeeds_after_delete() {
        let topic = unique_topic("mismatch");
        let _first = Connection::create_or_attach(&topic, 32, 100).unwrap();

        let err = Connection::create_or_attach(&topic, 32, 257).unwrap_err();
        assert!(matches!(err, RingError::Invalid));

        delete(&topic).unwrap();
        let _second = Connection::create_or_attach(&topic, 32, 257).unwrap();
        delete(&topic).unwrap();
    }

    #[test]
    fn drop_ahead_under_small_ring() {
        let topic = unique_topic("drop_ahead");
        let writer = Connection::create_or_attach(&topic, 8, 8).unwrap();
        let mut reader = Connection::attach(&topic).unwrap();

        for i in 0u8..20 {
            writer.write(&[i]).unwrap();
        }

        let mut buf = [0u8; 8];
        let (len, remaining) = reader.read(&mut buf).unwrap();
        assert_eq!(len, 1);
        assert_eq!(buf[0], 19);
        assert_eq!(remaining, 0);

        let err = reader.read(&mut buf).unwrap_err();
        assert!(matches!(err, RingError::NoData));

        delete(&topic).unwrap();
    }

    #[test]
    fn delete_nonexistent_topic_is_noop() {
        let topic = unique_topic("idempotent_delete");
        delete(&topic).unwrap();
    }

    #[test]
    fn attach_only_without_create_is_not_found() {
        let topic = unique_topic("attach_missing");
        let err = Connection::attach(&topic).unwrap_err();
        assert!(matches!(err, RingError::NotFound));
    }

    #[test]
    fn topic_name_too_long_is_invalid() {
        let topic = "x".repeat(300);
        let err = Connection::create_or_attach(&topic, 32, 100).unwrap_err();
        assert!(matches!(err, RingError::Invalid));
    }

    #[test]
    fn remaining_reflects_unread_messages() {
        let topic = unique_topic("remaining");
        let writer = Connection::create_or_attach(&topic, 32, 100).unwrap();
        let mut reader = Connection::attach(&topic).unwrap();

        assert!(reader.remaining() <= 0);
        writer.write(&[1]).unwrap();
        writer.write(&[2]).unwrap();
        assert_eq!(reader.remaining(), -2);

        let mut buf = [0u8; 32];
        reader.read(&mut buf).unwrap();
        assert_eq!(reader.remaining(), -1);

        delete(&topic).unwrap();
    }
}
