//! The lock-free ring-buffer protocol: reservation, publication,
//! back-pressure, stall detection/recovery, and drop-when-behind
//! consumption.
//!
//! Everything here operates on a `&RingHeader` plus the mapped region's base
//! pointer; it knows nothing about shared-memory lifecycle (`region`) or
//! per-process bookkeeping (`connection`) — those layer on top of this
//! module's free functions.

use std::sync::atomic::Ordering;

use crate::backoff::Backoff;
use crate::error::{Result, RingError};
use crate::header::{self, RingHeader, SlotView};
use crate::invariants;
use crate::timing;

/// Default writer timeout, in nanoseconds. Reservation and publication each
/// get half this budget.
pub const TIMEOUT_NS: f64 = 250_000_000.0;

/// Outcome of a successful [`read`].
#[derive(Debug, Clone, Copy)]
pub struct ReadOutcome {
    /// Number of payload bytes copied into the caller's buffer.
    pub len: usize,
    /// Number of committed messages still pending after this one.
    pub remaining: i64,
}

/// Writes `payload` into the next slot, blocking (bounded by [`TIMEOUT_NS`])
/// on reservation contention and on publish ordering.
///
/// # Safety
/// `base` must point to a mapped region of at least
/// `RingHeader::region_size(header.length, header.message_size)` bytes,
/// and `header` must be the header living at the front of that same region.
pub unsafe fn write(header: &RingHeader, base: *mut u8, payload: &[u8]) -> Result<()> {
    // Two independent half-timeout budgets, per spec: one for reservation
    // (its own wall time from here), one shared by everything from a
    // successful reservation through publish (back-pressure wait, payload
    // copy is unclocked, publish wait), so the total across both phases is
    // bounded by TIMEOUT.
    let reservation_start = timing::now();

    if header.length == 0 {
        return Err(RingError::Pipe);
    }

    let max_payload = header.message_size as i64 - header::SLOT_HEADER_SIZE as i64;
    if payload.len() as i64 > max_payload {
        return Err(RingError::MsgSize);
    }

    // Stall check. A single write attempt never both unlocks and
    // publishes; it surfaces TIMEOUT and lets the caller retry.
    let locktime = header.locked.load(Ordering::Relaxed);
    if locktime != 0 {
        recover(header, locktime);
        return Err(RingError::Timeout);
    }

    let mut backoff = Backoff::new();

    // 1. Reserve a slot.
    let mut my_reserve = header.reserve.load(Ordering::Relaxed);
    loop {
        match header.reserve.compare_exchange_weak(
            my_reserve,
            my_reserve + 1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => {
                my_reserve = actual;
                if timing::ns(timing::now(), reservation_start) > TIMEOUT_NS / 2.0 {
                    return Err(RingError::Timeout);
                }
                backoff.snooze();
            }
        }
    }

    invariants::debug_assert_reserve_within_ring!(
        my_reserve + 1,
        header.index.load(Ordering::Relaxed),
        header.length
    );

    // Reservation succeeded: the remaining back-pressure-wait/publish-wait
    // steps share one fresh TIMEOUT/2 budget, so the two named phases
    // (reservation, publish) sum to at most TIMEOUT as a whole.
    let publish_phase_start = timing::now();

    // 2. Back-pressure wait: never more than half a ring ahead of the
    // committed tail.
    backoff.reset();
    while my_reserve - header.index.load(Ordering::Relaxed) > header.length / 2 {
        if timing::ns(timing::now(), publish_phase_start) > TIMEOUT_NS / 2.0 {
            header.locked.store(timing::now(), Ordering::Relaxed);
            return Err(RingError::Timeout);
        }
        backoff.snooze();
    }

    // 3. Copy the payload into our exclusively reserved slot.
    let offset = header::slot_offset(my_reserve, header.length, header.message_size);
    invariants::debug_assert_payload_len_in_bounds!(payload.len() as i64, max_payload);
    // SAFETY: `my_reserve` was exclusively claimed by this thread via the
    // CAS above; no other writer touches this slot until we publish by
    // advancing `index` past it.
    let mut slot = unsafe { SlotView::new(base.add(offset as usize)) };
    slot.set_write_stamp(timing::now());
    slot.set_payload_len(payload.len() as i64);
    // SAFETY: `slot.payload_ptr()` has room for `message_size -
    // SLOT_HEADER_SIZE` bytes and `payload.len() <= max_payload` was
    // checked above.
    unsafe {
        std::ptr::copy_nonoverlapping(payload.as_ptr(), slot.payload_ptr(), payload.len());
    }

    // 4. Publish wait: serialise commits in reservation order.
    backoff.reset();
    while header.index.load(Ordering::Relaxed) != my_reserve {
        if timing::ns(timing::now(), publish_phase_start) > TIMEOUT_NS / 2.0 {
            header.locked.store(reservation_start, Ordering::Release);
            return Err(RingError::Timeout);
        }
        backoff.snooze();
    }

    invariants::debug_assert_index_not_past_reserve!(
        my_reserve,
        header.reserve.load(Ordering::Relaxed)
    );

    header.updatestamp.store(timing::now(), Ordering::Relaxed);
    header.index.store(my_reserve + 1, Ordering::Release);

    Ok(())
}

/// Attempts to recover a stalled ring. Called by the next writer to
/// observe a non-zero `locked`. Logs at `warn` level on a successful
/// recovery since it means a prior writer was judged dead.
///
/// Known limitation (carried from the reference implementation): the lock
/// is released without waiting for any in-flight writer that might still
/// resume and complete its own publish. Such a writer simply re-enters its
/// own bounded wait and self-ejects via its own timeout; there is no
/// generation counter to detect and reject a stale resumption more
/// strongly.
fn recover(header: &RingHeader, locktime: u64) {
    let now = timing::now();

    if locktime == 0 {
        return;
    }

    if timing::ns(now, locktime) <= TIMEOUT_NS {
        // Not yet stale enough; a brief stall is not a crash.
        return;
    }

    if header
        .locked
        .compare_exchange(locktime, now, Ordering::Relaxed, Ordering::Relaxed)
        .is_err()
    {
        // Someone else is already recovering.
        return;
    }

    let stale_index = header.index.load(Ordering::Relaxed);
    header.reserve.store(stale_index, Ordering::Relaxed);
    header.updatestamp.store(now, Ordering::Relaxed);
    header.locked.store(0, Ordering::Release);

    log::warn!(
        "recovered stalled ring: reset reserve to index {stale_index}, stall lasted {:.1} ms",
        timing::ns(now, locktime) / 1e6
    );
}

/// Reads the next unconsumed message for a reader holding `read_index`/
/// `read_stamp`, applying drop-when-behind if the reader has fallen more
/// than half a ring behind or has gone stale for longer than
/// [`TIMEOUT_NS`].
///
/// # Safety
/// Same preconditions as [`write`].
pub unsafe fn read(
    header: &RingHeader,
    base: *mut u8,
    read_index: &mut u64,
    read_stamp: &mut u64,
    out: &mut [u8],
) -> Result<ReadOutcome> {
    if header.length == 0 {
        return Err(RingError::Pipe);
    }

    let write_cursor = header.index.load(Ordering::Acquire);
    let now = timing::now();

    if *read_index == write_cursor {
        *read_stamp = now;
        return Err(RingError::NoData);
    }

    let distance = write_cursor - *read_index;
    let time_delta = timing::ns(header.updatestamp.load(Ordering::Relaxed), *read_stamp);
    if distance > header.length / 2 || (time_delta > TIMEOUT_NS && write_cursor > *read_index) {
        let old = *read_index;
        *read_index = write_cursor - 1;
        invariants::debug_assert_cursor_monotonic!(old, *read_index);
    }

    let offset = header::slot_offset(*read_index, header.length, header.message_size);
    // SAFETY: `*read_index mod length` names a slot whose global number is
    // `< write_cursor`, which per the header's invariants has been
    // committed by some writer and is therefore readable.
    let slot = unsafe { SlotView::new(base.add(offset as usize)) };

    let max_payload = header.message_size as i64 - header::SLOT_HEADER_SIZE as i64;
    let payload_len = slot.payload_len();
    if payload_len < 0 || payload_len > max_payload {
        // The writer at this slot position has lapped us mid-copy; retry.
        return Err(RingError::BadMsg);
    }

    if (out.len() as i64) < payload_len {
        return Err(RingError::Invalid);
    }

    // SAFETY: `payload_len` was just bounds-checked against both the slot
    // capacity and the caller's buffer length.
    unsafe {
        std::ptr::copy_nonoverlapping(slot.payload_ptr(), out.as_mut_ptr(), payload_len as usize);
    }

    let old = *read_index;
    *read_index += 1;
    *read_stamp = now;
    invariants::debug_assert_cursor_monotonic!(old, *read_index);

    Ok(ReadOutcome {
        len: payload_len as usize,
        remaining: write_cursor as i64 - *read_index as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::RingHeader;

    fn make_ring(length: u64, message_size: u64) -> (Vec<u8>, *mut u8) {
        let size = RingHeader::region_size(length, message_size) as usize;
        let mut buf = vec![0u8; size];
        let base = buf.as_mut_ptr();
        unsafe {
            RingHeader::init_in_place(base.cast::<RingHeader>(), length, message_size);
        }
        (buf, base)
    }

    fn header_of(base: *mut u8) -> &'static RingHeader {
        unsafe { &*(base.cast::<RingHeader>()) }
    }

    #[test]
    fn write_then_read_round_trip() {
        let (_buf, base) = make_ring(8, 64);
        let header = header_of(base);

        unsafe { write(header, base, b"hello").unwrap() };

        let mut read_index = 0u64;
        let mut read_stamp = 0u64;
        let mut out = [0u8; 64];
        let outcome =
            unsafe { read(header, base, &mut read_index, &mut read_stamp, &mut out).unwrap() };
        assert_eq!(outcome.len, 5);
        assert_eq!(&out[..5], b"hello");
        assert_eq!(outcome.remaining, 0);
    }

    #[test]
    fn read_before_any_write_is_no_data() {
        let (_buf, base) = make_ring(8, 64);
        let header = header_of(base);
        let mut read_index = 0u64;
        let mut read_stamp = 0u64;
        let mut out = [0u8; 64];
        let err = unsafe {
            read(header, base, &mut read_index, &mut read_stamp, &mut out).unwrap_err()
        };
        assert!(matches!(err, RingError::NoData));
    }

    #[test]
    fn second_read_after_catching_up_is_no_data() {
        let (_buf, base) = make_ring(8, 64);
        let header = header_of(base);
        unsafe { write(header, base, b"one").unwrap() };

        let mut read_index = 0u64;
        let mut read_stamp = 0u64;
        let mut out = [0u8; 64];
        unsafe { read(header, base, &mut read_index, &mut read_stamp, &mut out).unwrap() };
        let err = unsafe {
            read(header, base, &mut read_index, &mut read_stamp, &mut out).unwrap_err()
        };
        assert!(matches!(err, RingError::NoData));
    }

    #[test]
    fn message_too_large_is_rejected() {
        let (_buf, base) = make_ring(8, 64);
        let header = header_of(base);
        let payload = vec![0u8; 64];
        let err = unsafe { write(header, base, &payload).unwrap_err() };
        assert!(matches!(err, RingError::MsgSize));
    }

    #[test]
    fn drop_ahead_reader_gets_only_latest() {
        let (_buf, base) = make_ring(8, 64);
        let header = header_of(base);
        for i in 0..20u8 {
            unsafe { write(header, base, &[i]).unwrap() };
        }

        let mut read_index = 0u64;
        let mut read_stamp = 0u64;
        let mut out = [0u8; 64];
        let outcome =
            unsafe { read(header, base, &mut read_index, &mut read_stamp, &mut out).unwrap() };
        assert_eq!(out[0], 19);
        assert_eq!(outcome.remaining, 0);

        let err = unsafe {
            read(header, base, &mut read_index, &mut read_stamp, &mut out).unwrap_err()
        };
        assert!(matches!(err, RingError::NoData));
    }

    #[test]
    fn buffer_too_small_does_not_advance_cursor() {
        let (_buf, base) = make_ring(8, 64);
        let header = header_of(base);
        unsafe { write(header, base, b"hello").unwrap() };

        let mut read_index = 0u64;
        let mut read_stamp = 0u64;
        let mut tiny = [0u8; 2];
        let err = unsafe {
            read(header, base, &mut read_index, &mut read_stamp, &mut tiny).unwrap_err()
        };
        assert!(matches!(err, RingError::Invalid));
        assert_eq!(read_index, 0);

        let mut out = [0u8; 64];
        let outcome =
            unsafe { read(header, base, &mut read_index, &mut read_stamp, &mut out).unwrap() };
        assert_eq!(&out[..5], b"hello");
        assert_eq!(outcome.len, 5);
    }

    #[test]
    fn stall_recovery_resets_reserve_to_index() {
        let (_buf, base) = make_ring(8, 64);
        let header = header_of(base);

        // Force a stall far enough in the past to be recoverable. The
        // margin is generous (100x the timeout, in raw tick units) so the
        // test is robust to any plausible ticks-per-nanosecond ratio.
        let stale = timing::now().wrapping_sub((TIMEOUT_NS * 100.0) as u64);
        header.reserve.store(5, Ordering::Relaxed);
        header.locked.store(stale, Ordering::Relaxed);

        let err = unsafe { write(header, base, b"x").unwrap_err() };
        assert!(matches!(err, RingError::Timeout));
        assert_eq!(header.locked.load(Ordering::Relaxed), 0);
        assert_eq!(
            header.reserve.load(Ordering::Relaxed),
            header.index.load(Ordering::Relaxed)
        );

        // The ring is healthy again.
        unsafe { write(header, base, b"ok").unwrap() };
    }
}
