//! Ring header and slot layout.
//!
//! The header sits at the front of the mapped shared-memory region, one
//! field per 64-byte cache line so that producers and consumers hammering
//! different atomics never false-share. The slot array immediately follows,
//! cache-line aligned, each slot holding a small non-atomic header
//! (`write_stamp`, `payload_len`) plus the raw payload bytes.
//!
//! Nothing in this module synchronises anything by itself; it only defines
//! the byte layout and raw accessors. The concurrency protocol lives in
//! `ring`.

use std::sync::atomic::AtomicU64;

/// Every per-field padding step and every slot is aligned to this boundary.
pub const CACHE_LINE: usize = 64;

/// Fixed size of the per-slot header: `write_stamp` (8 bytes) + `payload_len`
/// (8 bytes), fixed at 16 regardless of target.
pub const SLOT_HEADER_SIZE: usize = 16;

/// Rounds `n` up to the next multiple of 64.
#[must_use]
pub const fn round_up_64(n: u64) -> u64 {
    (n + 63) & !63
}

/// Rounds `n` up to the next power of two (returns 1 for `n == 0`).
#[must_use]
pub fn round_up_pow2(n: u64) -> u64 {
    n.max(1).next_power_of_two()
}

/// The ring header, occupying the first `size_of::<RingHeader>()` bytes of
/// the mapped region. `size_of::<RingHeader>()` is itself a multiple of 64
/// since it is six cache lines back to back.
///
/// # Layout
///
/// The header interleaves a plain `u64` and four atomics of different
/// purpose, so each field gets its own explicit trailing pad array sized
/// to fill out the rest of its cache line (`CACHE_LINE - 8` bytes) rather
/// than a generic wrapper type.
#[repr(C)]
pub struct RingHeader {
    /// Number of slots. Power of two, fixed at creation.
    pub length: u64,
    _pad_length: [u8; CACHE_LINE - 8],

    /// Bytes per slot including the 16-byte slot header. Multiple of 64,
    /// fixed at creation.
    pub message_size: u64,
    _pad_message_size: [u8; CACHE_LINE - 8],

    /// Next slot number a writer may claim.
    pub reserve: AtomicU64,
    _pad_reserve: [u8; CACHE_LINE - 8],

    /// Next slot number that has not yet been committed. `index <= reserve`.
    pub index: AtomicU64,
    _pad_index: [u8; CACHE_LINE - 8],

    /// Cycle counter of the most recent commit or lock-clear.
    pub updatestamp: AtomicU64,
    _pad_updatestamp: [u8; CACHE_LINE - 8],

    /// Zero when healthy; otherwise the cycle counter captured when a
    /// writer began stalling.
    pub locked: AtomicU64,
    _pad_locked: [u8; CACHE_LINE - 8],
}

const _: () = assert!(std::mem::size_of::<RingHeader>() % CACHE_LINE == 0);

impl RingHeader {
    /// Size of the header, rounded up to a cache-line multiple (already is,
    /// but callers compute offsets through this rather than `size_of`
    /// directly, matching spec arithmetic that always wraps sizes in
    /// `round_up_64`).
    #[must_use]
    pub fn header_size() -> u64 {
        round_up_64(std::mem::size_of::<Self>() as u64)
    }

    /// Total region size required for `length` slots of `message_size`
    /// bytes each, including the header.
    #[must_use]
    pub fn region_size(length: u64, message_size: u64) -> u64 {
        Self::header_size() + length * message_size
    }

    /// Zero-initialises a freshly mapped header in place (fresh-create
    /// path only; an attached-to existing header must never be touched
    /// here).
    ///
    /// # Safety
    /// `ptr` must point to at least `header_size()` writable bytes, and no
    /// other thread or process may be concurrently reading or writing
    /// through it.
    pub unsafe fn init_in_place(ptr: *mut RingHeader, length: u64, message_size: u64) {
        // SAFETY: caller guarantees `ptr` is valid, exclusively owned
        // writable memory for the header's lifetime.
        unsafe {
            std::ptr::write(
                ptr,
                RingHeader {
                    length,
                    _pad_length: [0; CACHE_LINE - 8],
                    message_size,
                    _pad_message_size: [0; CACHE_LINE - 8],
                    reserve: AtomicU64::new(0),
                    _pad_reserve: [0; CACHE_LINE - 8],
                    index: AtomicU64::new(0),
                    _pad_index: [0; CACHE_LINE - 8],
                    updatestamp: AtomicU64::new(0),
                    _pad_updatestamp: [0; CACHE_LINE - 8],
                    locked: AtomicU64::new(0),
                    _pad_locked: [0; CACHE_LINE - 8],
                },
            );
        }
    }
}

/// Byte offset of slot `slot_number` within the region (header included).
#[must_use]
pub fn slot_offset(slot_number: u64, length: u64, message_size: u64) -> u64 {
    debug_assert!(length.is_power_of_two());
    RingHeader::header_size() + (slot_number & (length - 1)) * message_size
}

/// Raw accessors into one slot's bytes. All reads/writes go through
/// `ptr::read_unaligned`/`write_unaligned`-equivalent volatile accesses
/// rather than a typed `#[repr(C)]` struct, because the payload region
/// between slots varies with the caller's configured `message_size` and
/// cannot be expressed as a single Rust type. Non-atomic by design: the
/// protocol in `ring` never reads a slot's contents until it has observed,
/// via the header's acquire/release atomics, that the writer's publish has
/// completed.
pub struct SlotView {
    ptr: *mut u8,
}

impl SlotView {
    /// # Safety
    /// `ptr` must point to at least `message_size` valid bytes belonging to
    /// this slot, for the duration the returned `SlotView` is used.
    #[must_use]
    pub unsafe fn new(ptr: *mut u8) -> Self {
        Self { ptr }
    }

    #[must_use]
    pub fn write_stamp(&self) -> u64 {
        // SAFETY: slot pointer is valid and 8-byte aligned per
        // `message_size`'s 64-byte alignment invariant.
        unsafe { std::ptr::read_volatile(self.ptr.cast::<u64>()) }
    }

    pub fn set_write_stamp(&mut self, stamp: u64) {
        // SAFETY: see `write_stamp`.
        unsafe { std::ptr::write_volatile(self.ptr.cast::<u64>(), stamp) }
    }

    #[must_use]
    pub fn payload_len(&self) -> i64 {
        // SAFETY: see `write_stamp`; offset 8 is within the slot header.
        unsafe { std::ptr::read_volatile(self.ptr.add(8).cast::<i64>()) }
    }

    pub fn set_payload_len(&mut self, len: i64) {
        // SAFETY: see `payload_len`.
        unsafe { std::ptr::write_volatile(self.ptr.add(8).cast::<i64>(), len) }
    }

    /// Pointer to the first payload byte, immediately after the slot header.
    #[must_use]
    pub fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: offset `SLOT_HEADER_SIZE` is within the slot by
        // construction of `message_size >= SLOT_HEADER_SIZE`.
        unsafe { self.ptr.add(SLOT_HEADER_SIZE) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_64_examples() {
        assert_eq!(round_up_64(0), 0);
        assert_eq!(round_up_64(1), 64);
        assert_eq!(round_up_64(64), 64);
        assert_eq!(round_up_64(65), 128);
    }

    #[test]
    fn round_up_pow2_examples() {
        assert_eq!(round_up_pow2(0), 1);
        assert_eq!(round_up_pow2(1), 1);
        assert_eq!(round_up_pow2(100), 128);
        assert_eq!(round_up_pow2(257), 512);
        assert_eq!(round_up_pow2(8), 8);
    }

    #[test]
    fn header_size_is_cache_line_multiple() {
        assert_eq!(RingHeader::header_size() % CACHE_LINE as u64, 0);
    }

    #[test]
    fn region_size_matches_spec_formula() {
        let length = round_up_pow2(100);
        let message_size = round_up_64(16 + 32);
        let expected = RingHeader::header_size() + length * message_size;
        assert_eq!(RingHeader::region_size(length, message_size), expected);
    }

    #[test]
    fn slot_offset_wraps_with_mask() {
        let length = 8;
        let message_size = 64;
        let base = RingHeader::header_size();
        assert_eq!(slot_offset(0, length, message_size), base);
        assert_eq!(slot_offset(8, length, message_size), base);
        assert_eq!(slot_offset(9, length, message_size), base + message_size);
    }
}
