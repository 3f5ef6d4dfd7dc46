//! C ABI shim exposing the connect/disconnect/write/read/timing operations
//! as `#[no_mangle] extern "C"` entry points.
//!
//! This is the thin surface an out-of-process-language binding would link
//! against: opaque `Connection` pointers, `i64` negative-errno return
//! codes, raw buffer pointers. Every function here is a direct pass-through
//! to the idiomatic Rust API in [`crate::Connection`] and [`crate::timing`]
//! — callers writing Rust should use those directly and never need this
//! module.
//!
//! The allocator/deallocator parameters on `connect`/`disconnect` are
//! accepted for ABI compatibility but unused: connection objects here are
//! ordinary `Box<Connection>` values from the global Rust allocator, since
//! a C-supplied `malloc`-shaped function pointer cannot safely construct a
//! Rust value with a non-trivial destructor (`ShmRegion`'s `Drop` unmaps
//! the region). Passing a non-null allocator/deallocator is accepted and
//! ignored rather than rejected.

use std::os::raw::{c_char, c_void};
use std::slice;
use std::sync::Once;

use crate::connection::{self, Connection};
use crate::error::RingError;
use crate::timing;

/// An out-of-process caller linking against this shim has no Rust logger of
/// its own to install, so the first FFI entry point installs one from the
/// environment (`RUST_LOG`) on a best-effort basis, matching the
/// `Once`-guarded `env_logger::try_init()` pattern `hdds-c` runs at its own
/// C ABI entry points.
static INIT_LOGGER: Once = Once::new();

fn ensure_logger_initialized() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::try_init();
    });
}

/// `topic_length == -1` means "topic is NUL-terminated"; otherwise it is
/// the exact byte length. `message_size`/`message_rate` positive means
/// create-or-attach; non-positive means attach-only.
///
/// # Safety
/// `out` must be a valid, non-null pointer to a `*mut Connection` that
/// this function may overwrite. `topic` must point to at least
/// `topic_length` readable bytes (or be NUL-terminated, if
/// `topic_length == -1`).
#[no_mangle]
pub unsafe extern "C" fn ringcove_connect(
    out: *mut *mut Connection,
    topic: *const c_char,
    topic_length: i64,
    message_size: i64,
    message_rate: i64,
    _alloc: *mut c_void,
) -> i64 {
    ensure_logger_initialized();

    if out.is_null() || topic.is_null() {
        return RingError::Invalid.to_raw();
    }

    // SAFETY: caller guarantees `topic`'s byte range per this function's
    // safety contract.
    let topic = match unsafe { read_topic(topic, topic_length) } {
        Ok(t) => t,
        Err(e) => return e.to_raw(),
    };

    let result = if message_size <= 0 || message_rate <= 0 {
        Connection::attach(&topic)
    } else {
        Connection::create_or_attach(&topic, message_size as u64, message_rate as u64)
    };

    match result {
        Ok(conn) => {
            // SAFETY: `out` is non-null and writable per this function's
            // safety contract.
            unsafe { *out = Box::into_raw(Box::new(conn)) };
            0
        }
        Err(e) => {
            // SAFETY: see above.
            unsafe { *out = std::ptr::null_mut() };
            e.to_raw()
        }
    }
}

/// Idempotent on a null handle.
///
/// # Safety
/// `conn` must be a valid, non-null pointer to a `*mut Connection`
/// previously produced by [`ringcove_connect`], or point to a null
/// pointer. On return, `*conn` is always set to null.
#[no_mangle]
pub unsafe extern "C" fn ringcove_disconnect(conn: *mut *mut Connection, _dealloc: *mut c_void) {
    if conn.is_null() {
        return;
    }
    // SAFETY: `conn` is non-null per the check above, and `*conn` is
    // either null or a valid `Box::into_raw(Connection)` pointer per this
    // function's safety contract.
    unsafe {
        let ptr = *conn;
        if !ptr.is_null() {
            drop(Box::from_raw(ptr));
        }
        *conn = std::ptr::null_mut();
    }
}

/// Unlinks the name; existing mappings survive.
///
/// # Safety
/// `topic` must point to at least `topic_length` readable bytes (or be
/// NUL-terminated, if `topic_length == -1`).
#[no_mangle]
pub unsafe extern "C" fn ringcove_delete(topic: *const c_char, topic_length: i64) {
    if topic.is_null() {
        return;
    }
    // SAFETY: see `ringcove_connect`.
    if let Ok(topic) = unsafe { read_topic(topic, topic_length) } {
        let _ = connection::delete(&topic);
    }
}

/// # Safety
/// `conn` must be a valid, non-null pointer produced by
/// [`ringcove_connect`]. `payload` must point to at least `len` readable
/// bytes.
#[no_mangle]
pub unsafe extern "C" fn ringcove_write(
    conn: *mut Connection,
    payload: *const u8,
    len: i64,
) -> i64 {
    if conn.is_null() || payload.is_null() || len < 0 {
        return RingError::Invalid.to_raw();
    }
    // SAFETY: caller guarantees `conn` is a valid, live `Connection` and
    // `payload` has at least `len` readable bytes.
    let payload = unsafe { slice::from_raw_parts(payload, len as usize) };
    let conn = unsafe { &*conn };
    match conn.write(payload) {
        Ok(()) => 0,
        Err(e) => e.to_raw(),
    }
}

/// `inout_len` is the caller's buffer capacity on entry and the number of
/// bytes actually written on a successful return. The return value is the
/// number of messages still pending on success, or a negative error code.
///
/// # Safety
/// `conn` must be a valid, non-null pointer produced by
/// [`ringcove_connect`]. `buffer` must point to at least `*inout_len`
/// writable bytes. `inout_len` must be non-null.
#[no_mangle]
pub unsafe extern "C" fn ringcove_read(
    conn: *mut Connection,
    buffer: *mut u8,
    inout_len: *mut i64,
) -> i64 {
    if conn.is_null() || buffer.is_null() || inout_len.is_null() {
        return RingError::Invalid.to_raw();
    }
    // SAFETY: caller guarantees `inout_len` is readable and `buffer` has
    // at least that many writable bytes.
    let capacity = unsafe { *inout_len };
    if capacity < 0 {
        return RingError::Invalid.to_raw();
    }
    // SAFETY: `conn` is a valid, live `Connection`; exclusive access is
    // the caller's responsibility, matching the single-reader-per-handle
    // contract of `Connection`.
    let conn = unsafe { &mut *conn };
    let out = unsafe { slice::from_raw_parts_mut(buffer, capacity as usize) };
    match conn.read(out) {
        Ok((len, remaining)) => {
            // SAFETY: see above.
            unsafe { *inout_len = len as i64 };
            remaining
        }
        Err(e) => e.to_raw(),
    }
}

/// Current raw cycle-counter reading.
#[no_mangle]
pub extern "C" fn ringcove_now() -> u64 {
    timing::now()
}

/// Calibrated nanoseconds between two cycle-counter readings (`stop -
/// start`).
#[no_mangle]
pub extern "C" fn ringcove_ns(stop: u64, start: u64) -> f64 {
    timing::ns(stop, start)
}

/// Feeds an external wall-clock nanosecond measurement into the
/// ticks-per-nanosecond calibration.
#[no_mangle]
pub extern "C" fn ringcove_ns_calibrate(nanoseconds: f64) {
    timing::calibrate(nanoseconds);
}

/// Hybrid busy-spin/OS-sleep pause for approximately `nanoseconds`.
#[no_mangle]
pub extern "C" fn ringcove_sleep(nanoseconds: f64) {
    timing::sleep(nanoseconds);
}

unsafe fn read_topic(topic: *const c_char, topic_length: i64) -> crate::error::Result<String> {
    if topic_length < -1 || topic_length > connection::MAX_TOPIC_LEN as i64 {
        return Err(RingError::Invalid);
    }
    let bytes: &[u8] = if topic_length == -1 {
        // SAFETY: caller guarantees `topic` is NUL-terminated in this mode.
        unsafe { std::ffi::CStr::from_ptr(topic) }.to_bytes()
    } else {
        // SAFETY: caller guarantees `topic` has at least `topic_length`
        // readable bytes in this mode.
        unsafe { slice::from_raw_parts(topic.cast::<u8>(), topic_length as usize) }
    };
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| RingError::Invalid)
}
