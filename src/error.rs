use thiserror::Error;

/// Error codes returned by ring operations.
///
/// These mirror the language-neutral negative return codes of the core ABI
/// (see `ffi`): each variant here maps to exactly one of them.
#[derive(Debug, Error)]
pub enum RingError {
    /// Bad arguments; buffer too small for payload; header mismatch on attach.
    #[error("invalid argument")]
    Invalid,

    /// Attach-only requested but the named region does not exist.
    #[error("topic not found")]
    NotFound,

    /// Allocation or mapping failed.
    #[error("out of memory")]
    NoMem,

    /// Payload larger than a slot minus the 16-byte slot header.
    #[error("message too large for a slot")]
    MsgSize,

    /// Ring uninitialised or has zero length.
    #[error("ring not initialised")]
    Pipe,

    /// Reservation or publish exceeded the timeout.
    #[error("operation timed out")]
    Timeout,

    /// Slot header indicates an impossible length (reader lapped mid-copy).
    #[error("corrupted message, retry")]
    BadMsg,

    /// Ring has no publications yet.
    #[error("no data published yet")]
    NoData,

    /// Computed region size exceeds the platform's representable size.
    #[error("computed region size overflows")]
    Overflow,

    /// A region or file-descriptor operation on the underlying OS failed.
    #[error("shared memory operation failed: {0}")]
    Io(#[source] std::io::Error),
}

impl RingError {
    /// The negative `errno`-shaped code used by the C ABI in `ffi`.
    #[must_use]
    pub fn to_raw(&self) -> i64 {
        let code = match self {
            RingError::Invalid => libc::EINVAL,
            RingError::NotFound => libc::ENOENT,
            RingError::NoMem => libc::ENOMEM,
            RingError::MsgSize => libc::EMSGSIZE,
            RingError::Pipe => libc::EPIPE,
            RingError::Timeout => libc::ETIMEDOUT,
            RingError::BadMsg => libc::EBADMSG,
            RingError::NoData => return -1,
            RingError::Overflow => libc::EOVERFLOW,
            RingError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        };
        -i64::from(code)
    }
}

pub type Result<T> = std::result::Result<T, RingError>;
