//! Ring sizing, derived from the caller's `message_size`/`message_rate` at
//! connect time.
//!
//! Sizing is tied directly to a topic: there is no independent ring-size
//! knob. `RingConfig` bundles the derived `length`/`message_size`/`mask`,
//! computed once by [`crate::Connection::create_or_attach`] from the
//! caller's inputs.

use crate::error::{Result, RingError};
use crate::header::{round_up_64, round_up_pow2, RingHeader};

/// Derived ring sizing for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of slots; power of two.
    pub length: u64,
    /// Bytes per slot including the slot header; multiple of 64.
    pub message_size: u64,
}

impl RingConfig {
    /// Derives a `RingConfig` from the caller's requested payload size and
    /// message rate, per the sizing rule in the data model:
    /// `length = round_up_pow2(message_rate)`,
    /// `message_size = round_up_64(16 + payload_max)`.
    pub fn from_rate_and_payload(message_rate: u64, payload_max: u64) -> Result<Self> {
        let length = round_up_pow2(message_rate);
        let message_size = round_up_64(16 + payload_max);
        if RingHeader::region_size(length, message_size) > i64::MAX as u64 {
            return Err(RingError::Overflow);
        }
        Ok(Self {
            length,
            message_size,
        })
    }

    /// Total bytes (header + slot array) this configuration maps to.
    #[must_use]
    pub fn region_size(&self) -> u64 {
        RingHeader::region_size(self.length, self.message_size)
    }

    /// Bitmask for wrapping a slot number into `[0, length)`.
    #[must_use]
    pub fn mask(&self) -> u64 {
        self.length - 1
    }
}
