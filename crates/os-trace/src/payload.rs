//! Fixed-capacity payload builder for kernel records.
//!
//! Kernel records have a fixed little-endian layout, so the builder writes
//! raw fields without per-field format descriptors. Payloads live in a
//! `heapless::Vec` so emitting a record from the dispatcher never allocates.

use crate::TraceError;

/// Largest payload a kernel record carries.
pub const MAX_PAYLOAD: usize = 32;

pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;

#[derive(Debug, Default)]
pub struct PayloadBuilder {
    bytes: Payload,
    overflow: usize,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.push(&[value])
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.push(&value.to_le_bytes())
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.push(&value.to_le_bytes())
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.push(&value.to_le_bytes())
    }

    /// Returns the payload, or the length it would have needed.
    pub fn finish(&mut self) -> Result<Payload, TraceError> {
        if self.overflow > 0 {
            return Err(TraceError::PayloadTooLarge(MAX_PAYLOAD + self.overflow));
        }
        Ok(core::mem::take(&mut self.bytes))
    }

    fn push(&mut self, bytes: &[u8]) -> &mut Self {
        if self.overflow > 0 || self.bytes.extend_from_slice(bytes).is_err() {
            self.overflow += bytes.len();
        }
        self
    }
}
