use std::time::Duration;

use os_trace::hdlc::{ESC, ESC_XOR, FLAG};
use thiserror::Error;

/// One verified trace frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Sequence counter maintained by the tracer.
    pub seq: u8,
    /// Record identifier, see `os_trace::records`.
    pub record_type: u8,
    /// Time since the tracer was created, when the stream carries one.
    pub timestamp: Option<Duration>,
    /// Record payload without the timestamp.
    pub payload: Vec<u8>,
}

/// Errors produced while decoding HDLC frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short (len={0})")]
    FrameTooShort(usize),
    #[error("checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    InvalidChecksum { expected: u8, found: u8 },
}

/// Incremental HDLC decoder that accepts arbitrary byte chunks and yields
/// verified frames.
///
/// Whether frames carry the 4-byte timestamp is a property of the stream,
/// so it is fixed when the decoder is created.
#[derive(Debug, Default)]
pub struct HdlcDecoder {
    buffer: Vec<u8>,
    escape_next: bool,
    timestamps: bool,
}

impl HdlcDecoder {
    pub fn new(timestamps: bool) -> Self {
        Self {
            buffer: Vec::new(),
            escape_next: false,
            timestamps,
        }
    }

    /// Clears any partial frame state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escape_next = false;
    }

    /// Feeds raw bytes into the decoder and returns the frames completed by
    /// them. A corrupt frame aborts the chunk; the decoder is left at the
    /// start of the next frame.
    pub fn push_bytes(&mut self, input: &[u8]) -> Result<Vec<TraceFrame>, DecodeError> {
        let mut frames = Vec::new();

        for &byte in input {
            if byte == FLAG {
                self.escape_next = false;
                if !self.buffer.is_empty() {
                    let frame_bytes = std::mem::take(&mut self.buffer);
                    frames.push(self.decode_frame(&frame_bytes)?);
                }
                continue;
            }

            if self.escape_next {
                self.buffer.push(byte ^ ESC_XOR);
                self.escape_next = false;
                continue;
            }

            if byte == ESC {
                self.escape_next = true;
            } else {
                self.buffer.push(byte);
            }
        }

        Ok(frames)
    }

    fn decode_frame(&self, data: &[u8]) -> Result<TraceFrame, DecodeError> {
        let header = if self.timestamps { 6 } else { 2 };
        if data.len() < header + 1 {
            return Err(DecodeError::FrameTooShort(data.len()));
        }

        let (body, checksum) = data.split_at(data.len() - 1);
        let sum = body.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        let expected = !sum;
        if checksum[0] != expected {
            return Err(DecodeError::InvalidChecksum {
                expected,
                found: checksum[0],
            });
        }

        let timestamp = self.timestamps.then(|| {
            let micros = u32::from_le_bytes([body[2], body[3], body[4], body[5]]);
            Duration::from_micros(u64::from(micros))
        });

        Ok(TraceFrame {
            seq: body[0],
            record_type: body[1],
            timestamp,
            payload: body[header..].to_vec(),
        })
    }
}
