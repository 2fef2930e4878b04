//! Binary kernel tracing with pluggable backends.
//!
//! Kernel crates describe what happened as small *records*: a one-byte record
//! identifier (see [`records`]) and a little-endian payload. The [`Tracer`]
//! frames each record in HDLC (sequence number, record id, optional
//! timestamp, payload, checksum) and hands the bytes to a [`TraceBackend`].
//! Components receive a cloneable [`TraceHook`] instead of the tracer itself.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

mod payload;

pub mod records;

pub use payload::{Payload, PayloadBuilder, MAX_PAYLOAD};

/// HDLC framing bytes.
pub mod hdlc {
    pub const FLAG: u8 = 0x7E;
    pub const ESC: u8 = 0x7D;
    pub const ESC_XOR: u8 = 0x20;
}

/// Maximum payload length for a single record (excluding header/checksum).
const DEFAULT_MAX_RECORD_LEN: usize = 64;

/// Configuration for the tracer.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub max_record_len: usize,
    pub include_timestamp: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            include_timestamp: true,
        }
    }
}

/// A single emitted record.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub seq: u8,
    pub record_type: u8,
    pub timestamp: Option<Duration>,
    pub payload: Vec<u8>,
}

/// Errors that can occur while emitting trace data.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

/// Backend trait that consumes HDLC framed bytes.
pub trait TraceBackend: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError>;
}

/// Backend that writes frames to any `Write` implementation.
pub struct WriterBackend<W: Write + Send + 'static> {
    writer: Arc<Mutex<W>>,
}

impl<W: Write + Send + 'static> WriterBackend<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

impl<W: Write + Send + 'static> TraceBackend for WriterBackend<W> {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        self.writer.lock().write_all(frame).map_err(TraceError::from)
    }
}

/// Backend that keeps every frame in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the frames captured so far.
    pub fn take_frames(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.frames.lock())
    }

    /// All captured frames concatenated into one byte stream.
    pub fn bytes(&self) -> Vec<u8> {
        self.frames.lock().concat()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceBackend for MemoryBackend {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }
}

/// HDLC frame encoder.
#[derive(Debug)]
pub struct Tracer<B: TraceBackend> {
    backend: B,
    cfg: TraceConfig,
    seq: u8,
    epoch: Instant,
}

#[derive(Clone)]
pub struct TracerHandle<B: TraceBackend> {
    inner: Arc<Mutex<Tracer<B>>>,
}

impl<B: TraceBackend> Tracer<B> {
    pub fn new(cfg: TraceConfig, backend: B) -> Self {
        Self {
            backend,
            cfg,
            seq: 0,
            epoch: Instant::now(),
        }
    }

    pub fn into_handle(self) -> TracerHandle<B> {
        TracerHandle {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    pub fn record(
        &mut self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<TraceRecord, TraceError> {
        if payload.len() > self.cfg.max_record_len {
            return Err(TraceError::PayloadTooLarge(payload.len()));
        }

        let timestamp = if self.cfg.include_timestamp && with_timestamp {
            Some(self.epoch.elapsed())
        } else {
            None
        };

        self.seq = self.seq.wrapping_add(1);
        log::trace!("trace tx record_type={record_type} len={}", payload.len());
        let record = TraceRecord {
            seq: self.seq,
            record_type,
            timestamp,
            payload: payload.to_vec(),
        };

        let frame = encode_frame(&record);
        self.backend.write_frame(&frame)?;
        Ok(record)
    }
}

/// Encodes a record as one HDLC frame terminated by [`hdlc::FLAG`].
pub fn encode_frame(record: &TraceRecord) -> Vec<u8> {
    use hdlc::{ESC, ESC_XOR, FLAG};

    let mut bytes = Vec::with_capacity(record.payload.len() + 8);
    let mut checksum: u8 = 0;

    let push_literal = |dest: &mut Vec<u8>, byte: u8| {
        if byte == FLAG || byte == ESC {
            dest.push(ESC);
            dest.push(byte ^ ESC_XOR);
        } else {
            dest.push(byte);
        }
    };

    let push_summed = |dest: &mut Vec<u8>, sum: &mut u8, byte: u8| {
        *sum = sum.wrapping_add(byte);
        push_literal(dest, byte);
    };

    push_summed(&mut bytes, &mut checksum, record.seq);
    push_summed(&mut bytes, &mut checksum, record.record_type);

    if let Some(ts) = record.timestamp {
        for byte in (ts.as_micros() as u32).to_le_bytes() {
            push_summed(&mut bytes, &mut checksum, byte);
        }
    }

    for &byte in &record.payload {
        push_summed(&mut bytes, &mut checksum, byte);
    }

    push_literal(&mut bytes, !checksum);
    bytes.push(FLAG);
    bytes
}

impl<B: TraceBackend + 'static> TracerHandle<B> {
    pub fn emit(&self, record_type: u8, payload: &[u8]) -> Result<TraceRecord, TraceError> {
        self.inner.lock().record(record_type, payload, false)
    }

    pub fn emit_with_timestamp(
        &self,
        record_type: u8,
        payload: &[u8],
    ) -> Result<TraceRecord, TraceError> {
        self.inner.lock().record(record_type, payload, true)
    }

    pub fn hook(&self) -> TraceHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |record_type, payload, with_timestamp| {
            inner
                .lock()
                .record(record_type, payload, with_timestamp)
                .map(|_| ())
        })
    }
}

pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> Result<(), TraceError> + Send + Sync>;

/// Convenience backend that writes frames to stdout.
pub fn stdout_backend() -> WriterBackend<io::Stdout> {
    WriterBackend::new(io::stdout())
}
