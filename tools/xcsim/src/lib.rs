//! Host-side runner for multicore OS scenarios.
//!
//! A [`Scenario`] describes a system configuration and what its tasks do.
//! The runner starts one thread per core, captures the kernel and
//! interconnect trace of each in memory and turns the HDLC frames back
//! into readable records with [`HdlcDecoder`] and [`FrameInterpreter`].

mod decoder;
mod interpreter;
pub mod report;
pub mod scenario;

pub use decoder::{DecodeError, HdlcDecoder, TraceFrame};
pub use interpreter::{FrameInterpreter, Interpreted, RecordGroup};
pub use report::{merge_streams, LineFormatter, TraceLine, TraceStream};
pub use scenario::{Scenario, ScenarioError, ScriptBody, ScriptStep, TaskScript, TickSpec};

#[cfg(test)]
mod tests;
