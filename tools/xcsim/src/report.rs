//! Merging of the per-core trace streams and text output.

use std::collections::HashSet;
use std::time::Duration;

use colored::Colorize;
use os_xcore::CoreReport;

use crate::{DecodeError, FrameInterpreter, HdlcDecoder, Interpreted, RecordGroup};

/// Captured bytes of one tracer.
#[derive(Debug, Clone)]
pub struct TraceStream {
    pub label: String,
    pub bytes: Vec<u8>,
}

/// A decoded record with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    pub timestamp: Option<Duration>,
    pub source: String,
    pub seq: u8,
    pub record: Interpreted,
}

/// Decodes every stream and orders the records by timestamp. Records of
/// one stream keep their order; streams without timestamps are appended
/// one after the other.
pub fn merge_streams(
    streams: &[TraceStream],
    timestamps: bool,
) -> Result<Vec<TraceLine>, DecodeError> {
    let interpreter = FrameInterpreter::new();
    let mut lines = Vec::new();
    for stream in streams {
        let mut decoder = HdlcDecoder::new(timestamps);
        for frame in decoder.push_bytes(&stream.bytes)? {
            lines.push(TraceLine {
                timestamp: frame.timestamp,
                source: stream.label.clone(),
                seq: frame.seq,
                record: interpreter.interpret(&frame),
            });
        }
    }
    if timestamps {
        lines.sort_by_key(|line| line.timestamp);
    }
    Ok(lines)
}

/// Text output options.
#[derive(Debug, Clone, Default)]
pub struct LineFormatter {
    filters: Option<HashSet<RecordGroup>>,
}

impl LineFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the output to the named record groups. Unknown names are
    /// returned.
    pub fn set_filters(&mut self, names: &[String]) -> Vec<String> {
        let mut filters = HashSet::new();
        let mut unknown = Vec::new();
        for name in names {
            match RecordGroup::parse(name) {
                Some(group) => {
                    filters.insert(group);
                }
                None => unknown.push(name.clone()),
            }
        }
        self.filters = Some(filters);
        unknown
    }

    pub fn shows(&self, line: &TraceLine) -> bool {
        self.filters
            .as_ref()
            .map_or(true, |filters| filters.contains(&line.record.group))
    }

    pub fn format(&self, line: &TraceLine) -> String {
        let time = match line.timestamp {
            Some(at) => format!("{:>10.3}ms ", at.as_secs_f64() * 1_000.0),
            None => String::new(),
        };
        let record = &line.record;
        format!(
            "{time}{source:<8} {seq:>3} {name:<18} {detail}",
            source = line.source.dimmed(),
            seq = line.seq,
            name = record.group.paint(record.name),
            detail = record.detail
        )
    }
}

/// Summary line of a core thread.
pub fn format_report(report: &CoreReport) -> String {
    let last_error = report
        .last_error
        .map_or("-", |err| err.name());
    format!(
        "{core}: {phase:?} dispatches={dispatches} preemptions={preemptions} \
         errors={errors} last={last_error} sent={sent} received={received} rejected={rejected}",
        core = report.core.to_string().bold(),
        phase = report.phase,
        dispatches = report.stats.dispatches,
        preemptions = report.stats.preemptions,
        errors = report.errors,
        sent = report.messages.sent,
        received = report.messages.received,
        rejected = report.messages.rejected,
    )
}
