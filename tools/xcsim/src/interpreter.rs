use std::fmt::Write;

use colored::{ColoredString, Colorize};
use os_core::{status_from_code, AlarmId, CoreId, IsrId, ResourceId, ScheduleTableId, TaskId};
use os_trace::records::{self, alarm, error, isr, resource, sched, task, xcore};
use os_xcore::Opcode;

use crate::TraceFrame;

/// Family of a trace record, used to colour the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordGroup {
    Task,
    Scheduler,
    Resource,
    Error,
    Counter,
    Interrupt,
    CrossCore,
    Unknown,
}

impl RecordGroup {
    pub fn of(record: u8) -> Self {
        match record {
            task::ACTIVATE..=task::WAKE => Self::Task,
            sched::IDLE | sched::HALT => Self::Scheduler,
            resource::GET | resource::RELEASE => Self::Resource,
            error::SERVICE..=error::SHUTDOWN => Self::Error,
            alarm::EXPIRE | alarm::EXPIRY_POINT => Self::Counter,
            isr::ENTER | isr::EXIT => Self::Interrupt,
            xcore::SEND..=xcore::QUEUE_FULL => Self::CrossCore,
            _ => Self::Unknown,
        }
    }

    /// Parses a `--only` filter name.
    pub fn parse(name: &str) -> Option<Self> {
        let group = match name.to_lowercase().as_str() {
            "task" => Self::Task,
            "sched" | "scheduler" => Self::Scheduler,
            "res" | "resource" => Self::Resource,
            "err" | "error" => Self::Error,
            "alarm" | "counter" => Self::Counter,
            "isr" | "interrupt" => Self::Interrupt,
            "xc" | "xcore" => Self::CrossCore,
            _ => return None,
        };
        Some(group)
    }

    pub fn paint(self, text: &str) -> ColoredString {
        match self {
            Self::Task => text.bright_green(),
            Self::Scheduler => text.bright_white(),
            Self::Resource => text.magenta(),
            Self::Error => text.bright_red(),
            Self::Counter => text.bright_yellow(),
            Self::Interrupt => text.cyan(),
            Self::CrossCore => text.bright_blue(),
            Self::Unknown => text.normal(),
        }
    }
}

/// A frame rendered as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreted {
    pub group: RecordGroup,
    pub name: &'static str,
    pub detail: String,
}

/// Translates trace frames into human readable records.
#[derive(Debug, Default)]
pub struct FrameInterpreter;

impl FrameInterpreter {
    pub fn new() -> Self {
        Self
    }

    pub fn interpret(&self, frame: &TraceFrame) -> Interpreted {
        let group = RecordGroup::of(frame.record_type);
        let mut cur = Cursor::new(&frame.payload);
        let detail = match frame.record_type {
            task::ACTIVATE..=task::WAKE => cur
                .read_u16()
                .zip(cur.read_u16())
                .map(|(id, prio)| format!("{} prio={prio}", TaskId(id))),
            sched::IDLE | sched::HALT => Some(String::new()),
            resource::GET | resource::RELEASE => cur
                .read_u16()
                .zip(cur.read_u16())
                .map(|(id, prio)| format!("{} prio={prio}", ResourceId(id))),
            error::SERVICE => cur
                .read_u8()
                .zip(cur.read_u8())
                .map(|(sid, code)| format!("service={sid} {}", status_name(code))),
            error::PANIC => cur.read_u8().map(|code| format!("code={code}")),
            error::SHUTDOWN => cur.read_u8().map(status_name),
            alarm::EXPIRE => cur
                .read_u16()
                .zip(cur.read_u32())
                .map(|(id, value)| format!("{} at={value}", AlarmId(id))),
            alarm::EXPIRY_POINT => cur
                .read_u16()
                .zip(cur.read_u32())
                .map(|(id, offset)| format!("{} offset={offset}", ScheduleTableId(id))),
            isr::ENTER | isr::EXIT => cur.read_u16().map(|id| IsrId(id).to_string()),
            xcore::SEND..=xcore::QUEUE_FULL => {
                match (cur.read_u8(), cur.read_u8(), cur.read_u8()) {
                    (Some(from), Some(to), Some(op)) => Some(format!(
                        "{} -> {} {}",
                        CoreId(from),
                        CoreId(to),
                        opcode_name(op)
                    )),
                    _ => None,
                }
            }
            _ => None,
        };

        match (records::name(frame.record_type), detail) {
            (Some(name), Some(detail)) => Interpreted {
                group,
                name,
                detail,
            },
            (name, _) => Interpreted {
                group,
                name: name.unwrap_or("UNKNOWN"),
                detail: fallback_detail(frame),
            },
        }
    }
}

fn status_name(code: u8) -> String {
    match status_from_code(u32::from(code)) {
        Ok(()) => "E_OK".to_string(),
        Err(err) => err.name().to_string(),
    }
}

fn opcode_name(raw: u8) -> String {
    match Opcode::from_raw(u32::from(raw)) {
        Some(op) => op.to_string(),
        None => format!("opcode={raw}"),
    }
}

fn fallback_detail(frame: &TraceFrame) -> String {
    format!(
        "rec 0x{record:02X} len={len} payload={payload}",
        record = frame.record_type,
        len = frame.payload.len(),
        payload = hex_bytes(&frame.payload)
    )
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02X}");
    }
    out
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bytes(&mut self, count: usize) -> Option<&'a [u8]> {
        let slice = self.data.get(self.pos..self.pos + count)?;
        self.pos += count;
        Some(slice)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
