//! Cross-core messages and their opcodes.
//!
//! A message names its receiver and sender, an [`Opcode`], up to
//! [`MAX_PARAM`] parameter words and, for blocking calls, the [`ReplySlot`]
//! the sender polls. Request opcodes are answered with one of the
//! `Return*` opcodes, whose handler fills the slot on the sender's core.

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use os_core::{
    status_from_code, AlarmId, AppId, ApplicationState, CoreId, CounterId, IsrId, OsError,
    OsResult, ScheduleTableId, ScheduleTableStatus, TaskId, TaskStateType, E_OK,
};
use os_kernel::{CpuLoadQuery, RemoteReply, RemoteRequest};

use crate::sync::Arc;

/// Value of a reply slot while the answer is outstanding.
pub const WAITING_FOR_REPLY: u32 = 0xFFFF_FFFF;

/// Parameter words carried by one message.
pub const MAX_PARAM: usize = 3;

/// Operation requested by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    ActivateTask = 0,
    GetTaskState = 1,
    SetEvent = 2,
    GetEvent = 3,
    GetAlarm = 4,
    SetRelAlarm = 5,
    SetAbsAlarm = 6,
    CancelAlarm = 7,
    StartScheduleTable = 8,
    ChainScheduleTable = 9,
    StopScheduleTable = 10,
    SyncScheduleTable = 11,
    SetScheduleTableAsync = 12,
    GetScheduleTableStatus = 13,
    DisableInterruptSource = 14,
    EnableInterruptSource = 15,
    GetCount = 16,
    AdvanceCounter = 17,
    StartScheduleTableSynchron = 18,
    TerminateApplication = 19,
    GetApplicationState = 20,
    ShutdownCore = 21,
    MeasureCpuLoad = 22,
    ReturnResult = 23,
    ReturnTaskState = 24,
    ReturnTick = 25,
    ReturnEvent = 26,
    ReturnScheduleTableStatus = 27,
    ReturnApplicationState = 28,
    ReturnCpuLoad = 29,
}

impl Opcode {
    pub const ALL: [Opcode; 30] = [
        Opcode::ActivateTask,
        Opcode::GetTaskState,
        Opcode::SetEvent,
        Opcode::GetEvent,
        Opcode::GetAlarm,
        Opcode::SetRelAlarm,
        Opcode::SetAbsAlarm,
        Opcode::CancelAlarm,
        Opcode::StartScheduleTable,
        Opcode::ChainScheduleTable,
        Opcode::StopScheduleTable,
        Opcode::SyncScheduleTable,
        Opcode::SetScheduleTableAsync,
        Opcode::GetScheduleTableStatus,
        Opcode::DisableInterruptSource,
        Opcode::EnableInterruptSource,
        Opcode::GetCount,
        Opcode::AdvanceCounter,
        Opcode::StartScheduleTableSynchron,
        Opcode::TerminateApplication,
        Opcode::GetApplicationState,
        Opcode::ShutdownCore,
        Opcode::MeasureCpuLoad,
        Opcode::ReturnResult,
        Opcode::ReturnTaskState,
        Opcode::ReturnTick,
        Opcode::ReturnEvent,
        Opcode::ReturnScheduleTableStatus,
        Opcode::ReturnApplicationState,
        Opcode::ReturnCpuLoad,
    ];

    pub const fn raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(usize::try_from(raw).ok()?).copied()
    }

    /// True for the opcodes that carry an answer back to the caller.
    pub const fn is_return(self) -> bool {
        self as u32 >= Opcode::ReturnResult as u32
    }

    /// Opcode of the answer to this request.
    pub const fn reply(self) -> Option<Opcode> {
        let reply = match self {
            Opcode::GetTaskState => Opcode::ReturnTaskState,
            Opcode::GetEvent => Opcode::ReturnEvent,
            Opcode::GetAlarm | Opcode::GetCount => Opcode::ReturnTick,
            Opcode::GetScheduleTableStatus => Opcode::ReturnScheduleTableStatus,
            Opcode::GetApplicationState => Opcode::ReturnApplicationState,
            Opcode::MeasureCpuLoad => Opcode::ReturnCpuLoad,
            op if op.is_return() => return None,
            _ => Opcode::ReturnResult,
        };
        Some(reply)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Answer written by a `Return*` handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub opcode: Opcode,
    /// `StatusType` of the remote service.
    pub status: u32,
    pub value: u32,
}

impl Completion {
    /// The remote service's result as the caller sees it.
    pub fn into_reply(self) -> OsResult<RemoteReply> {
        status_from_code(self.status)?;
        decode_reply(self.opcode, self.value).ok_or(OsError::Core)
    }
}

/// Location a blocking sender polls for its answer.
#[derive(Debug)]
pub struct ReplySlot {
    status: AtomicU32,
    opcode: AtomicU32,
    value: AtomicU32,
}

impl Default for ReplySlot {
    fn default() -> Self {
        Self {
            status: AtomicU32::new(WAITING_FOR_REPLY),
            opcode: AtomicU32::new(Opcode::ReturnResult.raw()),
            value: AtomicU32::new(0),
        }
    }
}

impl ReplySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the answer. The status word is written last so a reader
    /// that sees it also sees the value.
    pub fn complete(&self, completion: Completion) {
        self.opcode.store(completion.opcode.raw(), Ordering::Relaxed);
        self.value.store(completion.value, Ordering::Relaxed);
        self.status.store(completion.status, Ordering::Release);
    }

    pub fn is_waiting(&self) -> bool {
        self.status.load(Ordering::Acquire) == WAITING_FOR_REPLY
    }

    pub fn poll(&self) -> Option<Completion> {
        let status = self.status.load(Ordering::Acquire);
        if status == WAITING_FOR_REPLY {
            return None;
        }
        let opcode = Opcode::from_raw(self.opcode.load(Ordering::Relaxed))?;
        Some(Completion {
            opcode,
            status,
            value: self.value.load(Ordering::Relaxed),
        })
    }
}

/// One entry of a core's inbound queue.
#[derive(Debug, Clone)]
pub struct Message {
    pub to: CoreId,
    pub from: CoreId,
    pub opcode: Opcode,
    pub result: Option<Arc<ReplySlot>>,
    pub params: [u32; MAX_PARAM],
}

impl Message {
    pub fn new(from: CoreId, to: CoreId, opcode: Opcode) -> Self {
        Self {
            to,
            from,
            opcode,
            result: None,
            params: [0; MAX_PARAM],
        }
    }

    pub fn params(mut self, params: &[u32]) -> Self {
        for (slot, &value) in self.params.iter_mut().zip(params) {
            *slot = value;
        }
        self
    }

    pub fn with_result(mut self, slot: Arc<ReplySlot>) -> Self {
        self.result = Some(slot);
        self
    }

    /// Encodes a kernel request.
    pub fn request(from: CoreId, to: CoreId, request: &RemoteRequest) -> Self {
        use RemoteRequest as R;

        let (opcode, params): (Opcode, [u32; MAX_PARAM]) = match *request {
            R::ActivateTask { task } => (Opcode::ActivateTask, [id(task.raw()), 0, 0]),
            R::GetTaskState { task } => (Opcode::GetTaskState, [id(task.raw()), 0, 0]),
            R::SetEvent { task, mask } => (Opcode::SetEvent, [id(task.raw()), mask, 0]),
            R::GetEvent { task } => (Opcode::GetEvent, [id(task.raw()), 0, 0]),
            R::GetAlarm { alarm } => (Opcode::GetAlarm, [id(alarm.raw()), 0, 0]),
            R::SetRelAlarm {
                alarm,
                increment,
                cycle,
            } => (Opcode::SetRelAlarm, [id(alarm.raw()), increment, cycle]),
            R::SetAbsAlarm { alarm, start, cycle } => {
                (Opcode::SetAbsAlarm, [id(alarm.raw()), start, cycle])
            }
            R::CancelAlarm { alarm } => (Opcode::CancelAlarm, [id(alarm.raw()), 0, 0]),
            R::StartScheduleTable {
                table,
                value,
                absolute,
            } => (
                Opcode::StartScheduleTable,
                [id(table.raw()), value, u32::from(absolute)],
            ),
            R::ChainScheduleTable { current, next } => (
                Opcode::ChainScheduleTable,
                [id(current.raw()), id(next.raw()), 0],
            ),
            R::StopScheduleTable { table } => (Opcode::StopScheduleTable, [id(table.raw()), 0, 0]),
            R::SyncScheduleTable { table, value } => {
                (Opcode::SyncScheduleTable, [id(table.raw()), value, 0])
            }
            R::SetScheduleTableAsync { table } => {
                (Opcode::SetScheduleTableAsync, [id(table.raw()), 0, 0])
            }
            R::GetScheduleTableStatus { table } => {
                (Opcode::GetScheduleTableStatus, [id(table.raw()), 0, 0])
            }
            R::DisableInterruptSource { isr } => {
                (Opcode::DisableInterruptSource, [id(isr.raw()), 0, 0])
            }
            R::EnableInterruptSource { isr, clear_pending } => (
                Opcode::EnableInterruptSource,
                [id(isr.raw()), u32::from(clear_pending), 0],
            ),
            R::GetCount { counter } => (Opcode::GetCount, [id(counter.raw()), 0, 0]),
            R::AdvanceCounter { counter } => (Opcode::AdvanceCounter, [id(counter.raw()), 0, 0]),
            R::StartScheduleTableSynchron { table } => {
                (Opcode::StartScheduleTableSynchron, [id(table.raw()), 0, 0])
            }
            R::TerminateApplication { app, restart } => (
                Opcode::TerminateApplication,
                [u32::from(app.raw()), u32::from(restart), 0],
            ),
            R::GetApplicationState { app } => {
                (Opcode::GetApplicationState, [u32::from(app.raw()), 0, 0])
            }
            R::ShutdownCore { error } => (
                Opcode::ShutdownCore,
                [error.map_or(E_OK, OsError::code), 0, 0],
            ),
            R::MeasureCpuLoad { query } => (Opcode::MeasureCpuLoad, [query as u32, 0, 0]),
        };
        Self {
            to,
            from,
            opcode,
            result: None,
            params,
        }
    }

    /// Decodes the kernel request carried by a request opcode. `None` for
    /// return opcodes and malformed parameters.
    pub fn decode_request(&self) -> Option<RemoteRequest> {
        use RemoteRequest as R;

        let [p0, p1, p2] = self.params;
        let request = match self.opcode {
            Opcode::ActivateTask => R::ActivateTask { task: TaskId(id16(p0)?) },
            Opcode::GetTaskState => R::GetTaskState { task: TaskId(id16(p0)?) },
            Opcode::SetEvent => R::SetEvent {
                task: TaskId(id16(p0)?),
                mask: p1,
            },
            Opcode::GetEvent => R::GetEvent { task: TaskId(id16(p0)?) },
            Opcode::GetAlarm => R::GetAlarm { alarm: AlarmId(id16(p0)?) },
            Opcode::SetRelAlarm => R::SetRelAlarm {
                alarm: AlarmId(id16(p0)?),
                increment: p1,
                cycle: p2,
            },
            Opcode::SetAbsAlarm => R::SetAbsAlarm {
                alarm: AlarmId(id16(p0)?),
                start: p1,
                cycle: p2,
            },
            Opcode::CancelAlarm => R::CancelAlarm { alarm: AlarmId(id16(p0)?) },
            Opcode::StartScheduleTable => R::StartScheduleTable {
                table: ScheduleTableId(id16(p0)?),
                value: p1,
                absolute: p2 != 0,
            },
            Opcode::ChainScheduleTable => R::ChainScheduleTable {
                current: ScheduleTableId(id16(p0)?),
                next: ScheduleTableId(id16(p1)?),
            },
            Opcode::StopScheduleTable => R::StopScheduleTable {
                table: ScheduleTableId(id16(p0)?),
            },
            Opcode::SyncScheduleTable => R::SyncScheduleTable {
                table: ScheduleTableId(id16(p0)?),
                value: p1,
            },
            Opcode::SetScheduleTableAsync => R::SetScheduleTableAsync {
                table: ScheduleTableId(id16(p0)?),
            },
            Opcode::GetScheduleTableStatus => R::GetScheduleTableStatus {
                table: ScheduleTableId(id16(p0)?),
            },
            Opcode::DisableInterruptSource => R::DisableInterruptSource { isr: IsrId(id16(p0)?) },
            Opcode::EnableInterruptSource => R::EnableInterruptSource {
                isr: IsrId(id16(p0)?),
                clear_pending: p1 != 0,
            },
            Opcode::GetCount => R::GetCount {
                counter: CounterId(id16(p0)?),
            },
            Opcode::AdvanceCounter => R::AdvanceCounter {
                counter: CounterId(id16(p0)?),
            },
            Opcode::StartScheduleTableSynchron => R::StartScheduleTableSynchron {
                table: ScheduleTableId(id16(p0)?),
            },
            Opcode::TerminateApplication => R::TerminateApplication {
                app: AppId(u8::try_from(p0).ok()?),
                restart: p1 != 0,
            },
            Opcode::GetApplicationState => R::GetApplicationState {
                app: AppId(u8::try_from(p0).ok()?),
            },
            Opcode::ShutdownCore => R::ShutdownCore {
                error: if p0 == E_OK {
                    None
                } else {
                    Some(OsError::from_code(p0)?)
                },
            },
            Opcode::MeasureCpuLoad => R::MeasureCpuLoad {
                query: CpuLoadQuery::from_raw(p0)?,
            },
            Opcode::ReturnResult
            | Opcode::ReturnTaskState
            | Opcode::ReturnTick
            | Opcode::ReturnEvent
            | Opcode::ReturnScheduleTableStatus
            | Opcode::ReturnApplicationState
            | Opcode::ReturnCpuLoad => return None,
        };
        Some(request)
    }

    /// Answer to this message carrying `status` and `value`.
    pub fn answer(&self, status: u32, value: u32) -> Option<Message> {
        let opcode = self.opcode.reply()?;
        let slot = self.result.clone()?;
        Some(
            Message::new(self.to, self.from, opcode)
                .params(&[status, value])
                .with_result(slot),
        )
    }

    /// The completion carried by a return opcode.
    pub fn completion(&self) -> Option<Completion> {
        self.opcode.is_return().then(|| Completion {
            opcode: self.opcode,
            status: self.params[0],
            value: self.params[1],
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} {} {:?}",
            self.from, self.to, self.opcode, self.params
        )
    }
}

fn id(raw: u16) -> u32 {
    u32::from(raw)
}

fn id16(raw: u32) -> Option<u16> {
    u16::try_from(raw).ok()
}

/// Typed reply for a return opcode and its value word.
pub fn decode_reply(opcode: Opcode, value: u32) -> Option<RemoteReply> {
    let reply = match opcode {
        Opcode::ReturnResult => RemoteReply::Done,
        Opcode::ReturnTaskState => RemoteReply::TaskState(TaskStateType::from_raw(value)?),
        Opcode::ReturnTick => RemoteReply::Tick(value),
        Opcode::ReturnEvent => RemoteReply::Event(value),
        Opcode::ReturnScheduleTableStatus => {
            RemoteReply::ScheduleTableStatus(ScheduleTableStatus::from_raw(value)?)
        }
        Opcode::ReturnApplicationState => {
            RemoteReply::ApplicationState(ApplicationState::from_raw(value)?)
        }
        Opcode::ReturnCpuLoad => RemoteReply::CpuLoad(u8::try_from(value).ok()?),
        _ => return None,
    };
    Some(reply)
}
