//! Service error reporting, protection handling and kernel panics.
//!
//! A failing service goes through [`CoreKernel::report`]: the error is stored
//! as the last error, the configured rule picks the hook (error hook,
//! protection hook or none) and the action (ignore, kill the caller, shut
//! down). The protection hook's return value replaces the configured
//! action. Each hook kind owns one bit of the nesting mask so an error
//! raised inside a hook never re-enters the same hook.

use core::fmt;

use os_core::{AppId, CoreId, IsrId, OsError, TaskId};
use os_trace::records;

use crate::dispatch::Dispatched;
use crate::kernel::{CallContext, CorePhase, CoreKernel};

/// Hook nesting bits.
pub(crate) mod nesting {
    pub const APP: u8 = 0x01;
    pub const ERR: u8 = 0x02;
    pub const PROT: u8 = 0x04;
}

/// Number of service parameters kept in [`ErrorInfo`].
pub const MAX_ERROR_PARAMS: usize = 3;

/// Service identifiers used in error reports and rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ServiceId {
    ActivateTask = 0,
    TerminateTask,
    ChainTask,
    Schedule,
    GetTaskId,
    GetTaskState,
    GetResource,
    ReleaseResource,
    SetEvent,
    ClearEvent,
    GetEvent,
    WaitEvent,
    GetAlarmBase,
    GetAlarm,
    SetRelAlarm,
    SetAbsAlarm,
    CancelAlarm,
    IncrementCounter,
    GetCounterValue,
    GetElapsedValue,
    StartScheduleTableRel,
    StartScheduleTableAbs,
    StartScheduleTableSynchron,
    NextScheduleTable,
    StopScheduleTable,
    SyncScheduleTable,
    SetScheduleTableAsync,
    GetScheduleTableStatus,
    DisableInterruptSource,
    EnableInterruptSource,
    TerminateApplication,
    AllowAccess,
    GetApplicationState,
    ShutdownOs,
    ShutdownAllCores,
    MeasureCpuLoad,
    /// Task step ended without a successful termination.
    TaskReturn,
    /// ISR returned holding resources.
    IsrReturn,
    /// Timing or lock budget exceeded.
    Protection,
    /// Cross-core message with an unknown opcode.
    UnknownCall,
}

impl ServiceId {
    pub fn name(self) -> &'static str {
        match self {
            Self::ActivateTask => "ActivateTask",
            Self::TerminateTask => "TerminateTask",
            Self::ChainTask => "ChainTask",
            Self::Schedule => "Schedule",
            Self::GetTaskId => "GetTaskID",
            Self::GetTaskState => "GetTaskState",
            Self::GetResource => "GetResource",
            Self::ReleaseResource => "ReleaseResource",
            Self::SetEvent => "SetEvent",
            Self::ClearEvent => "ClearEvent",
            Self::GetEvent => "GetEvent",
            Self::WaitEvent => "WaitEvent",
            Self::GetAlarmBase => "GetAlarmBase",
            Self::GetAlarm => "GetAlarm",
            Self::SetRelAlarm => "SetRelAlarm",
            Self::SetAbsAlarm => "SetAbsAlarm",
            Self::CancelAlarm => "CancelAlarm",
            Self::IncrementCounter => "IncrementCounter",
            Self::GetCounterValue => "GetCounterValue",
            Self::GetElapsedValue => "GetElapsedValue",
            Self::StartScheduleTableRel => "StartScheduleTableRel",
            Self::StartScheduleTableAbs => "StartScheduleTableAbs",
            Self::StartScheduleTableSynchron => "StartScheduleTableSynchron",
            Self::NextScheduleTable => "NextScheduleTable",
            Self::StopScheduleTable => "StopScheduleTable",
            Self::SyncScheduleTable => "SyncScheduleTable",
            Self::SetScheduleTableAsync => "SetScheduleTableAsync",
            Self::GetScheduleTableStatus => "GetScheduleTableStatus",
            Self::DisableInterruptSource => "DisableInterruptSource",
            Self::EnableInterruptSource => "EnableInterruptSource",
            Self::TerminateApplication => "TerminateApplication",
            Self::AllowAccess => "AllowAccess",
            Self::GetApplicationState => "GetApplicationState",
            Self::ShutdownOs => "ShutdownOS",
            Self::ShutdownAllCores => "ShutdownAllCores",
            Self::MeasureCpuLoad => "MeasureCpuLoad",
            Self::TaskReturn => "TaskReturn",
            Self::IsrReturn => "IsrReturn",
            Self::Protection => "Protection",
            Self::UnknownCall => "UnknownCall",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hook notified of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HookKind {
    None,
    ErrorHook,
    ProtectionHook,
}

/// Configured reaction to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorAction {
    /// Return the error to the caller.
    Ignore,
    /// Terminate the calling task or ISR.
    KillCaller,
    Shutdown,
}

/// Reaction chosen by the protection hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionAction {
    Ignore,
    TerminateTaskIsr,
    TerminateApplication,
    TerminateApplicationRestart,
    Shutdown,
}

impl From<ErrorAction> for ProtectionAction {
    fn from(action: ErrorAction) -> Self {
        match action {
            ErrorAction::Ignore => Self::Ignore,
            ErrorAction::KillCaller => Self::TerminateTaskIsr,
            ErrorAction::Shutdown => Self::Shutdown,
        }
    }
}

/// Hook and action used when no rule matches.
pub fn default_handling(error: OsError) -> (HookKind, ErrorAction) {
    match error {
        OsError::StackFault
        | OsError::ProtectionMemory
        | OsError::ProtectionTime
        | OsError::ProtectionArrival
        | OsError::ProtectionLocked
        | OsError::ProtectionException => (HookKind::ProtectionHook, ErrorAction::Shutdown),
        _ => (HookKind::ErrorHook, ErrorAction::Ignore),
    }
}

/// Details of the last reported error (`GetErrorInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorInfo {
    pub core: CoreId,
    pub service: ServiceId,
    pub error: OsError,
    pub params: [u32; MAX_ERROR_PARAMS],
    pub task: Option<TaskId>,
    pub isr: Option<IsrId>,
}

/// Kernel-fatal conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PanicCode {
    StackOverflow = 1,
    /// A task popped from a ready queue was not in a ready state.
    InvalidTaskState = 2,
    /// A ready queue had no seat left.
    QueueOverflow = 3,
    Unreachable = 4,
}

impl fmt::Display for PanicCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::StackOverflow => "stack overflow",
            Self::InvalidTaskState => "invalid task state",
            Self::QueueOverflow => "ready queue overflow",
            Self::Unreachable => "unreachable code",
        };
        f.write_str(text)
    }
}

/// A service invocation being checked or reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Call {
    pub sid: ServiceId,
    pub params: [u32; MAX_ERROR_PARAMS],
    len: usize,
}

impl Call {
    pub fn new(sid: ServiceId) -> Self {
        Self {
            sid,
            params: [0; MAX_ERROR_PARAMS],
            len: 0,
        }
    }

    pub fn arg(mut self, value: impl Into<u32>) -> Self {
        if self.len < MAX_ERROR_PARAMS {
            self.params[self.len] = value.into();
            self.len += 1;
        }
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct ErrorState {
    pub last: Option<ErrorInfo>,
    pub nesting: u8,
    pub reported: u64,
}

impl CoreKernel {
    /// Last error reported on this core.
    pub fn get_error_info(&self) -> Option<ErrorInfo> {
        self.errors.last
    }

    /// Number of errors reported since startup.
    pub fn error_count(&self) -> u64 {
        self.errors.reported
    }

    /// Reports `error` for `call`, runs the hooks and applies the action.
    pub(crate) fn report(&mut self, call: Call, error: OsError) -> OsError {
        let (hook, action) = self
            .config
            .error_rule(call.sid, error)
            .map(|rule| (rule.hook, rule.action))
            .unwrap_or_else(|| default_handling(error));

        let info = ErrorInfo {
            core: self.core,
            service: call.sid,
            error,
            params: call.params,
            task: self.caller_task(),
            isr: self.isr.current,
        };
        self.errors.last = Some(info);
        self.errors.reported += 1;
        log::warn!("{}: {} failed with {}", self.core, call.sid, error);
        self.emit(records::error::SERVICE, |p| {
            p.u8(call.sid as u8).u8(error.code() as u8);
        });

        let action = match hook {
            HookKind::None => action.into(),
            HookKind::ErrorHook => {
                self.run_error_hooks(&info);
                action.into()
            }
            HookKind::ProtectionHook => self.run_protection_hook(error),
        };
        self.apply_action(action, error);
        error
    }

    /// Reports and returns the error as a failed result.
    pub(crate) fn fail<T>(&mut self, call: Call, error: OsError) -> Result<T, OsError> {
        Err(self.report(call, error))
    }

    fn run_error_hooks(&mut self, info: &ErrorInfo) {
        if self.errors.nesting & nesting::ERR == 0 {
            self.errors.nesting |= nesting::ERR;
            self.with_hooks(CallContext::ErrorHook, |hooks, kernel| hooks.error(kernel, info));
            self.errors.nesting &= !nesting::ERR;
        }

        let Some(app) = self.caller_app() else {
            return;
        };
        let wants_hook = self.config.app(app).is_some_and(|cfg| cfg.error_hook);
        if wants_hook && self.errors.nesting & nesting::APP == 0 {
            self.errors.nesting |= nesting::APP;
            self.with_hooks(CallContext::ErrorHook, |hooks, kernel| {
                hooks.app_error(kernel, app, info)
            });
            self.errors.nesting &= !nesting::APP;
        }
    }

    fn run_protection_hook(&mut self, error: OsError) -> ProtectionAction {
        if self.errors.nesting & nesting::PROT != 0 {
            // Protection error inside the protection hook.
            return ProtectionAction::Shutdown;
        }
        self.errors.nesting |= nesting::PROT;
        let action = self
            .with_hooks(CallContext::ProtectionHook, |hooks, kernel| {
                hooks.protection(kernel, error)
            })
            .unwrap_or(ProtectionAction::Shutdown);
        self.errors.nesting &= !nesting::PROT;
        action
    }

    fn apply_action(&mut self, action: ProtectionAction, error: OsError) {
        match action {
            ProtectionAction::Ignore => {}
            ProtectionAction::TerminateTaskIsr => self.kill_caller(),
            ProtectionAction::TerminateApplication => {
                if let Some(app) = self.caller_app() {
                    self.terminate_app_local(app, false);
                }
            }
            ProtectionAction::TerminateApplicationRestart => {
                if let Some(app) = self.caller_app() {
                    self.terminate_app_local(app, true);
                }
            }
            ProtectionAction::Shutdown => self.shutdown(Some(error)),
        }
    }

    fn kill_caller(&mut self) {
        if let Some(isr) = self.isr.current {
            log::warn!("{}: terminating {}", self.core, isr);
            self.isr.killed = true;
            self.release_isr_locks();
        } else if let Some(task) = self.caller_task() {
            self.kill_task(task);
        } else {
            log::warn!("{}: no task or ISR to terminate", self.core);
        }
    }

    /// Task making the failed call. None inside an ISR or kernel interrupt
    /// work, where `current` is only the task that was interrupted.
    fn caller_task(&self) -> Option<TaskId> {
        if self.isr.current.is_some() || self.isr.system {
            return None;
        }
        self.current
    }

    /// Application of the task or ISR that is calling.
    pub(crate) fn caller_app(&self) -> Option<AppId> {
        if let Some(isr) = self.isr.current {
            return self.config.isr(isr).and_then(|cfg| cfg.app);
        }
        self.caller_task()
            .and_then(|task| self.config.task(task))
            .and_then(|cfg| cfg.app)
    }

    /// Stops the core without running any hook.
    pub(crate) fn panic(&mut self, code: PanicCode) -> Dispatched {
        log::error!("{}: kernel panic: {}", self.core, code);
        self.emit(records::error::PANIC, |p| {
            p.u8(code as u8);
        });
        self.phase = CorePhase::Halted(code);
        self.current = None;
        self.queues.clear();
        Dispatched::Halted
    }

    /// Orderly shutdown: runs the shutdown hook once and stops the core.
    pub(crate) fn shutdown(&mut self, error: Option<OsError>) {
        if !matches!(self.phase, CorePhase::Init | CorePhase::Running) {
            return;
        }
        self.phase = CorePhase::ShuttingDown;
        self.with_hooks(CallContext::ShutdownHook, |hooks, kernel| {
            hooks.shutdown(kernel, error)
        });
        log::info!(
            "{} shut down ({})",
            self.core,
            error.map_or("E_OK", OsError::name)
        );
        self.emit(records::error::SHUTDOWN, |p| {
            p.u8(error.map_or(0, |err| err.code() as u8));
        });
        self.phase = CorePhase::Shutdown(error);
        self.current = None;
        self.queues.clear();
    }
}
