//! Forwarding of services on objects owned by other cores.
//!
//! The kernel only knows the typed [`RemoteRequest`]; the cross-core layer
//! implements [`RemoteCall`] and turns requests into messages for the
//! owning core.

use std::sync::Arc;

use os_core::{
    AlarmId, AppId, ApplicationState, CoreId, CounterId, EventMask, IsrId, OsError, OsResult,
    ScheduleTableId, ScheduleTableStatus, TaskId, TaskStateType, TickType,
};

use crate::cpuload::CpuLoadQuery;
use crate::error::Call;
use crate::kernel::CoreKernel;

/// A service executed on the owning core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteRequest {
    ActivateTask { task: TaskId },
    GetTaskState { task: TaskId },
    SetEvent { task: TaskId, mask: EventMask },
    GetEvent { task: TaskId },
    GetAlarm { alarm: AlarmId },
    SetRelAlarm { alarm: AlarmId, increment: TickType, cycle: TickType },
    SetAbsAlarm { alarm: AlarmId, start: TickType, cycle: TickType },
    CancelAlarm { alarm: AlarmId },
    /// `absolute` selects `StartScheduleTableAbs` over `Rel`.
    StartScheduleTable { table: ScheduleTableId, value: TickType, absolute: bool },
    ChainScheduleTable { current: ScheduleTableId, next: ScheduleTableId },
    StopScheduleTable { table: ScheduleTableId },
    SyncScheduleTable { table: ScheduleTableId, value: TickType },
    SetScheduleTableAsync { table: ScheduleTableId },
    GetScheduleTableStatus { table: ScheduleTableId },
    DisableInterruptSource { isr: IsrId },
    EnableInterruptSource { isr: IsrId, clear_pending: bool },
    GetCount { counter: CounterId },
    AdvanceCounter { counter: CounterId },
    StartScheduleTableSynchron { table: ScheduleTableId },
    TerminateApplication { app: AppId, restart: bool },
    GetApplicationState { app: AppId },
    ShutdownCore { error: Option<OsError> },
    MeasureCpuLoad { query: CpuLoadQuery },
}

/// Typed reply of a remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteReply {
    Done,
    TaskState(TaskStateType),
    Tick(TickType),
    Event(EventMask),
    ScheduleTableStatus(ScheduleTableStatus),
    ApplicationState(ApplicationState),
    CpuLoad(u8),
}

/// Routing seam to the other cores.
pub trait RemoteCall: Send + Sync {
    /// Runs `request` on `target` and waits for its reply. Implementations
    /// keep serving the caller's own inbound requests while they wait.
    fn call(
        &self,
        kernel: &mut CoreKernel,
        target: CoreId,
        request: RemoteRequest,
    ) -> OsResult<RemoteReply>;

    /// Sends `request` to `target` without waiting.
    fn post(&self, kernel: &mut CoreKernel, target: CoreId, request: RemoteRequest)
        -> OsResult<()>;
}

pub type RemoteRef = Arc<dyn RemoteCall>;

impl CoreKernel {
    /// Runs `request` on `owner`. Errors of the remote service stay on the
    /// owning core; they are only returned here.
    pub(crate) fn forward(
        &mut self,
        call: Call,
        owner: CoreId,
        request: RemoteRequest,
    ) -> OsResult<RemoteReply> {
        let Some(remote) = self.remote.clone() else {
            return self.fail(call, OsError::Core);
        };
        log::debug!("{}: forwarding {:?} to {}", self.core, request, owner);
        remote.call(self, owner, request)
    }

    /// Like [`forward`](Self::forward) but for requests without a reply.
    pub(crate) fn forward_post(
        &mut self,
        call: Call,
        owner: CoreId,
        request: RemoteRequest,
    ) -> OsResult<()> {
        let Some(remote) = self.remote.clone() else {
            return self.fail(call, OsError::Core);
        };
        remote.post(self, owner, request)
    }

    /// Forwards a request whose reply is only a status.
    pub(crate) fn forward_status(
        &mut self,
        call: Call,
        owner: CoreId,
        request: RemoteRequest,
    ) -> OsResult<()> {
        self.forward(call, owner, request).map(|_| ())
    }
}
