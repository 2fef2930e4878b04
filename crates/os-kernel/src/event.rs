//! Events of extended tasks.

use os_core::{EventMask, OsError, OsResult, TaskId};
use os_trace::records;

use crate::error::{Call, PanicCode, ServiceId};
use crate::kernel::{callers, CoreKernel};
use crate::remote::{RemoteReply, RemoteRequest};
use crate::task::TaskState;

impl CoreKernel {
    /// `SetEvent`.
    pub fn set_event(&mut self, task: TaskId, mask: EventMask) -> OsResult<()> {
        let call = Call::new(ServiceId::SetEvent).arg(task.raw()).arg(mask);
        self.enter(call, callers::TASK | callers::CAT2)?;
        self.set_event_routed(call, task, mask)
    }

    pub(crate) fn set_event_routed(
        &mut self,
        call: Call,
        task: TaskId,
        mask: EventMask,
    ) -> OsResult<()> {
        let owner = self.config.task(task).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return self.forward_status(call, owner, RemoteRequest::SetEvent { task, mask });
        }
        match self.set_event_local(task, mask) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(call, err),
        }
    }

    fn set_event_local(&mut self, task: TaskId, mask: EventMask) -> OsResult<()> {
        let extended = self
            .config
            .task(task)
            .map(|cfg| cfg.is_extended())
            .ok_or(OsError::Id)?;
        if !extended {
            return Err(OsError::Access);
        }
        let tc = self.tcb_mut(task).ok_or(OsError::Id)?;
        if tc.state == TaskState::Suspended {
            return Err(OsError::State);
        }
        tc.pending_events |= mask;
        if tc.state != TaskState::Waiting || tc.pending_events & tc.waiting_events == 0 {
            return Ok(());
        }

        tc.state = TaskState::ReadySync;
        tc.waiting_events = 0;
        let base = tc.base;
        if self.queues.enqueue(task, base).is_err() {
            self.panic(PanicCode::QueueOverflow);
            return Err(OsError::Limit);
        }
        log::debug!("{}: {} woken", self.core, task);
        self.emit(records::task::WAKE, |p| {
            p.u16(task.raw()).u16(base.raw());
        });
        Ok(())
    }

    /// `ClearEvent`: clears `mask` in the caller's pending events.
    pub fn clear_event(&mut self, mask: EventMask) -> OsResult<()> {
        let call = Call::new(ServiceId::ClearEvent).arg(mask);
        self.enter(call, callers::TASK)?;
        let task = self.running_task(call)?;
        if !self.config.task(task).is_some_and(|cfg| cfg.is_extended()) {
            return self.fail(call, OsError::Access);
        }
        if let Some(tc) = self.tcb_mut(task) {
            tc.pending_events &= !mask;
        }
        Ok(())
    }

    /// `GetEvent`.
    pub fn get_event(&mut self, task: TaskId) -> OsResult<EventMask> {
        let call = Call::new(ServiceId::GetEvent).arg(task.raw());
        self.enter(call, callers::TASK | callers::CAT2 | callers::HOOKS)?;
        let owner = self.config.task(task).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return match self.forward(call, owner, RemoteRequest::GetEvent { task })? {
                RemoteReply::Event(mask) => Ok(mask),
                _ => self.fail(call, OsError::Core),
            };
        }
        if !self.config.task(task).is_some_and(|cfg| cfg.is_extended()) {
            return self.fail(call, OsError::Access);
        }
        match self.tcb(task) {
            Some(tc) if tc.state == TaskState::Suspended => self.fail(call, OsError::State),
            Some(tc) => Ok(tc.pending_events),
            None => self.fail(call, OsError::Id),
        }
    }

    /// `WaitEvent`. Returns at once if one of the events is already set;
    /// otherwise the caller moves to `Waiting` and loses the CPU when the
    /// step ends.
    pub fn wait_event(&mut self, mask: EventMask) -> OsResult<()> {
        let call = Call::new(ServiceId::WaitEvent).arg(mask);
        self.enter(call, callers::TASK)?;
        let task = self.running_task(call)?;
        if !self.config.task(task).is_some_and(|cfg| cfg.is_extended()) {
            return self.fail(call, OsError::Access);
        }
        let now = self.now();
        let Some(tc) = self.tcb_mut(task) else {
            return self.fail(call, OsError::CallLevel);
        };
        if tc.last_lock.is_some() {
            return self.fail(call, OsError::Resource);
        }
        if tc.pending_events & mask != 0 {
            return Ok(());
        }

        tc.state = TaskState::Waiting;
        tc.waiting_events = mask;
        tc.prio = tc.base;
        tc.yield_requested = false;
        tc.exec_time += now.saturating_sub(tc.started_at);
        log::debug!("{}: {} waits for {:#x}", self.core, task, mask);
        self.emit(records::task::WAIT, |p| {
            p.u16(task.raw()).u32(mask);
        });
        Ok(())
    }
}
