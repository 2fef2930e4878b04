//! Task management services and the end-of-step handling of task bodies.

use os_core::{OsError, OsResult, Priority, TaskId, TaskStateType};
use os_trace::records;

use crate::api::TaskApi;
use crate::config::TaskFlags;
use crate::error::{Call, PanicCode, ServiceId};
use crate::kernel::{callers, CoreKernel};
use crate::remote::{RemoteReply, RemoteRequest};
use crate::task::{TaskExit, TaskState};

impl CoreKernel {
    /// `ActivateTask`.
    pub fn activate_task(&mut self, task: TaskId) -> OsResult<()> {
        let call = Call::new(ServiceId::ActivateTask).arg(task.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        self.activate_routed(call, task)
    }

    /// Activation on behalf of the kernel itself (alarms, schedule tables,
    /// chaining): no calling-context check.
    pub(crate) fn activate_routed(&mut self, call: Call, task: TaskId) -> OsResult<()> {
        let owner = self.config.task(task).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return self.forward_status(call, owner, RemoteRequest::ActivateTask { task });
        }
        match self.activate_local(task) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(call, err),
        }
    }

    /// Queues one activation of a local task at its base priority.
    pub(crate) fn activate_local(&mut self, task: TaskId) -> OsResult<()> {
        let max = self
            .config
            .task(task)
            .map(|cfg| cfg.max_activations)
            .ok_or(OsError::Id)?;
        if !self.app_admits(task) {
            return Err(OsError::Access);
        }
        let tc = self.tcb_mut(task).ok_or(OsError::Id)?;
        if tc.activations >= max {
            return Err(OsError::Limit);
        }
        if tc.state == TaskState::Suspended {
            tc.state = TaskState::New;
            tc.prio = tc.base;
            tc.pending_events = 0;
        }
        tc.activations += 1;
        let base = tc.base;
        if self.queues.enqueue(task, base).is_err() {
            self.panic(PanicCode::QueueOverflow);
            return Err(OsError::Limit);
        }
        log::debug!("{}: activate {} at {}", self.core, task, base);
        self.emit(records::task::ACTIVATE, |p| {
            p.u16(task.raw()).u16(base.raw());
        });
        Ok(())
    }

    /// `TerminateTask`.
    pub fn terminate_task(&mut self) -> OsResult<()> {
        let call = Call::new(ServiceId::TerminateTask);
        self.enter(call, callers::TASK)?;
        let task = self.running_task(call)?;
        if self.tcb(task).is_some_and(|tc| tc.last_lock.is_some()) {
            return self.fail(call, OsError::Resource);
        }
        self.end_activation(task);
        Ok(())
    }

    /// `ChainTask`: terminates the caller and activates `next`.
    pub fn chain_task(&mut self, next: TaskId) -> OsResult<()> {
        let call = Call::new(ServiceId::ChainTask).arg(next.raw());
        self.enter(call, callers::TASK)?;
        let task = self.running_task(call)?;
        let owner = self.config.task(next).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if self.tcb(task).is_some_and(|tc| tc.last_lock.is_some()) {
            return self.fail(call, OsError::Resource);
        }
        if owner == self.core && next != task {
            let max = self.config.task(next).map_or(0, |cfg| cfg.max_activations);
            if self.tcb(next).is_some_and(|tc| tc.activations >= max) {
                return self.fail(call, OsError::Limit);
            }
        }
        self.end_activation(task);
        if owner == self.core {
            match self.activate_local(next) {
                Ok(()) => Ok(()),
                Err(err) => self.fail(call, err),
            }
        } else {
            self.forward_status(call, owner, RemoteRequest::ActivateTask { task: next })
        }
    }

    /// `Schedule`: gives up the internal ceiling if a task between the base
    /// and the run priority is ready. The switch happens when the step ends.
    pub fn schedule(&mut self) -> OsResult<()> {
        let call = Call::new(ServiceId::Schedule);
        self.enter(call, callers::TASK)?;
        let task = self.running_task(call)?;
        let highest = self.queues.highest_priority();
        let Some(tc) = self.tcb_mut(task) else {
            return self.fail(call, OsError::CallLevel);
        };
        if tc.last_lock.is_some() {
            return self.fail(call, OsError::Resource);
        }
        if highest.is_some_and(|prio| prio > tc.base) {
            tc.yield_requested = true;
        }
        Ok(())
    }

    /// `GetTaskID`: the running task, if any.
    pub fn get_task_id(&mut self) -> OsResult<Option<TaskId>> {
        let call = Call::new(ServiceId::GetTaskId);
        self.enter(
            call,
            callers::TASK | callers::CAT2 | callers::HOOKS | callers::PROTECTION_HOOK,
        )?;
        Ok(self.current.filter(|&task| {
            self.tcb(task)
                .is_some_and(|tc| tc.state == TaskState::Running)
        }))
    }

    /// `GetTaskState`.
    pub fn get_task_state(&mut self, task: TaskId) -> OsResult<TaskStateType> {
        let call = Call::new(ServiceId::GetTaskState).arg(task.raw());
        self.enter(call, callers::TASK | callers::CAT2 | callers::HOOKS)?;
        let owner = self.config.task(task).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return match self.forward(call, owner, RemoteRequest::GetTaskState { task })? {
                RemoteReply::TaskState(state) => Ok(state),
                _ => self.fail(call, OsError::Core),
            };
        }
        match self.tcb(task) {
            Some(tc) => Ok(tc.state.reported()),
            None => self.fail(call, OsError::Id),
        }
    }

    /// Task currently holding the CPU in the running state.
    pub(crate) fn running_task(&mut self, call: Call) -> OsResult<TaskId> {
        match self.current {
            Some(task) if self.tcb(task).is_some_and(|tc| tc.state == TaskState::Running) => {
                Ok(task)
            }
            _ => self.fail(call, OsError::CallLevel),
        }
    }

    /// Ends the running activation of `task`.
    pub(crate) fn end_activation(&mut self, task: TaskId) {
        let now = self.now();
        let measure = self
            .config
            .task(task)
            .is_some_and(|cfg| cfg.flags.contains(TaskFlags::MEASUREEXEC));
        let Some(tc) = self.tcb_mut(task) else {
            return;
        };
        tc.exec_time += now.saturating_sub(tc.started_at);
        if measure {
            tc.max_exec_time = tc.max_exec_time.max(tc.exec_time);
        }
        tc.activations = tc.activations.saturating_sub(1);
        tc.state = if tc.activations > 0 {
            TaskState::New
        } else {
            TaskState::Suspended
        };
        tc.prio = tc.base;
        tc.pending_events = 0;
        tc.waiting_events = 0;
        tc.yield_requested = false;
        log::debug!("{}: terminate {}", self.core, task);
        self.emit(records::task::TERMINATE, |p| {
            p.u16(task.raw());
        });
    }

    /// Forcibly ends every activation of `task`: drops its ready entries,
    /// frees its resources and suspends it.
    pub(crate) fn kill_task(&mut self, task: TaskId) {
        self.queues.purge(task);
        self.release_task_locks(task);
        let now = self.now();
        if let Some(tc) = self.tcb_mut(task) {
            if tc.state == TaskState::Running {
                tc.exec_time += now.saturating_sub(tc.started_at);
            }
            tc.state = TaskState::Suspended;
            tc.activations = 0;
            tc.prio = tc.base;
            tc.pending_events = 0;
            tc.waiting_events = 0;
            tc.yield_requested = false;
        }
        log::warn!("{}: killed {}", self.core, task);
        self.emit(records::task::TERMINATE, |p| {
            p.u16(task.raw());
        });
    }

    /// Runs one step of `task`'s body.
    pub(crate) fn run_body(&mut self, task: TaskId) -> TaskExit {
        let Some(mut body) = self.bodies.get_mut(task.index()).and_then(Option::take) else {
            // A task without code returns immediately.
            return TaskExit::Continue;
        };
        let exit = {
            let mut api = TaskApi::new(self, task);
            body.run(&mut api)
        };
        if let Some(slot) = self.bodies.get_mut(task.index()) {
            *slot = Some(body);
        }
        exit
    }

    /// Applies the exit request of a finished step.
    pub(crate) fn finish_step(&mut self, task: TaskId, exit: TaskExit) {
        let still_running = self.current == Some(task)
            && self
                .tcb(task)
                .is_some_and(|tc| tc.state == TaskState::Running);
        if !still_running || !self.is_running() {
            return;
        }
        if !self.bodies.get(task.index()).is_some_and(Option::is_some) {
            self.missing_end(task);
            return;
        }

        self.check_exec_budget(task);
        let survived = self.is_running()
            && self
                .tcb(task)
                .is_some_and(|tc| tc.state == TaskState::Running);
        if !survived {
            return;
        }
        let result = match exit {
            TaskExit::Continue => {
                self.drop_to_base_if_yielding(task);
                return;
            }
            TaskExit::Wait(mask) => self.wait_event(mask),
            TaskExit::Terminate => self.terminate_task(),
            TaskExit::Chain(next) => self.chain_task(next),
        };
        if result.is_err()
            && self
                .tcb(task)
                .is_some_and(|tc| tc.state == TaskState::Running)
        {
            self.missing_end(task);
        }
    }

    /// A task that cannot end its activation cleanly: report, free its
    /// resources and terminate it.
    fn missing_end(&mut self, task: TaskId) {
        let call = Call::new(ServiceId::TaskReturn).arg(task.raw());
        self.report(call, OsError::MissingEnd);
        if self
            .tcb(task)
            .is_some_and(|tc| tc.state == TaskState::Running)
        {
            self.release_task_locks(task);
            self.end_activation(task);
        }
    }

    fn drop_to_base_if_yielding(&mut self, task: TaskId) {
        if let Some(tc) = self.tcb_mut(task) {
            if std::mem::take(&mut tc.yield_requested) {
                tc.prio = tc.base;
            }
        }
    }

    fn check_exec_budget(&mut self, task: TaskId) {
        let Some(budget) = self.config.task(task).and_then(|cfg| cfg.exec_budget) else {
            return;
        };
        let now = self.now();
        let used = self
            .tcb(task)
            .map_or(0, |tc| tc.exec_time + now.saturating_sub(tc.started_at));
        if used > budget {
            let call = Call::new(ServiceId::Protection).arg(task.raw());
            self.report(call, OsError::ProtectionTime);
        }
    }

    /// Current priority of the running task, or the idle level.
    pub(crate) fn running_priority(&self) -> Priority {
        self.current
            .and_then(|task| self.tcb(task))
            .map_or(Priority::IDLE, |tc| tc.prio)
    }
}
