//! Task dispatcher.

use os_core::TaskId;
use os_trace::records;

use crate::error::PanicCode;
use crate::kernel::{CallContext, CoreKernel};
use crate::task::{ReadyKind, TaskState};

/// Decision taken by [`CoreKernel::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// First run of a new activation, from the task's entry point.
    Started(TaskId),
    /// Resumed after giving up the CPU in a service call.
    ResumedSync(TaskId),
    /// Resumed after an interrupt displaced it.
    ResumedAsync(TaskId),
    /// Nothing is ready; the current task pointer is cleared.
    Idle,
    /// The core is halted.
    Halted,
}

impl CoreKernel {
    /// Selects the next task.
    ///
    /// A still running outgoing task is put back at the head of the queue of
    /// its current priority in the `ready` variant given by the caller. The
    /// head of the highest non-empty queue then becomes the running task and
    /// is raised to its run priority.
    pub fn dispatch(&mut self, ready: ReadyKind) -> Dispatched {
        if !self.is_running() {
            return Dispatched::Halted;
        }
        self.stats.dispatches += 1;
        let now = self.now();

        if let Some(outgoing) = self.current {
            let Some(tc) = self.tcb(outgoing) else {
                return self.panic(PanicCode::Unreachable);
            };
            if tc.stack.overflowed() {
                return self.panic(PanicCode::StackOverflow);
            }
            if tc.state == TaskState::Running {
                self.with_hooks(CallContext::PostTaskHook, |hooks, kernel| {
                    hooks.post_task(kernel, outgoing)
                });
                let Some(tc) = self.tcb_mut(outgoing) else {
                    return self.panic(PanicCode::Unreachable);
                };
                tc.state = ready.state();
                tc.exec_time += now.saturating_sub(tc.started_at);
                let prio = tc.prio;
                if self.queues.insert(outgoing, prio).is_err() {
                    return self.panic(PanicCode::QueueOverflow);
                }
                self.stats.preemptions += 1;
                log::debug!("{}: {} preempted at {}", self.core, outgoing, prio);
                self.emit(records::task::PREEMPT, |p| {
                    p.u16(outgoing.raw()).u16(prio.raw());
                });
            }
        }

        let Some(entry) = self.queues.pop_highest() else {
            self.current = None;
            self.stats.idles += 1;
            self.cpu_load.set_busy(now, false);
            self.emit(records::sched::IDLE, |_| {});
            self.with_hooks(CallContext::IdleHook, |hooks, kernel| hooks.idle(kernel));
            return Dispatched::Idle;
        };

        let task = entry.task;
        let Some(run_prio) = self
            .config
            .task(task)
            .map(|cfg| self.config.run_priority(cfg))
        else {
            return self.panic(PanicCode::Unreachable);
        };
        let Some(previous) = self.tcb(task).map(|tc| tc.state) else {
            return self.panic(PanicCode::Unreachable);
        };
        if !previous.is_ready() {
            return self.panic(PanicCode::InvalidTaskState);
        }
        self.current = Some(task);
        let Some(tc) = self.tcb_mut(task) else {
            return self.panic(PanicCode::Unreachable);
        };
        tc.state = TaskState::Running;
        if run_prio > tc.prio {
            tc.prio = run_prio;
        }
        tc.started_at = now;
        let prio = tc.prio;
        self.cpu_load.set_busy(now, true);

        self.with_hooks(CallContext::PreTaskHook, |hooks, kernel| {
            hooks.pre_task(kernel, task)
        });

        match previous {
            TaskState::New => {
                if let Some(tc) = self.tcb_mut(task) {
                    tc.exec_time = 0;
                }
                self.stats.starts += 1;
                log::debug!("{}: start {} at {}", self.core, task, prio);
                self.emit(records::task::START, |p| {
                    p.u16(task.raw()).u16(prio.raw());
                });
                Dispatched::Started(task)
            }
            TaskState::ReadyAsync => {
                self.stats.resumes += 1;
                self.emit(records::task::RESUME_ASYNC, |p| {
                    p.u16(task.raw()).u16(prio.raw());
                });
                Dispatched::ResumedAsync(task)
            }
            TaskState::ReadySync => {
                self.stats.resumes += 1;
                self.emit(records::task::RESUME_SYNC, |p| {
                    p.u16(task.raw()).u16(prio.raw());
                });
                Dispatched::ResumedSync(task)
            }
            TaskState::Running | TaskState::Waiting | TaskState::Suspended => {
                self.panic(PanicCode::Unreachable)
            }
        }
    }
}
