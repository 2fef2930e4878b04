//! Immediate priority ceiling resources.
//!
//! Held resources form a singly linked chain per holder: the holder keeps
//! the most recently taken resource (`last_lock`) and every resource links
//! to the one taken before it. Releases must follow the chain, so the
//! priority stored at acquire time is always the right one to restore.
//! Ceilings above the task range lock interrupts instead of raising a task
//! level.

use os_core::{IsrId, OsError, OsResult, Priority, ResourceId, TaskId};
use os_trace::records;

use crate::error::{Call, ServiceId};
use crate::kernel::{callers, CallContext, CoreKernel};
use crate::task::TaskState;

/// Owner of a taken resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Task(TaskId),
    Isr(IsrId),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ResourceControl {
    /// Resource the holder took before this one.
    pub next: Option<ResourceId>,
    pub taken_by: Option<Holder>,
    /// Priority to restore on release.
    pub last_prio: Priority,
    pub locked_at: u64,
    pub max_hold: u64,
}

impl CoreKernel {
    /// `GetResource`.
    pub fn get_resource(&mut self, resource: ResourceId) -> OsResult<()> {
        let call = Call::new(ServiceId::GetResource).arg(resource.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        let Some(ceiling) = self
            .config
            .resource(resource)
            .map(|cfg| cfg.ceiling_priority())
        else {
            return self.fail(call, OsError::Id);
        };
        if self.resources[resource.index()].taken_by.is_some() {
            return self.fail(call, OsError::Access);
        }
        let now = self.now();

        let new_prio = if let Some(isr) = self.isr.current {
            let level = self.config.isr(isr).map_or(0, |cfg| cfg.level);
            if ceiling < Priority::interrupt(level) {
                return self.fail(call, OsError::Access);
            }
            let mask = self.isr.mask;
            let ctl = &mut self.resources[resource.index()];
            ctl.last_prio = mask.map_or(Priority::IDLE, Priority::interrupt);
            ctl.next = self.isr.last_lock.replace(resource);
            ctl.taken_by = Some(Holder::Isr(isr));
            if let Some(lock) = ceiling.interrupt_level() {
                self.isr.mask = Some(mask.map_or(lock, |current| current.max(lock)));
            }
            self.isr.mask.map_or(Priority::IDLE, Priority::interrupt)
        } else {
            if self.context != CallContext::Task {
                return self.fail(call, OsError::CallLevel);
            }
            let task = self.running_task(call)?;
            let Some(tc) = self.tasks.get_mut(task.index()).and_then(Option::as_mut) else {
                return self.fail(call, OsError::CallLevel);
            };
            if ceiling < tc.base {
                return self.fail(call, OsError::Access);
            }
            let ctl = &mut self.resources[resource.index()];
            ctl.last_prio = tc.prio;
            ctl.next = tc.last_lock.replace(resource);
            ctl.taken_by = Some(Holder::Task(task));
            if ceiling > tc.prio {
                tc.prio = ceiling;
            }
            let prio = tc.prio;
            if let Some(lock) = ceiling.interrupt_level() {
                self.isr.mask = Some(self.isr.mask.map_or(lock, |current| current.max(lock)));
            }
            prio
        };

        self.resources[resource.index()].locked_at = now;
        self.emit(records::resource::GET, |p| {
            p.u16(resource.raw()).u16(new_prio.raw());
        });
        Ok(())
    }

    /// `ReleaseResource`.
    ///
    /// Only the most recently taken resource can be released; anything else
    /// is rejected with `E_OS_NOFUNC` without touching the chain. A task
    /// that was killed while holding the resource gets a silent success.
    pub fn release_resource(&mut self, resource: ResourceId) -> OsResult<()> {
        let call = Call::new(ServiceId::ReleaseResource).arg(resource.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        let Some(ceiling) = self
            .config
            .resource(resource)
            .map(|cfg| cfg.ceiling_priority())
        else {
            return self.fail(call, OsError::Id);
        };

        let restored = if let Some(isr) = self.isr.current {
            let level = self.config.isr(isr).map_or(0, |cfg| cfg.level);
            if ceiling < Priority::interrupt(level) {
                return self.fail(call, OsError::Access);
            }
            if self.isr.last_lock != Some(resource) {
                return self.fail(call, OsError::NoFunc);
            }
            let ctl = &mut self.resources[resource.index()];
            self.isr.last_lock = ctl.next.take();
            ctl.taken_by = None;
            let restored = ctl.last_prio;
            self.isr.mask = restored.interrupt_level();
            restored
        } else {
            if self.context != CallContext::Task {
                return self.fail(call, OsError::CallLevel);
            }
            let Some(task) = self.current else {
                return self.fail(call, OsError::CallLevel);
            };
            let Some(tc) = self.tasks.get_mut(task.index()).and_then(Option::as_mut) else {
                return self.fail(call, OsError::CallLevel);
            };
            if tc.state != TaskState::Running {
                return Ok(());
            }
            if ceiling < tc.base {
                return self.fail(call, OsError::Access);
            }
            if tc.last_lock != Some(resource) {
                return self.fail(call, OsError::NoFunc);
            }
            let ctl = &mut self.resources[resource.index()];
            tc.last_lock = ctl.next.take();
            ctl.taken_by = None;
            tc.prio = ctl.last_prio;
            self.isr.mask = ctl.last_prio.interrupt_level();
            ctl.last_prio
        };

        self.account_lock_time(resource);
        self.emit(records::resource::RELEASE, |p| {
            p.u16(resource.raw()).u16(restored.raw());
        });
        self.service_pending_interrupts();
        Ok(())
    }

    /// Holder of `resource`, if taken.
    pub fn resource_holder(&self, resource: ResourceId) -> Option<Holder> {
        self.resources
            .get(resource.index())
            .and_then(|ctl| ctl.taken_by)
    }

    /// Longest time `resource` was held so far.
    pub fn resource_max_hold(&self, resource: ResourceId) -> Option<u64> {
        self.resources.get(resource.index()).map(|ctl| ctl.max_hold)
    }

    /// Resources held by `task`, most recent first.
    pub fn held_resources(&self, task: TaskId) -> Vec<ResourceId> {
        let mut held = Vec::new();
        let mut next = self.tcb(task).and_then(|tc| tc.last_lock);
        while let Some(resource) = next {
            held.push(resource);
            next = self.resources[resource.index()].next;
        }
        held
    }

    fn account_lock_time(&mut self, resource: ResourceId) {
        let now = self.now();
        let ctl = &mut self.resources[resource.index()];
        let held = now.saturating_sub(ctl.locked_at);
        ctl.max_hold = ctl.max_hold.max(held);
        let budget = self
            .config
            .resource(resource)
            .and_then(|cfg| cfg.lock_budget);
        if budget.is_some_and(|budget| held > budget) {
            let call = Call::new(ServiceId::Protection).arg(resource.raw());
            self.report(call, OsError::ProtectionLocked);
        }
    }

    /// Frees every resource `task` holds, restoring its base priority.
    pub(crate) fn release_task_locks(&mut self, task: TaskId) {
        let Some(tc) = self.tasks.get_mut(task.index()).and_then(Option::as_mut) else {
            return;
        };
        let mut next = tc.last_lock.take();
        tc.prio = tc.base;
        let mut locked_interrupts = false;
        while let Some(resource) = next {
            let ctl = &mut self.resources[resource.index()];
            next = ctl.next.take();
            ctl.taken_by = None;
            locked_interrupts |= self
                .config
                .resource(resource)
                .is_some_and(|cfg| cfg.ceiling_priority().is_interrupt_level());
        }
        if locked_interrupts {
            self.isr.mask = None;
        }
    }

    /// Frees every resource held by the running ISR.
    pub(crate) fn release_isr_locks(&mut self) {
        let mut next = self.isr.last_lock.take();
        while let Some(resource) = next {
            let ctl = &mut self.resources[resource.index()];
            next = ctl.next.take();
            ctl.taken_by = None;
        }
        self.isr.mask = self
            .isr
            .current
            .and_then(|isr| self.config.isr(isr))
            .map(|cfg| cfg.level);
    }
}
