//! Interrupt service routines and interrupt sources.
//!
//! An ISR runs to completion inside [`CoreKernel::trigger_interrupt`]. A
//! source that is disabled, or whose level is masked by the running ISR or
//! an interrupt-level resource, is latched as pending and served as soon as
//! the mask drops.

use std::mem;

use os_core::{CoreId, IsrId, OsError, OsResult, ResourceId};
use os_trace::records;

use crate::config::IsrCategory;
use crate::error::{Call, ServiceId};
use crate::kernel::{callers, CallContext, CoreKernel};
use crate::remote::RemoteRequest;

/// Code of an interrupt service routine.
pub trait IsrBody: Send {
    fn run(&mut self, kernel: &mut CoreKernel, isr: IsrId);
}

impl<F> IsrBody for F
where
    F: FnMut(&mut CoreKernel, IsrId) + Send,
{
    fn run(&mut self, kernel: &mut CoreKernel, isr: IsrId) {
        self(kernel, isr)
    }
}

pub(crate) struct IsrState {
    /// ISR being executed, innermost when nested.
    pub current: Option<IsrId>,
    /// Lock chain of the running ISR.
    pub last_lock: Option<ResourceId>,
    /// Interrupt levels up to and including this one are masked.
    pub mask: Option<u8>,
    /// Nesting depth of `DisableAllInterrupts`.
    pub disable_all: u32,
    /// The running ISR was terminated by a protection action.
    pub killed: bool,
    /// Kernel work at interrupt level without an ISR of its own, such as a
    /// counter tick or an inter-core request. Errors raised there have no
    /// task or ISR to blame.
    pub system: bool,
    pub enabled: Vec<bool>,
    pub pending: Vec<bool>,
    pub bodies: Vec<Option<Box<dyn IsrBody>>>,
}

impl IsrState {
    pub fn new(bodies: Vec<Option<Box<dyn IsrBody>>>) -> Self {
        let count = bodies.len();
        Self {
            current: None,
            last_lock: None,
            mask: None,
            disable_all: 0,
            killed: false,
            system: false,
            enabled: vec![true; count],
            pending: vec![false; count],
            bodies,
        }
    }

    pub fn accepts(&self, level: u8) -> bool {
        self.disable_all == 0 && self.mask.map_or(true, |mask| level > mask)
    }
}

impl CoreKernel {
    /// Raises interrupt `isr` on this core.
    ///
    /// Returns `E_OS_ID` for unknown ISRs or ISRs of another core and
    /// `E_OS_CORE` when the core is not running. Nothing is reported; the
    /// request comes from hardware, not from a service call.
    pub fn trigger_interrupt(&mut self, isr: IsrId) -> OsResult<()> {
        if !self.is_running() {
            return Err(OsError::Core);
        }
        let level = match self.config.isr(isr) {
            Some(cfg) if cfg.core == self.core => cfg.level,
            _ => return Err(OsError::Id),
        };
        if self.isr.enabled[isr.index()] && self.isr.accepts(level) {
            self.run_isr(isr);
        } else {
            log::trace!("{}: {} pending", self.core, isr);
            self.isr.pending[isr.index()] = true;
        }
        Ok(())
    }

    /// ISR currently executing, if any.
    pub fn current_isr(&self) -> Option<IsrId> {
        self.isr.current
    }

    pub fn isr_pending(&self, isr: IsrId) -> bool {
        self.isr.pending.get(isr.index()).copied().unwrap_or(false)
    }

    pub fn isr_enabled(&self, isr: IsrId) -> bool {
        self.isr.enabled.get(isr.index()).copied().unwrap_or(false)
    }

    /// Whether an interrupt at `level` would be taken right now, that is
    /// interrupts are not disabled and `level` is above the current mask.
    pub fn accepts_interrupt(&self, level: u8) -> bool {
        self.isr.accepts(level)
    }

    /// Current software interrupt mask level.
    pub fn interrupt_mask(&self) -> Option<u8> {
        self.isr.mask
    }

    /// `DisableInterruptSource`.
    pub fn disable_interrupt_source(&mut self, isr: IsrId) -> OsResult<()> {
        let call = Call::new(ServiceId::DisableInterruptSource).arg(isr.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.isr_owner(call, isr)?;
        if owner != self.core {
            return self.forward_status(call, owner, RemoteRequest::DisableInterruptSource { isr });
        }
        if self.isr.enabled[isr.index()] {
            self.isr.enabled[isr.index()] = false;
            Ok(())
        } else {
            self.fail(call, OsError::NoFunc)
        }
    }

    /// `EnableInterruptSource`. With `clear_pending` a request latched
    /// while the source was disabled is dropped instead of served.
    pub fn enable_interrupt_source(&mut self, isr: IsrId, clear_pending: bool) -> OsResult<()> {
        let call = Call::new(ServiceId::EnableInterruptSource)
            .arg(isr.raw())
            .arg(u32::from(clear_pending));
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.isr_owner(call, isr)?;
        if owner != self.core {
            return self.forward_status(
                call,
                owner,
                RemoteRequest::EnableInterruptSource { isr, clear_pending },
            );
        }
        if self.isr.enabled[isr.index()] {
            return self.fail(call, OsError::NoFunc);
        }
        self.isr.enabled[isr.index()] = true;
        if clear_pending {
            self.isr.pending[isr.index()] = false;
        }
        self.service_pending_interrupts();
        Ok(())
    }

    /// `DisableAllInterrupts`. Calls nest; while disabled every other
    /// service fails with `E_OS_DISABLEDINT`.
    pub fn disable_all_interrupts(&mut self) {
        self.isr.disable_all += 1;
    }

    /// `EnableAllInterrupts`. An unmatched call is ignored.
    pub fn enable_all_interrupts(&mut self) {
        if self.isr.disable_all == 0 {
            return;
        }
        self.isr.disable_all -= 1;
        if self.isr.disable_all == 0 {
            self.service_pending_interrupts();
        }
    }

    /// Runs every pending ISR the current mask lets through, highest level
    /// first.
    pub(crate) fn service_pending_interrupts(&mut self) {
        while self.is_running() {
            let next = self
                .isr
                .pending
                .iter()
                .enumerate()
                .filter(|&(index, &pending)| pending && self.isr.enabled[index])
                .filter_map(|(index, _)| {
                    self.config
                        .isrs
                        .get(index)
                        .map(|cfg| (cfg.level, IsrId(index as u16)))
                })
                .filter(|&(level, _)| self.isr.accepts(level))
                .max_by_key(|&(level, _)| level);
            let Some((_, isr)) = next else {
                break;
            };
            self.run_isr(isr);
        }
    }

    /// Disables a local source as part of an application termination.
    pub(crate) fn disable_source_local(&mut self, isr: IsrId) {
        if let Some(enabled) = self.isr.enabled.get_mut(isr.index()) {
            *enabled = false;
        }
        if let Some(pending) = self.isr.pending.get_mut(isr.index()) {
            *pending = false;
        }
    }

    fn isr_owner(&mut self, call: Call, isr: IsrId) -> OsResult<CoreId> {
        match self.config.isr(isr) {
            Some(cfg) if cfg.category == IsrCategory::Cat2 => Ok(cfg.core),
            _ => self.fail(call, OsError::Id),
        }
    }

    fn run_isr(&mut self, isr: IsrId) {
        let Some((level, category)) = self.config.isr(isr).map(|cfg| (cfg.level, cfg.category))
        else {
            return;
        };
        self.isr.pending[isr.index()] = false;

        let saved_isr = self.isr.current.replace(isr);
        let saved_lock = self.isr.last_lock.take();
        let saved_mask = self.isr.mask.replace(level);
        let saved_killed = mem::take(&mut self.isr.killed);
        let saved_disable = self.isr.disable_all;
        let context = match category {
            IsrCategory::Cat1 => CallContext::Cat1Isr,
            IsrCategory::Cat2 => CallContext::Cat2Isr,
        };
        let saved_context = mem::replace(&mut self.context, context);
        self.emit(records::isr::ENTER, |p| {
            p.u16(isr.raw());
        });

        if let Some(mut body) = self.isr.bodies.get_mut(isr.index()).and_then(Option::take) {
            body.run(self, isr);
            self.isr.bodies[isr.index()] = Some(body);
        }

        if self.isr.last_lock.is_some() {
            let call = Call::new(ServiceId::IsrReturn).arg(isr.raw());
            self.report(call, OsError::Resource);
            self.release_isr_locks();
        }
        if self.isr.disable_all != saved_disable {
            let call = Call::new(ServiceId::IsrReturn).arg(isr.raw());
            self.report(call, OsError::DisabledInt);
            self.isr.disable_all = saved_disable;
        }

        self.context = saved_context;
        self.isr.current = saved_isr;
        self.isr.last_lock = saved_lock;
        self.isr.mask = saved_mask;
        self.isr.killed = saved_killed;
        self.emit(records::isr::EXIT, |p| {
            p.u16(isr.raw());
        });
        self.pending_async = true;
        self.service_pending_interrupts();
    }
}
