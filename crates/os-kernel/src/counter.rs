//! Counters and alarms.
//!
//! Counter values wrap at `max_allowed`: the value after `max_allowed` is
//! zero. An alarm expires on the tick that makes its counter equal to the
//! expiry value, so an absolute alarm armed at the current value only
//! fires after a full wrap.

use std::mem;
use std::sync::Arc;

use os_core::{AlarmId, CounterId, OsError, OsResult, TickType};
use os_trace::records;

use crate::config::AlarmAction;
use crate::error::{Call, ServiceId};
use crate::kernel::{callers, CallContext, CoreKernel};
use crate::remote::{RemoteReply, RemoteRequest};

/// `current + increment` on a counter wrapping after `max`.
pub fn counter_add(current: TickType, increment: TickType, max: TickType) -> TickType {
    if max - current < increment {
        increment - (max - current) - 1
    } else {
        current + increment
    }
}

/// Ticks from `earlier` to `later` on a counter wrapping after `max`.
pub fn counter_sub(later: TickType, earlier: TickType, max: TickType) -> TickType {
    if later >= earlier {
        later - earlier
    } else {
        max - (earlier - later) + 1
    }
}

/// Callback run when an alarm with [`AlarmAction::Callback`] expires.
pub trait AlarmCallback: Send {
    fn call(&mut self, kernel: &mut CoreKernel);
}

impl<F> AlarmCallback for F
where
    F: FnMut(&mut CoreKernel) + Send,
{
    fn call(&mut self, kernel: &mut CoreKernel) {
        self(kernel)
    }
}

/// Static characteristics of the counter behind an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmBase {
    pub max_allowed: TickType,
    pub ticks_per_base: TickType,
    pub min_cycle: TickType,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CounterControl {
    pub current: TickType,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct AlarmControl {
    pub running: bool,
    pub expiry: TickType,
    pub cycle: TickType,
}

impl CoreKernel {
    /// `IncrementCounter`.
    pub fn increment_counter(&mut self, counter: CounterId) -> OsResult<()> {
        let call = Call::new(ServiceId::IncrementCounter).arg(counter.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        self.increment_routed(call, counter)
    }

    fn increment_routed(&mut self, call: Call, counter: CounterId) -> OsResult<()> {
        let owner = self.config.counter(counter).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return self.forward_status(call, owner, RemoteRequest::AdvanceCounter { counter });
        }
        match self.advance_counter(counter) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(call, err),
        }
    }

    /// One tick of a local counter: expires its alarms, then advances the
    /// schedule tables driven by it.
    fn advance_counter(&mut self, counter: CounterId) -> OsResult<()> {
        let max = self
            .config
            .counter(counter)
            .map(|cfg| cfg.max_allowed)
            .ok_or(OsError::Id)?;
        let ctl = &mut self.counters[counter.index()];
        ctl.current = counter_add(ctl.current, 1, max);
        let value = ctl.current;

        let config = Arc::clone(&self.config);
        let core = self.core;
        for alarm in config
            .alarms
            .iter()
            .filter(|alarm| alarm.core == core && alarm.counter == counter)
        {
            let ctl = &mut self.alarms[alarm.id.index()];
            if !ctl.running || ctl.expiry != value {
                continue;
            }
            if ctl.cycle == 0 {
                ctl.running = false;
            } else {
                ctl.expiry = counter_add(ctl.expiry, ctl.cycle, max);
            }
            self.emit(records::alarm::EXPIRE, |p| {
                p.u16(alarm.id.raw()).u32(value);
            });
            self.expire_alarm(alarm.id, alarm.action);
        }

        self.advance_tables(counter);
        Ok(())
    }

    fn expire_alarm(&mut self, alarm: AlarmId, action: AlarmAction) {
        log::trace!("{}: {} expired", self.core, alarm);
        // Failures are reported by the routed helpers.
        let _ = match action {
            AlarmAction::ActivateTask(task) => {
                let call = Call::new(ServiceId::ActivateTask).arg(task.raw());
                self.activate_routed(call, task)
            }
            AlarmAction::SetEvent(task, mask) => {
                let call = Call::new(ServiceId::SetEvent).arg(task.raw()).arg(mask);
                self.set_event_routed(call, task, mask)
            }
            AlarmAction::IncrementCounter(counter) => {
                let call = Call::new(ServiceId::IncrementCounter).arg(counter.raw());
                self.increment_routed(call, counter)
            }
            AlarmAction::Callback(id) => {
                if let Some(mut callback) = self.callbacks.remove(&id) {
                    let saved = mem::replace(&mut self.context, CallContext::AlarmCallback);
                    callback.call(self);
                    self.context = saved;
                    self.callbacks.insert(id, callback);
                }
                Ok(())
            }
        };
    }

    /// `GetCounterValue`.
    pub fn get_counter_value(&mut self, counter: CounterId) -> OsResult<TickType> {
        let call = Call::new(ServiceId::GetCounterValue).arg(counter.raw());
        self.enter(call, callers::TASK | callers::CAT2 | callers::HOOKS)?;
        self.counter_value(call, counter)
    }

    /// `GetElapsedValue`: returns the current value and the ticks elapsed
    /// since `previous`.
    pub fn get_elapsed_value(
        &mut self,
        counter: CounterId,
        previous: TickType,
    ) -> OsResult<(TickType, TickType)> {
        let call = Call::new(ServiceId::GetElapsedValue)
            .arg(counter.raw())
            .arg(previous);
        self.enter(call, callers::TASK | callers::CAT2 | callers::HOOKS)?;
        let Some(max) = self.config.counter(counter).map(|cfg| cfg.max_allowed) else {
            return self.fail(call, OsError::Id);
        };
        if previous > max {
            return self.fail(call, OsError::Value);
        }
        let current = self.counter_value(call, counter)?;
        Ok((current, counter_sub(current, previous, max)))
    }

    fn counter_value(&mut self, call: Call, counter: CounterId) -> OsResult<TickType> {
        let owner = self.config.counter(counter).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return match self.forward(call, owner, RemoteRequest::GetCount { counter })? {
                RemoteReply::Tick(value) => Ok(value),
                _ => self.fail(call, OsError::Core),
            };
        }
        Ok(self.counters[counter.index()].current)
    }

    /// `GetAlarmBase`.
    pub fn get_alarm_base(&mut self, alarm: AlarmId) -> OsResult<AlarmBase> {
        let call = Call::new(ServiceId::GetAlarmBase).arg(alarm.raw());
        self.enter(call, callers::TASK | callers::CAT2 | callers::HOOKS)?;
        let base = self
            .config
            .alarm(alarm)
            .and_then(|cfg| self.config.counter(cfg.counter))
            .map(|counter| AlarmBase {
                max_allowed: counter.max_allowed,
                ticks_per_base: counter.ticks_per_base,
                min_cycle: counter.min_cycle,
            });
        match base {
            Some(base) => Ok(base),
            None => self.fail(call, OsError::Id),
        }
    }

    /// `GetAlarm`: ticks left before the alarm expires.
    pub fn get_alarm(&mut self, alarm: AlarmId) -> OsResult<TickType> {
        let call = Call::new(ServiceId::GetAlarm).arg(alarm.raw());
        self.enter(call, callers::TASK | callers::CAT2 | callers::HOOKS)?;
        let owner = self.config.alarm(alarm).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return match self.forward(call, owner, RemoteRequest::GetAlarm { alarm })? {
                RemoteReply::Tick(ticks) => Ok(ticks),
                _ => self.fail(call, OsError::Core),
            };
        }
        let ctl = &self.alarms[alarm.index()];
        if !ctl.running {
            return self.fail(call, OsError::NoFunc);
        }
        let expiry = ctl.expiry;
        let (counter, max) = self.alarm_counter(alarm);
        let current = self.counters[counter.index()].current;
        Ok(counter_sub(expiry, current, max))
    }

    /// `SetRelAlarm`.
    pub fn set_rel_alarm(
        &mut self,
        alarm: AlarmId,
        increment: TickType,
        cycle: TickType,
    ) -> OsResult<()> {
        let call = Call::new(ServiceId::SetRelAlarm)
            .arg(alarm.raw())
            .arg(increment)
            .arg(cycle);
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.config.alarm(alarm).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            let request = RemoteRequest::SetRelAlarm {
                alarm,
                increment,
                cycle,
            };
            return self.forward_status(call, owner, request);
        }
        match self.arm_alarm_rel(alarm, increment, cycle) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(call, err),
        }
    }

    /// `SetAbsAlarm`.
    pub fn set_abs_alarm(&mut self, alarm: AlarmId, start: TickType, cycle: TickType) -> OsResult<()> {
        let call = Call::new(ServiceId::SetAbsAlarm)
            .arg(alarm.raw())
            .arg(start)
            .arg(cycle);
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.config.alarm(alarm).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            let request = RemoteRequest::SetAbsAlarm {
                alarm,
                start,
                cycle,
            };
            return self.forward_status(call, owner, request);
        }
        match self.arm_alarm_abs(alarm, start, cycle) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(call, err),
        }
    }

    /// `CancelAlarm`.
    pub fn cancel_alarm(&mut self, alarm: AlarmId) -> OsResult<()> {
        let call = Call::new(ServiceId::CancelAlarm).arg(alarm.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.config.alarm(alarm).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return self.forward_status(call, owner, RemoteRequest::CancelAlarm { alarm });
        }
        let ctl = &mut self.alarms[alarm.index()];
        if !ctl.running {
            return self.fail(call, OsError::NoFunc);
        }
        ctl.running = false;
        Ok(())
    }

    pub(crate) fn arm_alarm_rel(
        &mut self,
        alarm: AlarmId,
        increment: TickType,
        cycle: TickType,
    ) -> OsResult<()> {
        let (counter, max) = self.check_alarm(alarm, cycle)?;
        if increment == 0 || increment > max {
            return Err(OsError::Value);
        }
        let expiry = counter_add(self.counters[counter.index()].current, increment, max);
        self.alarms[alarm.index()] = AlarmControl {
            running: true,
            expiry,
            cycle,
        };
        Ok(())
    }

    pub(crate) fn arm_alarm_abs(
        &mut self,
        alarm: AlarmId,
        start: TickType,
        cycle: TickType,
    ) -> OsResult<()> {
        let (_, max) = self.check_alarm(alarm, cycle)?;
        if start > max {
            return Err(OsError::Value);
        }
        self.alarms[alarm.index()] = AlarmControl {
            running: true,
            expiry: start,
            cycle,
        };
        Ok(())
    }

    /// Validates a local alarm for arming and returns its counter.
    fn check_alarm(&self, alarm: AlarmId, cycle: TickType) -> OsResult<(CounterId, TickType)> {
        let counter = self
            .config
            .alarm(alarm)
            .filter(|cfg| cfg.core == self.core)
            .and_then(|cfg| self.config.counter(cfg.counter))
            .ok_or(OsError::Id)?;
        if self.alarms[alarm.index()].running {
            return Err(OsError::State);
        }
        if cycle != 0 && (cycle < counter.min_cycle || cycle > counter.max_allowed) {
            return Err(OsError::Value);
        }
        Ok((counter.id, counter.max_allowed))
    }

    fn alarm_counter(&self, alarm: AlarmId) -> (CounterId, TickType) {
        self.config
            .alarm(alarm)
            .and_then(|cfg| self.config.counter(cfg.counter))
            .map_or((CounterId(0), TickType::MAX), |counter| {
                (counter.id, counter.max_allowed)
            })
    }

    /// Stops a local alarm without any check.
    pub(crate) fn cancel_alarm_local(&mut self, alarm: AlarmId) {
        if let Some(ctl) = self.alarms.get_mut(alarm.index()) {
            ctl.running = false;
        }
    }

    /// Local counter value, `None` for counters of other cores.
    pub fn counter_snapshot(&self, counter: CounterId) -> Option<TickType> {
        self.config
            .counter(counter)
            .filter(|cfg| cfg.core == self.core)
            .map(|_| self.counters[counter.index()].current)
    }
}
