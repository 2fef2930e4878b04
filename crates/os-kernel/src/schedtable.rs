//! Schedule tables.
//!
//! A started table first counts down `delay` ticks to its offset zero, then
//! moves one offset per counter tick and processes every expiry point whose
//! offset it reaches. At the end of a round it either hands over to the
//! table chained with `NextScheduleTable`, starts over (repeating tables)
//! or stops.

use std::sync::Arc;

use os_core::{CoreId, OsError, OsResult, ScheduleTableId, ScheduleTableStatus, TickType};
use os_trace::records;

use crate::config::{ExpiryAction, ScheduleTableConfig, SyncStrategy, TableAutostart};
use crate::counter::counter_sub;
use crate::error::{Call, ServiceId};
use crate::kernel::{callers, CoreKernel};
use crate::remote::{RemoteReply, RemoteRequest};

#[derive(Debug, Clone)]
pub(crate) struct TableControl {
    pub status: ScheduleTableStatus,
    /// Ticks left before offset zero is reached.
    pub delay: u64,
    /// Offset reached by the last tick.
    pub position: TickType,
    /// Index of the next expiry point to process.
    pub next_point: usize,
    /// Table started when this one ends.
    pub next: Option<ScheduleTableId>,
}

impl Default for TableControl {
    fn default() -> Self {
        Self {
            status: ScheduleTableStatus::Stopped,
            delay: 0,
            position: 0,
            next_point: 0,
            next: None,
        }
    }
}

impl TableControl {
    fn is_running(&self) -> bool {
        matches!(
            self.status,
            ScheduleTableStatus::Running | ScheduleTableStatus::RunningAndSynchronous
        )
    }

    fn start(&mut self, delay: u64, status: ScheduleTableStatus) {
        self.status = status;
        self.delay = delay;
        self.position = 0;
        self.next_point = 0;
        self.next = None;
    }
}

fn running_status(cfg: &ScheduleTableConfig) -> ScheduleTableStatus {
    if cfg.sync == SyncStrategy::Implicit {
        ScheduleTableStatus::RunningAndSynchronous
    } else {
        ScheduleTableStatus::Running
    }
}

impl CoreKernel {
    /// `StartScheduleTableRel`: offset zero is reached `offset` ticks from
    /// now.
    pub fn start_schedule_table_rel(
        &mut self,
        table: ScheduleTableId,
        offset: TickType,
    ) -> OsResult<()> {
        let call = Call::new(ServiceId::StartScheduleTableRel)
            .arg(table.raw())
            .arg(offset);
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.table_owner(call, table)?;
        if owner != self.core {
            let request = RemoteRequest::StartScheduleTable {
                table,
                value: offset,
                absolute: false,
            };
            return self.forward_status(call, owner, request);
        }
        match self.start_table_rel(table, offset) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(call, err),
        }
    }

    /// `StartScheduleTableAbs`: offset zero is reached when the counter
    /// next equals `start`.
    pub fn start_schedule_table_abs(
        &mut self,
        table: ScheduleTableId,
        start: TickType,
    ) -> OsResult<()> {
        let call = Call::new(ServiceId::StartScheduleTableAbs)
            .arg(table.raw())
            .arg(start);
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.table_owner(call, table)?;
        if owner != self.core {
            let request = RemoteRequest::StartScheduleTable {
                table,
                value: start,
                absolute: true,
            };
            return self.forward_status(call, owner, request);
        }
        match self.start_table_abs(table, start) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(call, err),
        }
    }

    /// `StartScheduleTableSynchron`: the table waits for the first
    /// `SyncScheduleTable`.
    pub fn start_schedule_table_synchron(&mut self, table: ScheduleTableId) -> OsResult<()> {
        let call = Call::new(ServiceId::StartScheduleTableSynchron).arg(table.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.table_owner(call, table)?;
        if owner != self.core {
            return self.forward_status(
                call,
                owner,
                RemoteRequest::StartScheduleTableSynchron { table },
            );
        }
        match self.start_table_synchron(table) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(call, err),
        }
    }

    /// `NextScheduleTable`: `next` starts when `current` ends its round.
    pub fn next_schedule_table(
        &mut self,
        current: ScheduleTableId,
        next: ScheduleTableId,
    ) -> OsResult<()> {
        let call = Call::new(ServiceId::NextScheduleTable)
            .arg(current.raw())
            .arg(next.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.table_owner(call, current)?;
        let same_counter = match (self.config.table(current), self.config.table(next)) {
            (Some(a), Some(b)) => a.counter == b.counter,
            _ => false,
        };
        if !same_counter {
            return self.fail(call, OsError::Id);
        }
        if owner != self.core {
            return self.forward_status(
                call,
                owner,
                RemoteRequest::ChainScheduleTable { current, next },
            );
        }

        if !self.tables[current.index()].is_running() {
            return self.fail(call, OsError::NoFunc);
        }
        if self.tables[next.index()].status != ScheduleTableStatus::Stopped {
            return self.fail(call, OsError::State);
        }
        if let Some(previous) = self.tables[current.index()].next.replace(next) {
            self.tables[previous.index()].status = ScheduleTableStatus::Stopped;
        }
        self.tables[next.index()].status = ScheduleTableStatus::Next;
        Ok(())
    }

    /// `StopScheduleTable`. A table chained behind it is stopped as well.
    pub fn stop_schedule_table(&mut self, table: ScheduleTableId) -> OsResult<()> {
        let call = Call::new(ServiceId::StopScheduleTable).arg(table.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.table_owner(call, table)?;
        if owner != self.core {
            return self.forward_status(call, owner, RemoteRequest::StopScheduleTable { table });
        }
        if self.tables[table.index()].status == ScheduleTableStatus::Stopped {
            return self.fail(call, OsError::NoFunc);
        }
        self.stop_table_local(table);
        Ok(())
    }

    /// `SyncScheduleTable`: tells the table that the synchronisation
    /// counter is at `value`.
    ///
    /// A waiting table starts so that its offset zero coincides with the
    /// synchronisation counter wrapping to zero. A running table further
    /// away than its precision is repositioned at once; expiry points
    /// skipped over are not processed.
    pub fn sync_schedule_table(&mut self, table: ScheduleTableId, value: TickType) -> OsResult<()> {
        let call = Call::new(ServiceId::SyncScheduleTable)
            .arg(table.raw())
            .arg(value);
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.table_owner(call, table)?;
        if owner != self.core {
            return self.forward_status(
                call,
                owner,
                RemoteRequest::SyncScheduleTable { table, value },
            );
        }
        match self.sync_table(table, value) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(call, err),
        }
    }

    /// `SetScheduleTableAsync`: stops synchronisation of a running table.
    pub fn set_schedule_table_async(&mut self, table: ScheduleTableId) -> OsResult<()> {
        let call = Call::new(ServiceId::SetScheduleTableAsync).arg(table.raw());
        self.enter(call, callers::TASK | callers::CAT2)?;
        let owner = self.table_owner(call, table)?;
        if owner != self.core {
            return self.forward_status(
                call,
                owner,
                RemoteRequest::SetScheduleTableAsync { table },
            );
        }
        let explicit = self
            .config
            .table(table)
            .is_some_and(|cfg| matches!(cfg.sync, SyncStrategy::Explicit { .. }));
        if !explicit {
            return self.fail(call, OsError::Id);
        }
        let ctl = &mut self.tables[table.index()];
        if !ctl.is_running() {
            return self.fail(call, OsError::State);
        }
        ctl.status = ScheduleTableStatus::Running;
        Ok(())
    }

    /// `GetScheduleTableStatus`.
    pub fn get_schedule_table_status(
        &mut self,
        table: ScheduleTableId,
    ) -> OsResult<ScheduleTableStatus> {
        let call = Call::new(ServiceId::GetScheduleTableStatus).arg(table.raw());
        self.enter(call, callers::TASK | callers::CAT2 | callers::HOOKS)?;
        let owner = self.table_owner(call, table)?;
        if owner != self.core {
            return match self.forward(
                call,
                owner,
                RemoteRequest::GetScheduleTableStatus { table },
            )? {
                RemoteReply::ScheduleTableStatus(status) => Ok(status),
                _ => self.fail(call, OsError::Core),
            };
        }
        Ok(self.tables[table.index()].status)
    }

    fn table_owner(&mut self, call: Call, table: ScheduleTableId) -> OsResult<CoreId> {
        let owner = self.config.table(table).map(|cfg| cfg.core);
        self.owner(call, owner)
    }

    fn start_table_rel(&mut self, table: ScheduleTableId, offset: TickType) -> OsResult<()> {
        let config = Arc::clone(&self.config);
        let cfg = config.table(table).ok_or(OsError::Id)?;
        if cfg.sync == SyncStrategy::Implicit {
            return Err(OsError::Id);
        }
        let max = config
            .counter(cfg.counter)
            .map(|counter| counter.max_allowed)
            .ok_or(OsError::Id)?;
        if offset == 0 || offset > max - cfg.initial_offset() {
            return Err(OsError::Value);
        }
        let ctl = &mut self.tables[table.index()];
        if ctl.status != ScheduleTableStatus::Stopped {
            return Err(OsError::State);
        }
        ctl.start(u64::from(offset), running_status(cfg));
        log::debug!("{}: {} starts in {} ticks", self.core, table, offset);
        Ok(())
    }

    fn start_table_abs(&mut self, table: ScheduleTableId, start: TickType) -> OsResult<()> {
        let config = Arc::clone(&self.config);
        let cfg = config.table(table).ok_or(OsError::Id)?;
        let max = config
            .counter(cfg.counter)
            .map(|counter| counter.max_allowed)
            .ok_or(OsError::Id)?;
        if start > max {
            return Err(OsError::Value);
        }
        let current = self.counters[cfg.counter.index()].current;
        let ctl = &mut self.tables[table.index()];
        if ctl.status != ScheduleTableStatus::Stopped {
            return Err(OsError::State);
        }
        let delay = match counter_sub(start, current, max) {
            0 => u64::from(max) + 1,
            ticks => u64::from(ticks),
        };
        ctl.start(delay, running_status(cfg));
        log::debug!("{}: {} starts at tick {}", self.core, table, start);
        Ok(())
    }

    fn start_table_synchron(&mut self, table: ScheduleTableId) -> OsResult<()> {
        let explicit = self
            .config
            .table(table)
            .is_some_and(|cfg| matches!(cfg.sync, SyncStrategy::Explicit { .. }));
        if !explicit {
            return Err(OsError::Id);
        }
        let ctl = &mut self.tables[table.index()];
        if ctl.status != ScheduleTableStatus::Stopped {
            return Err(OsError::State);
        }
        ctl.start(0, ScheduleTableStatus::Waiting);
        Ok(())
    }

    fn sync_table(&mut self, table: ScheduleTableId, value: TickType) -> OsResult<()> {
        let config = Arc::clone(&self.config);
        let cfg = config.table(table).ok_or(OsError::Id)?;
        let SyncStrategy::Explicit { precision } = cfg.sync else {
            return Err(OsError::Id);
        };
        if value >= cfg.duration {
            return Err(OsError::Value);
        }
        let ctl = &mut self.tables[table.index()];
        match ctl.status {
            ScheduleTableStatus::Stopped | ScheduleTableStatus::Next => Err(OsError::State),
            ScheduleTableStatus::Waiting => {
                ctl.start(
                    u64::from(cfg.duration - value),
                    ScheduleTableStatus::RunningAndSynchronous,
                );
                Ok(())
            }
            ScheduleTableStatus::Running | ScheduleTableStatus::RunningAndSynchronous => {
                let deviation = if ctl.delay > 0 {
                    TickType::MAX
                } else {
                    let diff = ctl.position.abs_diff(value);
                    diff.min(cfg.duration - diff)
                };
                if deviation > precision {
                    log::debug!(
                        "{}: {} repositioned from {} to {}",
                        self.core,
                        table,
                        ctl.position,
                        value
                    );
                    ctl.delay = 0;
                    ctl.position = value;
                    ctl.next_point = cfg.points.partition_point(|point| point.offset <= value);
                }
                ctl.status = ScheduleTableStatus::RunningAndSynchronous;
                Ok(())
            }
        }
    }

    pub(crate) fn autostart_table(
        &mut self,
        table: ScheduleTableId,
        autostart: TableAutostart,
    ) -> OsResult<()> {
        match autostart {
            TableAutostart::Relative(offset) => self.start_table_rel(table, offset),
            TableAutostart::Absolute(start) => self.start_table_abs(table, start),
            TableAutostart::Synchron => self.start_table_synchron(table),
        }
    }

    /// Stops a local table and the table chained behind it.
    pub(crate) fn stop_table_local(&mut self, table: ScheduleTableId) {
        let Some(ctl) = self.tables.get_mut(table.index()) else {
            return;
        };
        ctl.status = ScheduleTableStatus::Stopped;
        ctl.delay = 0;
        if let Some(next) = ctl.next.take() {
            self.tables[next.index()].status = ScheduleTableStatus::Stopped;
        }
        for other in &mut self.tables {
            if other.next == Some(table) {
                other.next = None;
            }
        }
    }

    /// One tick of `counter` for every running table it drives.
    pub(crate) fn advance_tables(&mut self, counter: os_core::CounterId) {
        let running: Vec<ScheduleTableId> = self
            .config
            .tables
            .iter()
            .filter(|cfg| cfg.core == self.core && cfg.counter == counter)
            .map(|cfg| cfg.id)
            .filter(|id| self.tables[id.index()].is_running())
            .collect();
        for table in running {
            if self.tables[table.index()].is_running() {
                self.tick_table(table);
            }
        }
    }

    fn tick_table(&mut self, table: ScheduleTableId) {
        let config = Arc::clone(&self.config);
        let Some(cfg) = config.table(table) else {
            return;
        };
        let ctl = &mut self.tables[table.index()];
        if ctl.delay > 0 {
            ctl.delay -= 1;
            if ctl.delay > 0 {
                return;
            }
            ctl.position = 0;
            ctl.next_point = 0;
        } else {
            ctl.position += 1;
            if ctl.position >= cfg.duration {
                if let Some(next) = ctl.next.take() {
                    ctl.status = ScheduleTableStatus::Stopped;
                    let status = config
                        .table(next)
                        .map_or(ScheduleTableStatus::Running, running_status);
                    self.tables[next.index()].start(0, status);
                    log::debug!("{}: {} hands over to {}", self.core, table, next);
                    self.process_points(next);
                    return;
                }
                if !cfg.repeating {
                    ctl.status = ScheduleTableStatus::Stopped;
                    log::debug!("{}: {} finished", self.core, table);
                    return;
                }
                ctl.position = 0;
                ctl.next_point = 0;
            }
        }
        self.process_points(table);
    }

    /// Processes the expiry points at the table's current offset.
    fn process_points(&mut self, table: ScheduleTableId) {
        let config = Arc::clone(&self.config);
        let Some(cfg) = config.table(table) else {
            return;
        };
        loop {
            let ctl = &mut self.tables[table.index()];
            if !ctl.is_running() {
                break;
            }
            let Some(point) = cfg.points.get(ctl.next_point) else {
                break;
            };
            if point.offset != ctl.position {
                break;
            }
            ctl.next_point += 1;
            self.emit(records::alarm::EXPIRY_POINT, |p| {
                p.u16(table.raw()).u32(point.offset);
            });
            for action in &point.actions {
                // Failures are reported by the routed helpers.
                let _ = match *action {
                    ExpiryAction::ActivateTask(task) => {
                        let call = Call::new(ServiceId::ActivateTask).arg(task.raw());
                        self.activate_routed(call, task)
                    }
                    ExpiryAction::SetEvent(task, mask) => {
                        let call = Call::new(ServiceId::SetEvent).arg(task.raw()).arg(mask);
                        self.set_event_routed(call, task, mask)
                    }
                };
            }
        }
    }
}
