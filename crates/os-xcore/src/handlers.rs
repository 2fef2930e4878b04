//! Execution of received messages on the owning core.
//!
//! Requests run at interrupt level, as they would from the inter-core
//! interrupt: a task displaced by their effects resumes asynchronously.
//! Errors of the service are reported here, on the owning core, and the
//! status travels back in the answer.

use os_core::{OsError, OsResult, E_OK};
use os_kernel::{CoreKernel, RemoteRequest};

use crate::message::Message;
use crate::router::CoreRouter;

/// `ReceiveMessage` dispatch for one message.
pub(crate) fn handle(router: &CoreRouter, kernel: &mut CoreKernel, message: Message) {
    if let Some(done) = message.completion() {
        match &message.result {
            Some(slot) => slot.complete(done),
            None => log::warn!("{}: {} has no reply slot", kernel.core(), message),
        }
        return;
    }

    let result = match message.decode_request() {
        Some(request) => kernel.in_interrupt(|kernel| execute(kernel, request)),
        None => {
            log::warn!("{}: malformed request {}", kernel.core(), message);
            Err(OsError::Value)
        }
    };
    let (status, value) = match result {
        Ok(value) => (E_OK, value),
        Err(err) => (err.code(), 0),
    };
    if let Some(answer) = message.answer(status, value) {
        router.reply(kernel, answer);
    }
}

/// Runs `request` through the kernel service of the same name. The value
/// word is the service's output, 0 for status-only services.
fn execute(kernel: &mut CoreKernel, request: RemoteRequest) -> OsResult<u32> {
    use RemoteRequest as R;

    if !kernel.is_running() {
        return Err(OsError::Core);
    }
    let value = match request {
        R::ActivateTask { task } => kernel.activate_task(task).map(done)?,
        R::GetTaskState { task } => kernel.get_task_state(task)? as u32,
        R::SetEvent { task, mask } => kernel.set_event(task, mask).map(done)?,
        R::GetEvent { task } => kernel.get_event(task)?,
        R::GetAlarm { alarm } => kernel.get_alarm(alarm)?,
        R::SetRelAlarm {
            alarm,
            increment,
            cycle,
        } => kernel.set_rel_alarm(alarm, increment, cycle).map(done)?,
        R::SetAbsAlarm { alarm, start, cycle } => {
            kernel.set_abs_alarm(alarm, start, cycle).map(done)?
        }
        R::CancelAlarm { alarm } => kernel.cancel_alarm(alarm).map(done)?,
        R::StartScheduleTable {
            table,
            value,
            absolute: true,
        } => kernel.start_schedule_table_abs(table, value).map(done)?,
        R::StartScheduleTable {
            table,
            value,
            absolute: false,
        } => kernel.start_schedule_table_rel(table, value).map(done)?,
        R::ChainScheduleTable { current, next } => {
            kernel.next_schedule_table(current, next).map(done)?
        }
        R::StopScheduleTable { table } => kernel.stop_schedule_table(table).map(done)?,
        R::SyncScheduleTable { table, value } => {
            kernel.sync_schedule_table(table, value).map(done)?
        }
        R::SetScheduleTableAsync { table } => kernel.set_schedule_table_async(table).map(done)?,
        R::GetScheduleTableStatus { table } => kernel.get_schedule_table_status(table)? as u32,
        R::DisableInterruptSource { isr } => kernel.disable_interrupt_source(isr).map(done)?,
        R::EnableInterruptSource { isr, clear_pending } => kernel
            .enable_interrupt_source(isr, clear_pending)
            .map(done)?,
        R::GetCount { counter } => kernel.get_counter_value(counter)?,
        R::AdvanceCounter { counter } => kernel.increment_counter(counter).map(done)?,
        R::StartScheduleTableSynchron { table } => {
            kernel.start_schedule_table_synchron(table).map(done)?
        }
        R::TerminateApplication { app, restart } => {
            kernel.terminate_application(app, restart).map(done)?
        }
        R::GetApplicationState { app } => kernel.get_application_state(app)? as u32,
        R::ShutdownCore { error } => {
            log::info!("{}: shutdown requested by another core", kernel.core());
            kernel.shutdown_core(error);
            0
        }
        R::MeasureCpuLoad { query } => {
            let core = kernel.core();
            u32::from(kernel.measure_cpu_load(core, query)?)
        }
    };
    Ok(value)
}

fn done(_: ()) -> u32 {
    0
}
