use super::*;

use crate::config::{
    AlarmAction, AlarmConfig, AppConfig, CounterConfig, ExpiryPoint, IsrCategory, IsrConfig,
    ScheduleTableConfig, TaskConfig,
};
use crate::dispatch::Dispatched;
use crate::kernel::CorePhase;
use crate::task::{ReadyKind, TaskState};
use os_core::{AlarmId, AppId, ApplicationState, IsrId, ScheduleTableId, ScheduleTableStatus};

const VICTIM: AppId = AppId(0);
const OTHER: AppId = AppId(1);

const MEMBER: TaskId = TaskId(0);
const WAITER: TaskId = TaskId(1);
const RESTART: TaskId = TaskId(2);
const OUTSIDER: TaskId = TaskId(3);

fn config() -> OsConfig {
    OsConfig::builder()
        .app(AppConfig::new(0, "victim").restart_task(2))
        .app(AppConfig::new(1, "other"))
        .task(TaskConfig::new(0, "member").priority(1).app(0).exec_budget(10))
        .task(TaskConfig::new(1, "waiter").priority(2).extended().app(0))
        .task(TaskConfig::new(2, "restart").priority(3).app(0))
        .task(TaskConfig::new(3, "outsider").priority(1).app(1))
        .counter(CounterConfig::new(0, "ticks", 100))
        .alarm(AlarmConfig::new(0, "alarm", 0, AlarmAction::ActivateTask(MEMBER)).app(0))
        .schedule_table(
            ScheduleTableConfig::new(0, "table", 0, 10)
                .point(ExpiryPoint::new(0).activate(0))
                .app(0),
        )
        .isr(IsrConfig::new(0, "irq", IsrCategory::Cat2, 1).app(0))
        .build()
        .unwrap()
}

#[test]
fn terminating_an_application_removes_its_objects() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    kernel.start().unwrap();
    kernel.activate_task(MEMBER).unwrap();
    kernel.activate_task(WAITER).unwrap();
    kernel.activate_task(OUTSIDER).unwrap();
    kernel.set_rel_alarm(AlarmId(0), 5, 0).unwrap();
    kernel
        .start_schedule_table_rel(ScheduleTableId(0), 1)
        .unwrap();

    kernel.terminate_application(VICTIM, false).unwrap();

    assert_eq!(kernel.task_state(MEMBER), Some(TaskState::Suspended));
    assert_eq!(kernel.task_state(WAITER), Some(TaskState::Suspended));
    assert_eq!(kernel.get_alarm(AlarmId(0)), Err(OsError::NoFunc));
    assert_eq!(
        kernel.get_schedule_table_status(ScheduleTableId(0)),
        Ok(ScheduleTableStatus::Stopped)
    );
    assert!(!kernel.isr_enabled(IsrId(0)));
    assert_eq!(
        kernel.get_application_state(VICTIM),
        Ok(ApplicationState::Terminated)
    );
    assert_eq!(kernel.dispatch(ReadyKind::Sync), Dispatched::Started(OUTSIDER));
}

#[test]
fn terminated_application_refuses_activations() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    kernel.start().unwrap();

    kernel.terminate_application(VICTIM, false).unwrap();
    assert_eq!(kernel.activate_task(MEMBER), Err(OsError::Access));
    assert_eq!(kernel.activate_task(OUTSIDER), Ok(()));
    assert_eq!(
        kernel.terminate_application(VICTIM, false),
        Err(OsError::State)
    );
    assert_eq!(
        kernel.get_application_state(AppId(7)),
        Err(OsError::Id)
    );
}

#[test]
fn restart_runs_the_restart_task_until_access_is_allowed() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    kernel.start().unwrap();

    kernel.terminate_application(VICTIM, true).unwrap();
    assert_eq!(
        kernel.get_application_state(VICTIM),
        Ok(ApplicationState::Restarting)
    );
    assert_eq!(kernel.task_state(RESTART), Some(TaskState::New));
    assert_eq!(kernel.activate_task(MEMBER), Err(OsError::Access));

    assert_eq!(kernel.dispatch(ReadyKind::Sync), Dispatched::Started(RESTART));
    kernel.allow_access().unwrap();
    assert_eq!(
        kernel.get_application_state(VICTIM),
        Ok(ApplicationState::Accessible)
    );
    assert_eq!(kernel.allow_access(), Err(OsError::State));
    assert_eq!(kernel.activate_task(MEMBER), Ok(()));
}

#[test]
fn allow_access_needs_an_application_caller() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    kernel.start().unwrap();

    assert_eq!(kernel.allow_access(), Err(OsError::Access));
    kernel.activate_task(OUTSIDER).unwrap();
    kernel.dispatch(ReadyKind::Sync);
    assert_eq!(kernel.allow_access(), Err(OsError::State));
    assert_eq!(
        kernel.get_application_state(OTHER),
        Ok(ApplicationState::Accessible)
    );
}

#[test]
fn protection_hook_can_restart_the_application() {
    let journal = Journal::default();
    let (builder, clock) = core0(config());
    let slow = clock.clone();
    let mut hooks = JournalHooks::new(&journal);
    hooks.protection = ProtectionAction::TerminateApplicationRestart;
    let mut kernel = builder
        .task(MEMBER, move |_api: &mut TaskApi<'_>| {
            slow.advance(50);
            TaskExit::Terminate
        })
        .task(RESTART, move |api: &mut TaskApi<'_>| {
            api.allow_access().unwrap();
            TaskExit::Terminate
        })
        .hooks(hooks)
        .build()
        .unwrap();
    kernel.start().unwrap();
    kernel.activate_task(MEMBER).unwrap();

    kernel.run_until_idle();
    assert_eq!(journal.count("protection E_OS_PROTECTION_TIME"), 1);
    assert_eq!(kernel.stats().starts, 2);
    assert_eq!(
        kernel.get_application_state(VICTIM),
        Ok(ApplicationState::Accessible)
    );
    assert_eq!(kernel.phase(), CorePhase::Running);
}

#[test]
fn shutdown_runs_the_hook_once() {
    let journal = Journal::default();
    let (builder, _) = core0(config());
    let mut kernel = builder.hooks(JournalHooks::new(&journal)).build().unwrap();
    start_running(&mut kernel, OUTSIDER);

    kernel.shutdown_os(None).unwrap();
    assert_eq!(kernel.phase(), CorePhase::Shutdown(None));
    assert_eq!(kernel.current_task(), None);
    assert_eq!(kernel.shutdown_os(None), Err(OsError::Core));
    assert_eq!(kernel.activate_task(OUTSIDER), Err(OsError::Core));
    assert_eq!(journal.entries(), vec!["startup", "shutdown E_OK"]);
}

#[test]
fn shutdown_all_cores_on_a_single_core() {
    let journal = Journal::default();
    let (builder, _) = core0(config());
    let mut kernel = builder.hooks(JournalHooks::new(&journal)).build().unwrap();
    kernel.start().unwrap();

    kernel.shutdown_all_cores(Some(OsError::Value)).unwrap();
    assert_eq!(kernel.phase(), CorePhase::Shutdown(Some(OsError::Value)));
    assert_eq!(journal.count("shutdown E_OS_VALUE"), 1);
}
