use super::*;

use crate::config::{AppConfig, TaskConfig};
use crate::dispatch::Dispatched;
use crate::error::{Call, ErrorAction, HookKind, PanicCode, ServiceId};
use crate::kernel::{CallContext, CorePhase, Step};
use crate::task::{ReadyKind, TaskState};
use os_core::AppId;

fn single_task() -> OsConfig {
    OsConfig::builder()
        .task(TaskConfig::new(0, "worker").priority(1))
        .build()
        .unwrap()
}

#[test]
fn error_hook_sees_service_and_error() {
    let journal = Journal::default();
    let (builder, _) = core0(single_task());
    let mut kernel = builder.hooks(JournalHooks::new(&journal)).build().unwrap();
    start_running(&mut kernel, TaskId(0));

    assert_eq!(kernel.activate_task(TaskId(9)), Err(OsError::Id));
    assert_eq!(journal.entries(), vec!["startup", "error ActivateTask E_OS_ID"]);

    let info = kernel.get_error_info().unwrap();
    assert_eq!(info.service, ServiceId::ActivateTask);
    assert_eq!(info.params, [9, 0, 0]);
    assert_eq!(info.task, Some(TaskId(0)));
    assert_eq!(info.isr, None);
}

struct ReentrantHooks {
    journal: Journal,
}

impl KernelHooks for ReentrantHooks {
    fn error(&mut self, kernel: &mut CoreKernel, info: &ErrorInfo) {
        self.journal.push(format!("error {}", info.error));
        assert_eq!(kernel.context(), CallContext::ErrorHook);
        // Not allowed from the error hook; must not come back here.
        let nested = kernel.activate_task(TaskId(0));
        self.journal.push(format!("nested {nested:?}"));
    }
}

#[test]
fn errors_inside_the_error_hook_do_not_reenter_it() {
    let journal = Journal::default();
    let (builder, _) = core0(single_task());
    let mut kernel = builder
        .hooks(ReentrantHooks {
            journal: journal.clone(),
        })
        .build()
        .unwrap();
    kernel.start().unwrap();

    assert_eq!(kernel.activate_task(TaskId(3)), Err(OsError::Id));
    assert_eq!(
        journal.entries(),
        vec!["error E_OS_ID", "nested Err(CallLevel)"]
    );
    assert_eq!(kernel.error_count(), 2);
    assert_eq!(kernel.context(), CallContext::Task);
}

#[test]
fn kill_caller_rule_terminates_the_running_task() {
    let config = OsConfig::builder()
        .task(TaskConfig::new(0, "worker").priority(1))
        .error_rule(
            ServiceId::ActivateTask,
            OsError::Limit,
            HookKind::None,
            ErrorAction::KillCaller,
        )
        .build()
        .unwrap();
    let (builder, _) = core0(config);
    let mut kernel = builder.build().unwrap();
    start_running(&mut kernel, TaskId(0));

    assert_eq!(kernel.activate_task(TaskId(0)), Err(OsError::Limit));
    assert_eq!(kernel.task_state(TaskId(0)), Some(TaskState::Suspended));
    assert_eq!(kernel.dispatch(ReadyKind::Sync), Dispatched::Idle);
}

#[test]
fn shutdown_rule_stops_the_core() {
    let journal = Journal::default();
    let config = OsConfig::builder()
        .task(TaskConfig::new(0, "worker"))
        .error_rule(
            ServiceId::ActivateTask,
            OsError::Id,
            HookKind::ErrorHook,
            ErrorAction::Shutdown,
        )
        .build()
        .unwrap();
    let (builder, _) = core0(config);
    let mut kernel = builder.hooks(JournalHooks::new(&journal)).build().unwrap();
    kernel.start().unwrap();

    assert_eq!(kernel.activate_task(TaskId(4)), Err(OsError::Id));
    assert_eq!(kernel.phase(), CorePhase::Shutdown(Some(OsError::Id)));
    assert_eq!(
        journal.entries(),
        vec!["startup", "error ActivateTask E_OS_ID", "shutdown E_OS_ID"]
    );
    assert_eq!(kernel.activate_task(TaskId(0)), Err(OsError::Core));
    assert_eq!(kernel.run_once(), Step::Halted);
}

fn budgeted() -> OsConfig {
    OsConfig::builder()
        .task(TaskConfig::new(0, "slow").exec_budget(10))
        .build()
        .unwrap()
}

#[test]
fn protection_hook_decides_about_overruns() {
    let journal = Journal::default();
    let (builder, clock) = core0(budgeted());
    let slow_clock = clock.clone();
    let mut hooks = JournalHooks::new(&journal);
    hooks.protection = ProtectionAction::TerminateTaskIsr;
    let mut kernel = builder
        .task(TaskId(0), move |_api: &mut TaskApi<'_>| {
            slow_clock.advance(25);
            TaskExit::Continue
        })
        .hooks(hooks)
        .build()
        .unwrap();
    kernel.start().unwrap();
    kernel.activate_task(TaskId(0)).unwrap();

    kernel.run_until_idle();
    assert_eq!(journal.count("protection E_OS_PROTECTION_TIME"), 1);
    assert_eq!(kernel.task_state(TaskId(0)), Some(TaskState::Suspended));
    assert_eq!(kernel.phase(), CorePhase::Running);
}

#[test]
fn overrun_without_protection_hook_shuts_down() {
    let (builder, clock) = core0(budgeted());
    let slow_clock = clock.clone();
    let mut kernel = builder
        .task(TaskId(0), move |_api: &mut TaskApi<'_>| {
            slow_clock.advance(11);
            TaskExit::Terminate
        })
        .build()
        .unwrap();
    kernel.start().unwrap();
    kernel.activate_task(TaskId(0)).unwrap();

    assert_eq!(kernel.run_until_idle(), Step::Halted);
    assert_eq!(
        kernel.phase(),
        CorePhase::Shutdown(Some(OsError::ProtectionTime))
    );
}

struct NestedProtection {
    journal: Journal,
}

impl KernelHooks for NestedProtection {
    fn protection(&mut self, kernel: &mut CoreKernel, error: OsError) -> ProtectionAction {
        self.journal.push(format!("protection {error}"));
        kernel.report(Call::new(ServiceId::Protection), OsError::ProtectionLocked);
        ProtectionAction::Ignore
    }
}

#[test]
fn protection_error_inside_the_protection_hook_shuts_down() {
    let journal = Journal::default();
    let (builder, _) = core0(single_task());
    let mut kernel = builder
        .hooks(NestedProtection {
            journal: journal.clone(),
        })
        .build()
        .unwrap();
    kernel.start().unwrap();

    kernel.report(Call::new(ServiceId::Protection), OsError::ProtectionTime);
    assert_eq!(journal.entries(), vec!["protection E_OS_PROTECTION_TIME"]);
    assert_eq!(
        kernel.phase(),
        CorePhase::Shutdown(Some(OsError::ProtectionLocked))
    );
}

#[test]
fn panic_runs_no_hooks() {
    let journal = Journal::default();
    let (builder, _) = core0(single_task());
    let mut kernel = builder.hooks(JournalHooks::new(&journal)).build().unwrap();
    kernel.start().unwrap();
    kernel.activate_task(TaskId(0)).unwrap();
    kernel.tcb_mut(TaskId(0)).unwrap().state = TaskState::Suspended;

    assert_eq!(kernel.dispatch(ReadyKind::Sync), Dispatched::Halted);
    assert_eq!(kernel.phase(), CorePhase::Halted(PanicCode::InvalidTaskState));
    assert_eq!(journal.entries(), vec!["startup"]);
}

#[test]
fn services_fail_while_interrupts_are_disabled() {
    let (builder, _) = core0(single_task());
    let mut kernel = builder.build().unwrap();
    kernel.start().unwrap();

    kernel.disable_all_interrupts();
    kernel.disable_all_interrupts();
    assert_eq!(kernel.activate_task(TaskId(0)), Err(OsError::DisabledInt));
    kernel.enable_all_interrupts();
    assert_eq!(kernel.activate_task(TaskId(0)), Err(OsError::DisabledInt));
    kernel.enable_all_interrupts();
    kernel.enable_all_interrupts();
    assert_eq!(kernel.activate_task(TaskId(0)), Ok(()));
}

#[derive(Clone)]
struct AppHooks {
    journal: Journal,
}

impl KernelHooks for AppHooks {
    fn error(&mut self, _kernel: &mut CoreKernel, info: &ErrorInfo) {
        self.journal.push(format!("error {}", info.error));
    }

    fn app_error(&mut self, _kernel: &mut CoreKernel, app: AppId, info: &ErrorInfo) {
        self.journal.push(format!("{app} error {}", info.error));
    }
}

#[test]
fn application_error_hook_follows_the_system_hook() {
    let journal = Journal::default();
    let config = OsConfig::builder()
        .app(AppConfig::new(0, "with-hook").error_hook())
        .app(AppConfig::new(1, "without"))
        .task(TaskConfig::new(0, "a").app(0))
        .task(TaskConfig::new(1, "b").app(1))
        .build()
        .unwrap();
    let (builder, _) = core0(config);
    let mut kernel = builder
        .hooks(AppHooks {
            journal: journal.clone(),
        })
        .build()
        .unwrap();
    start_running(&mut kernel, TaskId(0));

    assert_eq!(kernel.activate_task(TaskId(0)), Err(OsError::Limit));
    assert_eq!(journal.entries(), vec!["error E_OS_LIMIT", "app#0 error E_OS_LIMIT"]);

    kernel.terminate_task().unwrap();
    kernel.activate_task(TaskId(1)).unwrap();
    kernel.dispatch(ReadyKind::Sync);
    assert_eq!(kernel.activate_task(TaskId(1)), Err(OsError::Limit));
    assert_eq!(journal.count("error"), 2);
    assert_eq!(journal.count("app#"), 1);
}

#[test]
fn services_are_refused_before_start() {
    let (builder, _) = core0(single_task());
    let mut kernel = builder.build().unwrap();

    assert_eq!(kernel.activate_task(TaskId(0)), Err(OsError::Core));
    assert_eq!(kernel.error_count(), 0);
    kernel.start().unwrap();
    assert_eq!(kernel.start(), Err(OsError::State));
}
