use super::*;

use crate::config::{AppConfig, IsrCategory, IsrConfig, ResourceConfig, TaskConfig};
use crate::kernel::CorePhase;
use crate::resource::Holder;
use os_core::{AppId, ApplicationState, IsrId, Priority, ResourceId};

const R2: ResourceId = ResourceId(0);
const R4: ResourceId = ResourceId(1);
const R6: ResourceId = ResourceId(2);

fn config() -> OsConfig {
    OsConfig::builder()
        .task(TaskConfig::new(0, "user").priority(1).resource(0).resource(1).resource(2))
        .task(TaskConfig::new(1, "high").priority(5))
        .task(TaskConfig::new(2, "mid").priority(3))
        .resource(ResourceConfig::new(0, "r2", 2))
        .resource(ResourceConfig::new(1, "r4", 4))
        .resource(ResourceConfig::new(2, "r6", 6))
        .build()
        .unwrap()
}

fn prio(kernel: &CoreKernel, task: u16) -> u16 {
    kernel.task_priority(TaskId(task)).unwrap().raw()
}

#[test]
fn ceiling_raises_and_release_restores() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    start_running(&mut kernel, TaskId(0));

    kernel.get_resource(R4).unwrap();
    assert_eq!(prio(&kernel, 0), 4);
    kernel.get_resource(R6).unwrap();
    assert_eq!(prio(&kernel, 0), 6);
    assert_eq!(kernel.held_resources(TaskId(0)), vec![R6, R4]);
    assert_eq!(kernel.resource_holder(R6), Some(Holder::Task(TaskId(0))));

    kernel.release_resource(R6).unwrap();
    assert_eq!(prio(&kernel, 0), 4);
    kernel.release_resource(R4).unwrap();
    assert_eq!(prio(&kernel, 0), 1);
    assert_eq!(kernel.resource_holder(R4), None);
}

#[test]
fn lower_ceiling_inside_higher_keeps_the_priority() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    start_running(&mut kernel, TaskId(0));

    kernel.get_resource(R6).unwrap();
    kernel.get_resource(R2).unwrap();
    assert_eq!(prio(&kernel, 0), 6);
    kernel.release_resource(R2).unwrap();
    assert_eq!(prio(&kernel, 0), 6);
    kernel.release_resource(R6).unwrap();
    assert_eq!(prio(&kernel, 0), 1);
}

#[test]
fn out_of_order_release_is_rejected() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    start_running(&mut kernel, TaskId(0));

    kernel.get_resource(R2).unwrap();
    kernel.get_resource(R4).unwrap();
    assert_eq!(kernel.release_resource(R2), Err(OsError::NoFunc));
    assert_eq!(kernel.held_resources(TaskId(0)), vec![R4, R2]);
    assert_eq!(prio(&kernel, 0), 4);

    kernel.release_resource(R4).unwrap();
    kernel.release_resource(R2).unwrap();
    assert!(kernel.held_resources(TaskId(0)).is_empty());
}

#[test]
fn taken_resource_cannot_be_taken_again() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    start_running(&mut kernel, TaskId(0));

    kernel.get_resource(R2).unwrap();
    assert_eq!(kernel.get_resource(R2), Err(OsError::Access));
    assert_eq!(kernel.get_resource(ResourceId(9)), Err(OsError::Id));
}

#[test]
fn ceiling_below_the_caller_is_refused() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    start_running(&mut kernel, TaskId(1));

    assert_eq!(kernel.get_resource(R2), Err(OsError::Access));
    assert_eq!(kernel.release_resource(R2), Err(OsError::Access));
}

#[test]
fn terminating_with_held_resources_fails() {
    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    start_running(&mut kernel, TaskId(0));

    kernel.get_resource(R2).unwrap();
    assert_eq!(kernel.terminate_task(), Err(OsError::Resource));
    assert_eq!(kernel.schedule(), Err(OsError::Resource));
}

#[test]
fn resource_defers_preemption_up_to_its_ceiling() {
    let journal = Journal::default();
    let log = journal.clone();
    let mut steps = 0;
    let (builder, _) = core0(config());
    let mut kernel = builder
        .task(TaskId(0), move |api: &mut TaskApi<'_>| {
            steps += 1;
            log.push(format!("user {steps}"));
            match steps {
                1 => {
                    api.get_resource(R4).unwrap();
                    api.activate_task(TaskId(2)).unwrap();
                    api.activate_task(TaskId(1)).unwrap();
                    TaskExit::Continue
                }
                2 => {
                    api.release_resource(R4).unwrap();
                    TaskExit::Continue
                }
                _ => TaskExit::Terminate,
            }
        })
        .task(TaskId(1), logging_task(&journal, "high"))
        .task(TaskId(2), logging_task(&journal, "mid"))
        .build()
        .unwrap();
    kernel.start().unwrap();
    kernel.activate_task(TaskId(0)).unwrap();

    kernel.run_until_idle();
    assert_eq!(
        journal.entries(),
        vec!["user 1", "high", "user 2", "mid", "user 3"]
    );
}

#[test]
fn killed_holder_releases_silently() {
    let journal = Journal::default();
    let log = journal.clone();
    let config = OsConfig::builder()
        .app(AppConfig::new(0, "app"))
        .task(TaskConfig::new(0, "user").resource(0).app(0))
        .resource(ResourceConfig::new(0, "r", 2))
        .build()
        .unwrap();
    let (builder, _) = core0(config);
    let mut kernel = builder
        .task(TaskId(0), move |api: &mut TaskApi<'_>| {
            api.get_resource(ResourceId(0)).unwrap();
            api.terminate_application(AppId(0), false).unwrap();
            log.push(format!("{:?}", api.release_resource(ResourceId(0))));
            TaskExit::Continue
        })
        .build()
        .unwrap();
    kernel.start().unwrap();
    kernel.activate_task(TaskId(0)).unwrap();

    kernel.run_until_idle();
    assert_eq!(journal.entries(), vec!["Ok(())"]);
    assert_eq!(kernel.error_count(), 0);
    assert_eq!(kernel.resource_holder(ResourceId(0)), None);
    assert_eq!(
        kernel.get_application_state(AppId(0)),
        Ok(ApplicationState::Terminated)
    );
}

#[test]
fn interrupt_ceiling_masks_the_interrupt() {
    let journal = Journal::default();
    let log = journal.clone();
    let config = OsConfig::builder()
        .task(TaskConfig::new(0, "user").resource(0))
        .resource(ResourceConfig::interrupt(0, "irq2", 2))
        .isr(IsrConfig::new(0, "tick", IsrCategory::Cat2, 1))
        .build()
        .unwrap();
    let (builder, _) = core0(config);
    let mut kernel = builder
        .isr(IsrId(0), move |_kernel: &mut CoreKernel, _isr: IsrId| log.push("isr"))
        .build()
        .unwrap();
    start_running(&mut kernel, TaskId(0));

    kernel.get_resource(ResourceId(0)).unwrap();
    assert_eq!(kernel.task_priority(TaskId(0)), Some(Priority::interrupt(2)));
    assert_eq!(kernel.interrupt_mask(), Some(2));
    kernel.trigger_interrupt(IsrId(0)).unwrap();
    assert!(journal.entries().is_empty());
    assert!(kernel.isr_pending(IsrId(0)));

    kernel.release_resource(ResourceId(0)).unwrap();
    assert_eq!(journal.entries(), vec!["isr"]);
    assert_eq!(kernel.interrupt_mask(), None);
    assert!(!kernel.isr_pending(IsrId(0)));
}

#[test]
fn exceeding_the_lock_budget_is_a_protection_error() {
    let journal = Journal::default();
    let config = OsConfig::builder()
        .task(TaskConfig::new(0, "user").resource(0))
        .resource(ResourceConfig::new(0, "r", 2).lock_budget(10))
        .build()
        .unwrap();
    let (builder, clock) = core0(config);
    let mut kernel = builder.hooks(JournalHooks::new(&journal)).build().unwrap();
    start_running(&mut kernel, TaskId(0));

    kernel.get_resource(ResourceId(0)).unwrap();
    clock.advance(50);
    assert_eq!(kernel.release_resource(ResourceId(0)), Ok(()));
    assert_eq!(
        kernel.get_error_info().map(|info| info.error),
        Some(OsError::ProtectionLocked)
    );
    assert_eq!(journal.count("protection E_OS_PROTECTION_LOCKED"), 1);
    assert_eq!(kernel.resource_max_hold(ResourceId(0)), Some(50));
    assert_eq!(kernel.phase(), CorePhase::Running);
}

#[quickcheck_macros::quickcheck]
fn release_restores_the_priority_before_the_matching_get(order: Vec<u8>) -> bool {
    let mut sequence: Vec<ResourceId> = Vec::new();
    for pick in order {
        let resource = ResourceId(u16::from(pick % 3));
        if !sequence.contains(&resource) {
            sequence.push(resource);
        }
    }

    let (builder, _) = core0(config());
    let mut kernel = builder.build().unwrap();
    start_running(&mut kernel, TaskId(0));

    let ceilings = [2, 4, 6];
    let mut before = Vec::new();
    for &resource in &sequence {
        let prior = prio(&kernel, 0);
        before.push(prior);
        if kernel.get_resource(resource).is_err() {
            return false;
        }
        if prio(&kernel, 0) != prior.max(ceilings[resource.index()]) {
            return false;
        }
    }
    for (&resource, &prior) in sequence.iter().zip(&before).rev() {
        if kernel.release_resource(resource).is_err() || prio(&kernel, 0) != prior {
            return false;
        }
    }
    prio(&kernel, 0) == 1
}
