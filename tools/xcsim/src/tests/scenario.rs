use std::sync::Arc;
use std::time::Duration;

use os_core::{CoreId, TaskId};
use os_kernel::{CoreKernel, CorePhase, Step, TaskState};
use os_trace::{MemoryBackend, TraceConfig, Tracer};

use crate::{merge_streams, Scenario, ScenarioError, ScriptBody, ScriptStep, TraceStream};

const REMOTE_ACTIVATION: &str = include_str!("../../scenarios/remote_activation.json");
const CYCLIC_ALARM: &str = include_str!("../../scenarios/cyclic_alarm.json");

fn minimal(extra: &str) -> String {
    format!(
        r#"{{
            "config": {{
                "cores": 2,
                "tasks": [
                    {{ "id": 0, "name": "a", "core": 0, "priority": 1,
                       "max_activations": 1, "stack_words": 128 }}
                ]
            }}{extra}
        }}"#
    )
}

#[test]
fn bundled_scenarios_are_valid() {
    let remote = Scenario::from_json(REMOTE_ACTIVATION).unwrap();
    assert_eq!(remote.config.cores, 2);
    assert_eq!(remote.scripts.len(), 3);
    assert_eq!(remote.run_for(), Duration::from_millis(500));
    assert_eq!(
        remote.scripts[0].steps,
        vec![ScriptStep::Activate(TaskId(2)), ScriptStep::Terminate]
    );

    let alarm = Scenario::from_json(CYCLIC_ALARM).unwrap();
    assert_eq!(alarm.config.alarms.len(), 1);
    assert_eq!(alarm.ticks[0].period_us, 1_000);
    assert!(alarm.config.tasks[0].autostart);
}

#[test]
fn optional_sections_have_defaults() {
    let scenario = Scenario::from_json(&minimal("")).unwrap();
    assert!(scenario.scripts.is_empty());
    assert!(scenario.ticks.is_empty());
    assert_eq!(scenario.run_for(), Duration::from_secs(1));
    assert_eq!(scenario.config.message_queue_size, 16);
    assert_eq!(scenario.config.tasks[0].run_priority, None);
}

#[test]
fn scripts_must_name_configured_tasks_once() {
    let unknown = minimal(r#", "scripts": [ { "task": 4, "steps": [] } ]"#);
    assert!(matches!(
        Scenario::from_json(&unknown),
        Err(ScenarioError::UnknownTask(TaskId(4)))
    ));

    let twice = minimal(
        r#", "scripts": [ { "task": 0, "steps": [] }, { "task": 0, "steps": ["yield"] } ]"#,
    );
    assert!(matches!(
        Scenario::from_json(&twice),
        Err(ScenarioError::DuplicateScript(TaskId(0)))
    ));
}

#[test]
fn tick_sources_must_be_on_a_configured_core() {
    let text = minimal(r#", "ticks": [ { "core": 2, "counter": 0, "period_us": 10 } ]"#);
    assert!(matches!(
        Scenario::from_json(&text),
        Err(ScenarioError::UnknownCore(CoreId(2)))
    ));
}

#[test]
fn malformed_documents_are_rejected() {
    let text = minimal(r#", "run_for": 3"#);
    assert!(matches!(
        Scenario::from_json(&text),
        Err(ScenarioError::Parse(_))
    ));

    let text = r#"{ "config": { "cores": 0 } }"#;
    assert!(matches!(
        Scenario::from_json(text),
        Err(ScenarioError::Config(_))
    ));
}

#[test]
fn script_body_plays_its_steps_in_order() {
    let scenario = Scenario::from_json(
        r#"{
            "config": {
                "tasks": [
                    { "id": 0, "name": "a", "core": 0, "priority": 1,
                      "max_activations": 1, "stack_words": 128, "autostart": true },
                    { "id": 1, "name": "b", "core": 0, "priority": 2,
                      "max_activations": 1, "stack_words": 128 }
                ]
            }
        }"#,
    )
    .unwrap();
    let a = ScriptBody::new(vec![
        ScriptStep::Yield,
        ScriptStep::Activate(TaskId(1)),
        ScriptStep::Terminate,
    ]);
    let mut kernel = CoreKernel::builder(Arc::new(scenario.config), CoreId(0))
        .task(TaskId(0), a)
        .task(TaskId(1), ScriptBody::new(Vec::new()))
        .build()
        .unwrap();
    kernel.start().unwrap();

    assert_eq!(kernel.run_once(), Step::Ran(TaskId(0)));
    assert_eq!(kernel.task_state(TaskId(1)), Some(TaskState::Suspended));
    assert_eq!(kernel.run_once(), Step::Ran(TaskId(0)));
    assert_eq!(kernel.run_until_idle(), Step::Idle);
    assert_eq!(kernel.stats().starts, 2);
    assert_eq!(kernel.task_state(TaskId(0)), Some(TaskState::Suspended));
    assert_eq!(kernel.error_count(), 0);
}

#[test]
fn remote_activation_scenario_runs_to_shutdown() {
    let scenario = Scenario::from_json(REMOTE_ACTIVATION).unwrap();
    let mut streams = Vec::new();
    let system = scenario
        .system(|core| {
            let backend = MemoryBackend::new();
            streams.push((core.to_string(), backend.clone()));
            Some(Tracer::new(TraceConfig::default(), backend).into_handle().hook())
        })
        .start()
        .unwrap();

    assert!(system.wait_stopped(Duration::from_secs(10)));
    let reports = system.stop_and_join().unwrap();
    for report in &reports {
        assert_eq!(report.phase, CorePhase::Shutdown(None));
    }
    assert!(reports[0].messages.sent >= 1);

    let streams: Vec<TraceStream> = streams
        .into_iter()
        .map(|(label, backend)| TraceStream {
            label,
            bytes: backend.bytes(),
        })
        .collect();
    let lines = merge_streams(&streams, true).unwrap();
    assert!(lines.iter().any(|line| line.source == "core#1"
        && line.record.name == "TASK_START"
        && line.record.detail == "task#2 prio=3"));
    assert!(lines
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
}
