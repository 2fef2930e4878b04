//! Scenario files.
//!
//! A scenario is a JSON document holding the system configuration, a
//! script for each task that should do something when it runs, and the
//! hardware counters the host clock drives:
//!
//! ```json
//! {
//!   "config": { "cores": 2, "tasks": [ ... ], "counters": [ ... ] },
//!   "scripts": [ { "task": 0, "steps": [ { "activate": 2 }, "terminate" ] } ],
//!   "ticks": [ { "core": 1, "counter": 0, "period_us": 1000 } ],
//!   "run_for_ms": 100
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use os_core::{CoreId, EventMask, ResourceId, TaskId};
use os_kernel::{ConfigError, OsConfig, TaskApi, TaskBody, TaskExit};
use os_trace::TraceHook;
use os_xcore::MulticoreSystem;
use os_xcore::MulticoreSystemBuilder;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_RUN_FOR_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("cannot read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("script for unknown {0}")]
    UnknownTask(TaskId),
    #[error("second script for {0}")]
    DuplicateScript(TaskId),
    #[error("tick source on unknown {0}")]
    UnknownCore(CoreId),
}

/// One step of a task script. Service steps run back to back; the steps
/// that leave the task body end the current run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    Activate(TaskId),
    SetEvent { task: TaskId, mask: EventMask },
    ClearEvent(EventMask),
    GetResource(ResourceId),
    ReleaseResource(ResourceId),
    /// Ends the run; the next run continues with the following step.
    Yield,
    /// Ends the run; the next run starts the script over.
    Loop,
    Wait(EventMask),
    Chain(TaskId),
    Terminate,
    /// `ShutdownAllCores` without an error.
    ShutdownAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskScript {
    pub task: TaskId,
    pub steps: Vec<ScriptStep>,
}

/// Hardware counter incremented by the host clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TickSpec {
    pub core: u8,
    pub counter: u16,
    pub period_us: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub config: OsConfig,
    #[serde(default)]
    pub scripts: Vec<TaskScript>,
    #[serde(default)]
    pub ticks: Vec<TickSpec>,
    /// Time the cores get to stop on their own.
    #[serde(default = "default_run_for_ms")]
    pub run_for_ms: u64,
}

fn default_run_for_ms() -> u64 {
    DEFAULT_RUN_FOR_MS
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parses a scenario and validates its configuration and scripts.
    pub fn from_json(text: &str) -> Result<Self, ScenarioError> {
        let mut scenario: Scenario = serde_json::from_str(text)?;
        scenario.config = scenario.config.validated()?;

        let mut seen = Vec::with_capacity(scenario.scripts.len());
        for script in &scenario.scripts {
            if scenario.config.task(script.task).is_none() {
                return Err(ScenarioError::UnknownTask(script.task));
            }
            if seen.contains(&script.task) {
                return Err(ScenarioError::DuplicateScript(script.task));
            }
            seen.push(script.task);
        }
        if let Some(tick) = scenario
            .ticks
            .iter()
            .find(|tick| tick.core >= scenario.config.cores)
        {
            return Err(ScenarioError::UnknownCore(CoreId(tick.core)));
        }
        Ok(scenario)
    }

    pub fn run_for(&self) -> Duration {
        Duration::from_millis(self.run_for_ms)
    }

    /// Prepares the threaded system: task scripts go to the kernel of the
    /// owning core, and `core_trace` may give each kernel its own tracer.
    pub fn system(
        &self,
        mut core_trace: impl FnMut(CoreId) -> Option<TraceHook>,
    ) -> MulticoreSystemBuilder {
        let mut builder = MulticoreSystem::builder(self.config.clone());
        for core in self.config.core_ids() {
            let scripts: Vec<(TaskId, Vec<ScriptStep>)> = self
                .scripts
                .iter()
                .filter(|script| {
                    self.config
                        .task(script.task)
                        .is_some_and(|task| task.core == core)
                })
                .map(|script| (script.task, script.steps.clone()))
                .collect();
            let trace = core_trace(core);
            builder = builder.core(core.raw(), move |mut kernel| {
                for (task, steps) in scripts {
                    kernel = kernel.task(task, ScriptBody::new(steps));
                }
                if let Some(trace) = trace {
                    kernel = kernel.with_trace_hook(trace);
                }
                kernel
            });
        }
        for tick in &self.ticks {
            builder = builder.tick(
                tick.core,
                tick.counter,
                Duration::from_micros(tick.period_us),
            );
        }
        builder
    }
}

/// Task body that plays a script.
#[derive(Debug)]
pub struct ScriptBody {
    steps: Vec<ScriptStep>,
    pc: usize,
}

impl ScriptBody {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps, pc: 0 }
    }

    fn restart(&mut self, exit: TaskExit) -> TaskExit {
        self.pc = 0;
        exit
    }
}

impl TaskBody for ScriptBody {
    fn run(&mut self, api: &mut TaskApi<'_>) -> TaskExit {
        loop {
            let Some(step) = self.steps.get(self.pc).cloned() else {
                return self.restart(TaskExit::Terminate);
            };
            self.pc += 1;
            // Failed services are reported by the kernel's error handling.
            let _ = match step {
                ScriptStep::Activate(task) => api.activate_task(task),
                ScriptStep::SetEvent { task, mask } => api.set_event(task, mask),
                ScriptStep::ClearEvent(mask) => api.clear_event(mask),
                ScriptStep::GetResource(resource) => api.get_resource(resource),
                ScriptStep::ReleaseResource(resource) => api.release_resource(resource),
                ScriptStep::Yield => return TaskExit::Continue,
                ScriptStep::Loop => return self.restart(TaskExit::Continue),
                ScriptStep::Wait(mask) => return TaskExit::Wait(mask),
                ScriptStep::Chain(task) => return self.restart(TaskExit::Chain(task)),
                ScriptStep::Terminate => return self.restart(TaskExit::Terminate),
                ScriptStep::ShutdownAll => {
                    let _ = api.shutdown_all_cores(None);
                    return self.restart(TaskExit::Terminate);
                }
            };
        }
    }
}
