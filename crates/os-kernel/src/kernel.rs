//! Per-core kernel state, construction and the step runner.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use os_core::{
    CoreId, CounterId, IsrId, OsError, OsResult, Priority, ReadyQueues, TaskId,
};
use os_trace::{PayloadBuilder, TraceHook};
use thiserror::Error;

use crate::application::AppControl;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{AlarmAction, OsConfig};
use crate::counter::{AlarmCallback, AlarmControl, CounterControl};
use crate::cpuload::CpuLoad;
use crate::dispatch::Dispatched;
use crate::error::{Call, ErrorState, PanicCode};
use crate::hooks::KernelHooks;
use crate::isr::{IsrBody, IsrState};
use crate::remote::RemoteRef;
use crate::resource::ResourceControl;
use crate::schedtable::TableControl;
use crate::task::{ReadyKind, TaskBody, TaskControl, TaskSnapshot, TaskState};

/// Where the kernel is currently executing code on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallContext {
    Boot = 0,
    Task = 1,
    Cat1Isr = 2,
    Cat2Isr = 3,
    AlarmCallback = 4,
    Shutdown = 5,
    Internal = 6,
    ErrorHook = 7,
    ProtectionHook = 8,
    PreTaskHook = 9,
    PostTaskHook = 10,
    StartupHook = 11,
    ShutdownHook = 12,
    IdleHook = 13,
}

impl CallContext {
    pub const fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Calling contexts a service accepts.
pub(crate) mod callers {
    use super::CallContext;

    pub const TASK: u16 = CallContext::Task.bit();
    pub const CAT2: u16 = CallContext::Cat2Isr.bit();
    pub const ERROR_HOOK: u16 = CallContext::ErrorHook.bit();
    pub const PROTECTION_HOOK: u16 = CallContext::ProtectionHook.bit();
    pub const PRE_TASK: u16 = CallContext::PreTaskHook.bit();
    pub const POST_TASK: u16 = CallContext::PostTaskHook.bit();
    pub const STARTUP: u16 = CallContext::StartupHook.bit();
    pub const SHUTDOWN: u16 = CallContext::ShutdownHook.bit();
    pub const ALARM_CALLBACK: u16 = CallContext::AlarmCallback.bit();
    /// Error, pre-task and post-task hooks.
    pub const HOOKS: u16 = ERROR_HOOK | PRE_TASK | POST_TASK;
}

/// Lifecycle of a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorePhase {
    Init,
    Running,
    ShuttingDown,
    Shutdown(Option<OsError>),
    Halted(PanicCode),
}

/// Outcome of [`CoreKernel::run_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The task ran one step.
    Ran(TaskId),
    Idle,
    /// The core is shut down or panicked.
    Halted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    pub dispatches: u64,
    pub starts: u64,
    pub resumes: u64,
    pub preemptions: u64,
    pub idles: u64,
    pub steps: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("core {0} is not configured")]
    UnknownCore(CoreId),
    #[error("task {0} is not configured")]
    UnknownTask(TaskId),
    #[error("task {task} belongs to core {owner}")]
    ForeignTask { task: TaskId, owner: CoreId },
    #[error("isr {0} is not configured")]
    UnknownIsr(IsrId),
    #[error("isr {isr} belongs to core {owner}")]
    ForeignIsr { isr: IsrId, owner: CoreId },
    #[error("alarm callback {0} is referenced but not registered")]
    MissingCallback(u16),
}

/// Builder for a [`CoreKernel`].
pub struct CoreKernelBuilder {
    config: Arc<OsConfig>,
    core: CoreId,
    bodies: Vec<(TaskId, Box<dyn TaskBody>)>,
    isr_bodies: Vec<(IsrId, Box<dyn IsrBody>)>,
    callbacks: BTreeMap<u16, Box<dyn AlarmCallback>>,
    hooks: Option<Box<dyn KernelHooks>>,
    remote: Option<RemoteRef>,
    clock: Option<Arc<dyn Clock>>,
    trace: Option<TraceHook>,
}

impl CoreKernelBuilder {
    pub fn new(config: Arc<OsConfig>, core: CoreId) -> Self {
        Self {
            config,
            core,
            bodies: Vec::new(),
            isr_bodies: Vec::new(),
            callbacks: BTreeMap::new(),
            hooks: None,
            remote: None,
            clock: None,
            trace: None,
        }
    }

    pub fn task(mut self, task: TaskId, body: impl TaskBody + 'static) -> Self {
        self.bodies.push((task, Box::new(body)));
        self
    }

    pub fn isr(mut self, isr: IsrId, body: impl IsrBody + 'static) -> Self {
        self.isr_bodies.push((isr, Box::new(body)));
        self
    }

    pub fn alarm_callback(mut self, id: u16, callback: impl AlarmCallback + 'static) -> Self {
        self.callbacks.insert(id, Box::new(callback));
        self
    }

    pub fn hooks(mut self, hooks: impl KernelHooks + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    pub fn remote(mut self, remote: RemoteRef) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn build(self) -> Result<CoreKernel, KernelError> {
        let config = self.config;
        let core = self.core;
        if core.raw() >= config.cores {
            return Err(KernelError::UnknownCore(core));
        }

        let mut bodies: Vec<Option<Box<dyn TaskBody>>> =
            (0..config.tasks.len()).map(|_| None).collect();
        for (task, body) in self.bodies {
            let cfg = config.task(task).ok_or(KernelError::UnknownTask(task))?;
            if cfg.core != core {
                return Err(KernelError::ForeignTask {
                    task,
                    owner: cfg.core,
                });
            }
            bodies[task.index()] = Some(body);
        }

        let mut isr_bodies: Vec<Option<Box<dyn IsrBody>>> =
            (0..config.isrs.len()).map(|_| None).collect();
        for (isr, body) in self.isr_bodies {
            let cfg = config.isr(isr).ok_or(KernelError::UnknownIsr(isr))?;
            if cfg.core != core {
                return Err(KernelError::ForeignIsr {
                    isr,
                    owner: cfg.core,
                });
            }
            isr_bodies[isr.index()] = Some(body);
        }

        for alarm in config.alarms.iter().filter(|alarm| alarm.core == core) {
            if let AlarmAction::Callback(id) = alarm.action {
                if !self.callbacks.contains_key(&id) {
                    return Err(KernelError::MissingCallback(id));
                }
            }
        }

        let tasks = config
            .tasks
            .iter()
            .map(|cfg| {
                (cfg.core == core)
                    .then(|| TaskControl::new(cfg.base_priority(), cfg.stack_words))
            })
            .collect();
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let now = clock.now();

        Ok(CoreKernel {
            core,
            queues: ReadyQueues::new(&config.queue_seats(core)),
            tasks,
            bodies,
            current: None,
            context: CallContext::Boot,
            phase: CorePhase::Init,
            resources: vec![ResourceControl::default(); config.resources.len()],
            isr: IsrState::new(isr_bodies),
            counters: vec![CounterControl::default(); config.counters.len()],
            alarms: vec![AlarmControl::default(); config.alarms.len()],
            tables: vec![TableControl::default(); config.tables.len()],
            apps: vec![AppControl::default(); config.apps.len()],
            callbacks: self.callbacks,
            errors: ErrorState::default(),
            hooks: self.hooks,
            remote: self.remote,
            cpu_load: CpuLoad::new(config.cpu_load, now),
            clock,
            trace: self.trace,
            pending_async: false,
            stats: KernelStats::default(),
            config,
        })
    }
}

/// Kernel of one core.
///
/// All state is core-local; other cores reach it only through the
/// cross-core message layer, which calls the public services on the owning
/// core's kernel.
pub struct CoreKernel {
    pub(crate) core: CoreId,
    pub(crate) config: Arc<OsConfig>,
    pub(crate) phase: CorePhase,
    pub(crate) context: CallContext,
    pub(crate) queues: ReadyQueues,
    /// Indexed by global task id; `None` for tasks of other cores.
    pub(crate) tasks: Vec<Option<TaskControl>>,
    pub(crate) bodies: Vec<Option<Box<dyn TaskBody>>>,
    pub(crate) current: Option<TaskId>,
    pub(crate) resources: Vec<ResourceControl>,
    pub(crate) isr: IsrState,
    pub(crate) counters: Vec<CounterControl>,
    pub(crate) alarms: Vec<AlarmControl>,
    pub(crate) tables: Vec<TableControl>,
    pub(crate) apps: Vec<AppControl>,
    pub(crate) callbacks: BTreeMap<u16, Box<dyn AlarmCallback>>,
    pub(crate) errors: ErrorState,
    pub(crate) hooks: Option<Box<dyn KernelHooks>>,
    pub(crate) remote: Option<RemoteRef>,
    pub(crate) cpu_load: CpuLoad,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) trace: Option<TraceHook>,
    /// Set by interrupt-level activity; a task displaced next becomes
    /// `ReadyAsync`.
    pub(crate) pending_async: bool,
    pub(crate) stats: KernelStats,
}

impl CoreKernel {
    pub fn builder(config: Arc<OsConfig>, core: CoreId) -> CoreKernelBuilder {
        CoreKernelBuilder::new(config, core)
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn config(&self) -> &OsConfig {
        &self.config
    }

    pub fn phase(&self) -> CorePhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == CorePhase::Running
    }

    pub fn context(&self) -> CallContext {
        self.context
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current
    }

    pub fn ready_queues(&self) -> &ReadyQueues {
        &self.queues
    }

    pub fn stats(&self) -> KernelStats {
        self.stats
    }

    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.tcb(task).map(|tc| tc.state)
    }

    pub fn task_priority(&self, task: TaskId) -> Option<Priority> {
        self.tcb(task).map(|tc| tc.prio)
    }

    pub fn snapshot(&self, task: TaskId) -> Option<TaskSnapshot> {
        self.tcb(task).map(|tc| TaskSnapshot {
            id: task,
            state: tc.state,
            priority: tc.prio,
            activations: tc.activations,
            pending_events: tc.pending_events,
            last_lock: tc.last_lock,
            stack_high_water: tc.stack.high_water(),
            max_exec_time: tc.max_exec_time,
        })
    }

    /// Tasks owned by this core.
    pub fn local_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, tc)| tc.is_some())
            .map(|(index, _)| TaskId(index as u16))
    }

    /// `StartOS` for this core: runs the startup hook and performs the
    /// configured autostarts.
    pub fn start(&mut self) -> OsResult<()> {
        if self.phase != CorePhase::Init {
            return Err(OsError::State);
        }
        self.phase = CorePhase::Running;
        self.with_hooks(CallContext::StartupHook, |hooks, kernel| hooks.startup(kernel));

        let config = Arc::clone(&self.config);
        let core = self.core;
        self.context = CallContext::Internal;
        for task in config.tasks.iter().filter(|t| t.core == core && t.autostart) {
            if let Err(err) = self.activate_local(task.id) {
                log::warn!("{}: autostart of {} failed: {}", self.core, task.id, err);
            }
        }
        for alarm in config.alarms.iter().filter(|a| a.core == core) {
            if let Some(auto) = alarm.autostart {
                let result = if auto.absolute {
                    self.arm_alarm_abs(alarm.id, auto.value, auto.cycle)
                } else {
                    self.arm_alarm_rel(alarm.id, auto.value, auto.cycle)
                };
                if let Err(err) = result {
                    log::warn!("{}: autostart of {} failed: {}", self.core, alarm.id, err);
                }
            }
        }
        for table in config.tables.iter().filter(|t| t.core == core) {
            if let Some(auto) = table.autostart {
                if let Err(err) = self.autostart_table(table.id, auto) {
                    log::warn!("{}: autostart of {} failed: {}", self.core, table.id, err);
                }
            }
        }
        self.context = CallContext::Task;

        log::info!(
            "{} started with {} tasks on {} priority levels",
            self.core,
            self.local_tasks().count(),
            self.queues.levels()
        );
        Ok(())
    }

    /// True when the next step has to go through the dispatcher.
    pub fn needs_dispatch(&self) -> bool {
        match self.current.and_then(|task| self.tcb(task)) {
            None => !self.queues.is_empty(),
            Some(tc) if tc.state != TaskState::Running => true,
            Some(tc) => self
                .queues
                .highest_priority()
                .is_some_and(|prio| prio > tc.prio),
        }
    }

    /// Serves pending interrupts, dispatches if needed and runs one step of
    /// the current task.
    pub fn run_once(&mut self) -> Step {
        if !self.is_running() {
            return Step::Halted;
        }
        self.service_pending_interrupts();
        if self.needs_dispatch() {
            let kind = if mem::take(&mut self.pending_async) {
                ReadyKind::Async
            } else {
                ReadyKind::Sync
            };
            match self.dispatch(kind) {
                Dispatched::Idle => return Step::Idle,
                Dispatched::Halted => return Step::Halted,
                _ => {}
            }
        }
        self.pending_async = false;

        let Some(task) = self.current else {
            return Step::Idle;
        };
        self.stats.steps += 1;
        let exit = self.run_body(task);
        self.finish_step(task, exit);
        Step::Ran(task)
    }

    /// Runs steps until no task is ready or the core stops.
    pub fn run_until_idle(&mut self) -> Step {
        loop {
            match self.run_once() {
                Step::Ran(_) => continue,
                other => return other,
            }
        }
    }

    /// Runs `f` at interrupt level, as the timer or the inter-core interrupt
    /// would. A task displaced afterwards resumes asynchronously.
    ///
    /// No task is the caller while `f` runs: an error it raises names
    /// neither task nor ISR, and a protection action that would terminate
    /// the caller or its application has nothing to act on.
    pub fn in_interrupt<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = mem::replace(&mut self.context, CallContext::Cat2Isr);
        let saved_system = mem::replace(&mut self.isr.system, true);
        let result = f(self);
        self.isr.system = saved_system;
        self.context = saved;
        self.pending_async = true;
        result
    }

    /// Hardware tick of `counter`.
    pub fn tick(&mut self, counter: CounterId) -> OsResult<()> {
        self.in_interrupt(|kernel| kernel.increment_counter(counter))
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now()
    }

    pub(crate) fn tcb(&self, task: TaskId) -> Option<&TaskControl> {
        self.tasks.get(task.index()).and_then(Option::as_ref)
    }

    pub(crate) fn tcb_mut(&mut self, task: TaskId) -> Option<&mut TaskControl> {
        self.tasks.get_mut(task.index()).and_then(Option::as_mut)
    }

    /// Common entry checks of a service: core running, calling context
    /// allowed, interrupts not disabled.
    pub(crate) fn enter(&mut self, call: Call, allowed: u16) -> OsResult<()> {
        if !self.is_running() {
            return Err(OsError::Core);
        }
        if allowed & self.context.bit() == 0 {
            return self.fail(call, OsError::CallLevel);
        }
        if self.isr.disable_all > 0 {
            return self.fail(call, OsError::DisabledInt);
        }
        Ok(())
    }

    /// Resolves the owner of an object, reporting `E_OS_ID` when it does
    /// not exist.
    pub(crate) fn owner(&mut self, call: Call, owner: Option<CoreId>) -> OsResult<CoreId> {
        match owner {
            Some(core) => Ok(core),
            None => self.fail(call, OsError::Id),
        }
    }

    pub(crate) fn emit(&self, record: u8, build: impl FnOnce(&mut PayloadBuilder)) {
        let Some(trace) = &self.trace else {
            return;
        };
        let mut builder = PayloadBuilder::new();
        build(&mut builder);
        match builder.finish() {
            Ok(payload) => {
                let _ = trace(record, &payload, true);
            }
            Err(err) => log::debug!("{}: dropped trace record {record}: {err}", self.core),
        }
    }
}
