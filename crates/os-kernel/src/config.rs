//! Static system configuration.
//!
//! Every kernel object is declared once for the whole system with a global
//! identifier and the core that owns it. [`OsConfig::builder`] collects the
//! declarations and validates them; each core then builds its
//! [`CoreKernel`](crate::CoreKernel) from the shared, immutable result.

use std::collections::BTreeMap;

use os_core::{
    AlarmId, AppId, CoreId, CounterId, EventMask, IsrId, OsError, Priority, ResourceId,
    ScheduleTableId, TaskId, TickType, MAX_TASK_PRIORITY,
};
use thiserror::Error;

use crate::error::{ErrorAction, HookKind, ServiceId};

/// Default inbound message queue length (one entry stays free).
pub const DEFAULT_MESSAGE_QUEUE_SIZE: usize = 16;

/// Default cache line length used to pad queue indices.
pub const DEFAULT_CACHE_LINE: usize = 64;

/// Per-task flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskFlags(pub u8);

impl TaskFlags {
    pub const NONE: TaskFlags = TaskFlags(0);
    /// Task is never preempted by other tasks; it runs at the highest task
    /// priority of its core once started.
    pub const NONPREEMPT: TaskFlags = TaskFlags(0x01);
    /// Extended task that may wait for events.
    pub const EXTENDED: TaskFlags = TaskFlags(0x02);
    /// Longest execution time of an activation is recorded.
    pub const MEASUREEXEC: TaskFlags = TaskFlags(0x40);

    pub const fn contains(self, other: TaskFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: TaskFlags) -> TaskFlags {
        TaskFlags(self.0 | other.0)
    }
}

/// Static description of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskConfig {
    pub id: TaskId,
    pub name: String,
    pub core: CoreId,
    /// Base priority (`0..=0xFF`, higher runs first).
    pub priority: u16,
    /// Internal ceiling the task is raised to when dispatched.
    #[cfg_attr(feature = "serde", serde(default))]
    pub run_priority: Option<u16>,
    pub max_activations: u8,
    #[cfg_attr(feature = "serde", serde(default))]
    pub flags: TaskFlags,
    /// Stack length in words.
    pub stack_words: usize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub resources: Vec<ResourceId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub app: Option<AppId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub autostart: bool,
    /// Execution budget per activation in clock ticks.
    #[cfg_attr(feature = "serde", serde(default))]
    pub exec_budget: Option<u64>,
}

impl TaskConfig {
    pub fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            id: TaskId(id),
            name: name.into(),
            core: CoreId(0),
            priority: 1,
            run_priority: None,
            max_activations: 1,
            flags: TaskFlags::NONE,
            stack_words: 256,
            resources: Vec::new(),
            app: None,
            autostart: false,
            exec_budget: None,
        }
    }

    pub fn core(mut self, core: u8) -> Self {
        self.core = CoreId(core);
        self
    }

    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn run_priority(mut self, priority: u16) -> Self {
        self.run_priority = Some(priority);
        self
    }

    pub fn activations(mut self, max: u8) -> Self {
        self.max_activations = max;
        self
    }

    pub fn extended(mut self) -> Self {
        self.flags = self.flags.union(TaskFlags::EXTENDED);
        self
    }

    pub fn non_preemptive(mut self) -> Self {
        self.flags = self.flags.union(TaskFlags::NONPREEMPT);
        self
    }

    pub fn measure_exec(mut self) -> Self {
        self.flags = self.flags.union(TaskFlags::MEASUREEXEC);
        self
    }

    pub fn stack(mut self, words: usize) -> Self {
        self.stack_words = words;
        self
    }

    pub fn resource(mut self, resource: u16) -> Self {
        self.resources.push(ResourceId(resource));
        self
    }

    pub fn app(mut self, app: u8) -> Self {
        self.app = Some(AppId(app));
        self
    }

    pub fn autostart(mut self) -> Self {
        self.autostart = true;
        self
    }

    pub fn exec_budget(mut self, ticks: u64) -> Self {
        self.exec_budget = Some(ticks);
        self
    }

    pub fn is_extended(&self) -> bool {
        self.flags.contains(TaskFlags::EXTENDED)
    }

    pub fn base_priority(&self) -> Priority {
        Priority::new_unchecked(self.priority)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceConfig {
    pub id: ResourceId,
    pub name: String,
    /// Ceiling priority. Values above `0xFF` lock interrupts up to
    /// `ceiling - 0x100`.
    pub ceiling: u16,
    /// Longest time the resource may be held, in clock ticks.
    pub lock_budget: Option<u64>,
}

impl ResourceConfig {
    pub fn new(id: u16, name: impl Into<String>, ceiling: u16) -> Self {
        Self {
            id: ResourceId(id),
            name: name.into(),
            ceiling,
            lock_budget: None,
        }
    }

    /// Resource whose ceiling masks interrupts up to `level`.
    pub fn interrupt(id: u16, name: impl Into<String>, level: u8) -> Self {
        Self::new(id, name, Priority::interrupt(level).raw())
    }

    pub fn lock_budget(mut self, ticks: u64) -> Self {
        self.lock_budget = Some(ticks);
        self
    }

    pub fn ceiling_priority(&self) -> Priority {
        Priority::new_unchecked(self.ceiling)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterConfig {
    pub id: CounterId,
    pub name: String,
    pub core: CoreId,
    pub max_allowed: TickType,
    pub ticks_per_base: TickType,
    pub min_cycle: TickType,
}

impl CounterConfig {
    pub fn new(id: u16, name: impl Into<String>, max_allowed: TickType) -> Self {
        Self {
            id: CounterId(id),
            name: name.into(),
            core: CoreId(0),
            max_allowed,
            ticks_per_base: 1,
            min_cycle: 1,
        }
    }

    pub fn core(mut self, core: u8) -> Self {
        self.core = CoreId(core);
        self
    }

    pub fn min_cycle(mut self, min_cycle: TickType) -> Self {
        self.min_cycle = min_cycle;
        self
    }

    pub fn ticks_per_base(mut self, ticks: TickType) -> Self {
        self.ticks_per_base = ticks;
        self
    }
}

/// What an alarm does when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AlarmAction {
    ActivateTask(TaskId),
    SetEvent(TaskId, EventMask),
    /// Callback registered with the kernel builder under this number.
    Callback(u16),
    IncrementCounter(CounterId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlarmAutostart {
    /// `true` for an absolute start value, `false` for a relative offset.
    pub absolute: bool,
    pub value: TickType,
    pub cycle: TickType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlarmConfig {
    pub id: AlarmId,
    pub name: String,
    pub core: CoreId,
    pub counter: CounterId,
    pub action: AlarmAction,
    #[cfg_attr(feature = "serde", serde(default))]
    pub app: Option<AppId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub autostart: Option<AlarmAutostart>,
}

impl AlarmConfig {
    pub fn new(id: u16, name: impl Into<String>, counter: u16, action: AlarmAction) -> Self {
        Self {
            id: AlarmId(id),
            name: name.into(),
            core: CoreId(0),
            counter: CounterId(counter),
            action,
            app: None,
            autostart: None,
        }
    }

    pub fn core(mut self, core: u8) -> Self {
        self.core = CoreId(core);
        self
    }

    pub fn app(mut self, app: u8) -> Self {
        self.app = Some(AppId(app));
        self
    }

    pub fn autostart_rel(mut self, offset: TickType, cycle: TickType) -> Self {
        self.autostart = Some(AlarmAutostart {
            absolute: false,
            value: offset,
            cycle,
        });
        self
    }

    pub fn autostart_abs(mut self, start: TickType, cycle: TickType) -> Self {
        self.autostart = Some(AlarmAutostart {
            absolute: true,
            value: start,
            cycle,
        });
        self
    }
}

/// Action taken at a schedule table expiry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExpiryAction {
    ActivateTask(TaskId),
    SetEvent(TaskId, EventMask),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExpiryPoint {
    pub offset: TickType,
    pub actions: Vec<ExpiryAction>,
}

impl ExpiryPoint {
    pub fn new(offset: TickType) -> Self {
        Self {
            offset,
            actions: Vec::new(),
        }
    }

    pub fn activate(mut self, task: u16) -> Self {
        self.actions.push(ExpiryAction::ActivateTask(TaskId(task)));
        self
    }

    pub fn set_event(mut self, task: u16, mask: EventMask) -> Self {
        self.actions.push(ExpiryAction::SetEvent(TaskId(task), mask));
        self
    }
}

/// How a schedule table follows a global time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncStrategy {
    #[default]
    None,
    /// Driven directly by the synchronisation counter.
    Implicit,
    /// Re-aligned by `SyncScheduleTable`; deviations up to `precision`
    /// ticks count as synchronous.
    Explicit { precision: TickType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TableAutostart {
    Relative(TickType),
    Absolute(TickType),
    Synchron,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScheduleTableConfig {
    pub id: ScheduleTableId,
    pub name: String,
    pub core: CoreId,
    pub counter: CounterId,
    pub duration: TickType,
    pub repeating: bool,
    pub sync: SyncStrategy,
    /// Sorted by strictly increasing offset, all below `duration`.
    pub points: Vec<ExpiryPoint>,
    pub app: Option<AppId>,
    pub autostart: Option<TableAutostart>,
}

impl ScheduleTableConfig {
    pub fn new(id: u16, name: impl Into<String>, counter: u16, duration: TickType) -> Self {
        Self {
            id: ScheduleTableId(id),
            name: name.into(),
            core: CoreId(0),
            counter: CounterId(counter),
            duration,
            repeating: false,
            sync: SyncStrategy::None,
            points: Vec::new(),
            app: None,
            autostart: None,
        }
    }

    pub fn core(mut self, core: u8) -> Self {
        self.core = CoreId(core);
        self
    }

    pub fn repeating(mut self) -> Self {
        self.repeating = true;
        self
    }

    pub fn sync(mut self, sync: SyncStrategy) -> Self {
        self.sync = sync;
        self
    }

    pub fn point(mut self, point: ExpiryPoint) -> Self {
        self.points.push(point);
        self
    }

    pub fn app(mut self, app: u8) -> Self {
        self.app = Some(AppId(app));
        self
    }

    pub fn autostart(mut self, autostart: TableAutostart) -> Self {
        self.autostart = Some(autostart);
        self
    }

    /// Offset of the first expiry point.
    pub fn initial_offset(&self) -> TickType {
        self.points.first().map_or(0, |point| point.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IsrCategory {
    /// Runs outside kernel control and may not call services.
    Cat1,
    Cat2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsrConfig {
    pub id: IsrId,
    pub name: String,
    pub core: CoreId,
    pub category: IsrCategory,
    /// Interrupt level; interrupt-level resources mask every level up to
    /// their own.
    pub level: u8,
    pub resources: Vec<ResourceId>,
    pub app: Option<AppId>,
}

impl IsrConfig {
    pub fn new(id: u16, name: impl Into<String>, category: IsrCategory, level: u8) -> Self {
        Self {
            id: IsrId(id),
            name: name.into(),
            core: CoreId(0),
            category,
            level,
            resources: Vec::new(),
            app: None,
        }
    }

    pub fn core(mut self, core: u8) -> Self {
        self.core = CoreId(core);
        self
    }

    pub fn resource(mut self, resource: u16) -> Self {
        self.resources.push(ResourceId(resource));
        self
    }

    pub fn app(mut self, app: u8) -> Self {
        self.app = Some(AppId(app));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppConfig {
    pub id: AppId,
    pub name: String,
    pub core: CoreId,
    pub restart_task: Option<TaskId>,
    /// Application-specific error hook is called for errors of its objects.
    pub error_hook: bool,
}

impl AppConfig {
    pub fn new(id: u8, name: impl Into<String>) -> Self {
        Self {
            id: AppId(id),
            name: name.into(),
            core: CoreId(0),
            restart_task: None,
            error_hook: false,
        }
    }

    pub fn core(mut self, core: u8) -> Self {
        self.core = CoreId(core);
        self
    }

    pub fn restart_task(mut self, task: u16) -> Self {
        self.restart_task = Some(TaskId(task));
        self
    }

    pub fn error_hook(mut self) -> Self {
        self.error_hook = true;
        self
    }
}

/// Expected error of a service and how the kernel reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorRule {
    pub service: ServiceId,
    pub error: OsError,
    pub hook: HookKind,
    pub action: ErrorAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CpuLoadConfig {
    /// Number of intervals in the rolling window.
    pub intervals: usize,
    /// Interval length in clock ticks.
    pub interval_len: u64,
}

impl Default for CpuLoadConfig {
    fn default() -> Self {
        Self {
            intervals: 8,
            interval_len: 10_000,
        }
    }
}

/// Errors detected while validating a configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one core is required")]
    NoCores,
    #[error("{kind} {id} is declared more than once")]
    DuplicateId { kind: &'static str, id: u32 },
    #[error("{kind} identifiers must be dense; {id} is missing")]
    SparseIds { kind: &'static str, id: u32 },
    #[error("{kind} {id} is assigned to core {core}, which does not exist")]
    UnknownCore {
        kind: &'static str,
        id: u32,
        core: u8,
    },
    #[error("{from} references unknown {kind} {id}")]
    UnknownReference {
        from: String,
        kind: &'static str,
        id: u32,
    },
    #[error("task {task} has invalid priority {priority}")]
    InvalidPriority { task: TaskId, priority: u16 },
    #[error("task {0} allows no activation")]
    ZeroActivations(TaskId),
    #[error("resource {resource} ceiling is below user {user}")]
    CeilingTooLow { resource: ResourceId, user: String },
    #[error("counter {counter}: {reason}")]
    InvalidCounter {
        counter: CounterId,
        reason: &'static str,
    },
    #[error("schedule table {table}: {reason}")]
    InvalidTable {
        table: ScheduleTableId,
        reason: &'static str,
    },
    #[error("alarm {alarm}: {reason}")]
    InvalidAlarm {
        alarm: AlarmId,
        reason: &'static str,
    },
    #[error("message queue size {0} leaves no usable entry")]
    QueueSize(usize),
}

/// Validated system configuration shared by every core.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct OsConfig {
    pub name: String,
    pub cores: u8,
    pub tasks: Vec<TaskConfig>,
    pub resources: Vec<ResourceConfig>,
    pub counters: Vec<CounterConfig>,
    pub alarms: Vec<AlarmConfig>,
    pub tables: Vec<ScheduleTableConfig>,
    pub isrs: Vec<IsrConfig>,
    pub apps: Vec<AppConfig>,
    pub error_rules: Vec<ErrorRule>,
    /// Minimum queue depth per (core, priority).
    pub queue_depths: Vec<(CoreId, u16, usize)>,
    pub message_queue_size: usize,
    pub cache_line: usize,
    pub cpu_load: CpuLoadConfig,
}

impl Default for OsConfig {
    fn default() -> Self {
        Self {
            name: "OS".into(),
            cores: 1,
            tasks: Vec::new(),
            resources: Vec::new(),
            counters: Vec::new(),
            alarms: Vec::new(),
            tables: Vec::new(),
            isrs: Vec::new(),
            apps: Vec::new(),
            error_rules: Vec::new(),
            queue_depths: Vec::new(),
            message_queue_size: DEFAULT_MESSAGE_QUEUE_SIZE,
            cache_line: DEFAULT_CACHE_LINE,
            cpu_load: CpuLoadConfig::default(),
        }
    }
}

impl OsConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> OsConfigBuilder {
        OsConfigBuilder::default()
    }

    /// Sorts and validates a configuration assembled elsewhere, for example
    /// one read from a file.
    pub fn validated(self) -> Result<OsConfig, ConfigError> {
        OsConfigBuilder { config: self }.build()
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskConfig> {
        self.tasks.get(id.index())
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ResourceConfig> {
        self.resources.get(id.index())
    }

    pub fn counter(&self, id: CounterId) -> Option<&CounterConfig> {
        self.counters.get(id.index())
    }

    pub fn alarm(&self, id: AlarmId) -> Option<&AlarmConfig> {
        self.alarms.get(id.index())
    }

    pub fn table(&self, id: ScheduleTableId) -> Option<&ScheduleTableConfig> {
        self.tables.get(id.index())
    }

    pub fn isr(&self, id: IsrId) -> Option<&IsrConfig> {
        self.isrs.get(id.index())
    }

    pub fn app(&self, id: AppId) -> Option<&AppConfig> {
        self.apps.get(id.index())
    }

    pub fn core_ids(&self) -> impl Iterator<Item = CoreId> {
        (0..self.cores).map(CoreId)
    }

    /// Effective run priority of a task: the configured internal ceiling,
    /// or the top task level of its core for non-preemptive tasks.
    pub fn run_priority(&self, task: &TaskConfig) -> Priority {
        let base = task.run_priority.unwrap_or(task.priority).max(task.priority);
        if task.flags.contains(TaskFlags::NONPREEMPT) {
            let top = self
                .tasks
                .iter()
                .filter(|other| other.core == task.core)
                .map(|other| other.priority)
                .max()
                .unwrap_or(base);
            Priority::new_unchecked(base.max(top))
        } else {
            Priority::new_unchecked(base)
        }
    }

    /// Seats of every priority level of `core`.
    ///
    /// A task needs one seat per activation at its base priority and one
    /// seat at every other task level it can be preempted at: its run
    /// priority and the ceilings of the resources it may take. Overrides
    /// from `queue_depths` only ever enlarge a level.
    pub fn queue_seats(&self, core: CoreId) -> Vec<usize> {
        let mut seats: BTreeMap<u16, usize> = BTreeMap::new();
        for task in self.tasks.iter().filter(|task| task.core == core) {
            *seats.entry(task.priority).or_default() += usize::from(task.max_activations);
            let mut raised: Vec<u16> = task
                .resources
                .iter()
                .filter_map(|&id| self.resource(id))
                .map(|resource| resource.ceiling)
                .chain(Some(self.run_priority(task).raw()))
                .filter(|&prio| prio != task.priority && prio <= MAX_TASK_PRIORITY)
                .collect();
            raised.sort_unstable();
            raised.dedup();
            for prio in raised {
                *seats.entry(prio).or_default() += 1;
            }
        }
        for &(depth_core, prio, depth) in &self.queue_depths {
            if depth_core == core {
                let entry = seats.entry(prio).or_default();
                *entry = (*entry).max(depth);
            }
        }
        let levels = seats.keys().next_back().map_or(1, |&top| usize::from(top) + 1);
        let mut out = vec![0; levels];
        for (prio, n) in seats {
            out[usize::from(prio)] = n;
        }
        out
    }

    /// Configured error rule for `service`/`error`, if any.
    pub fn error_rule(&self, service: ServiceId, error: OsError) -> Option<&ErrorRule> {
        self.error_rules
            .iter()
            .find(|rule| rule.service == service && rule.error == error)
    }
}

/// Builder for [`OsConfig`].
#[derive(Debug, Clone, Default)]
pub struct OsConfigBuilder {
    config: OsConfig,
}

impl OsConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn cores(mut self, cores: u8) -> Self {
        self.config.cores = cores;
        self
    }

    pub fn task(mut self, task: TaskConfig) -> Self {
        self.config.tasks.push(task);
        self
    }

    pub fn resource(mut self, resource: ResourceConfig) -> Self {
        self.config.resources.push(resource);
        self
    }

    pub fn counter(mut self, counter: CounterConfig) -> Self {
        self.config.counters.push(counter);
        self
    }

    pub fn alarm(mut self, alarm: AlarmConfig) -> Self {
        self.config.alarms.push(alarm);
        self
    }

    pub fn schedule_table(mut self, table: ScheduleTableConfig) -> Self {
        self.config.tables.push(table);
        self
    }

    pub fn isr(mut self, isr: IsrConfig) -> Self {
        self.config.isrs.push(isr);
        self
    }

    pub fn app(mut self, app: AppConfig) -> Self {
        self.config.apps.push(app);
        self
    }

    pub fn error_rule(
        mut self,
        service: ServiceId,
        error: OsError,
        hook: HookKind,
        action: ErrorAction,
    ) -> Self {
        self.config.error_rules.push(ErrorRule {
            service,
            error,
            hook,
            action,
        });
        self
    }

    /// Guarantees at least `depth` seats at `prio` on `core`.
    pub fn queue_depth(mut self, core: u8, prio: u16, depth: usize) -> Self {
        self.config.queue_depths.push((CoreId(core), prio, depth));
        self
    }

    pub fn message_queue_size(mut self, size: usize) -> Self {
        self.config.message_queue_size = size;
        self
    }

    pub fn cache_line(mut self, bytes: usize) -> Self {
        self.config.cache_line = bytes;
        self
    }

    pub fn cpu_load(mut self, intervals: usize, interval_len: u64) -> Self {
        self.config.cpu_load = CpuLoadConfig {
            intervals,
            interval_len,
        };
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<OsConfig, ConfigError> {
        let mut config = self.config;
        config.tasks.sort_by_key(|task| task.id);
        config.resources.sort_by_key(|resource| resource.id);
        config.counters.sort_by_key(|counter| counter.id);
        config.alarms.sort_by_key(|alarm| alarm.id);
        config.tables.sort_by_key(|table| table.id);
        config.isrs.sort_by_key(|isr| isr.id);
        config.apps.sort_by_key(|app| app.id);
        validate(&config)?;
        Ok(config)
    }
}

fn check_dense(kind: &'static str, ids: impl Iterator<Item = u32>) -> Result<(), ConfigError> {
    let mut expected = 0;
    for id in ids {
        if id < expected {
            return Err(ConfigError::DuplicateId { kind, id });
        }
        if id > expected {
            return Err(ConfigError::SparseIds { kind, id: expected });
        }
        expected += 1;
    }
    Ok(())
}

fn check_core(config: &OsConfig, kind: &'static str, id: u32, core: CoreId) -> Result<(), ConfigError> {
    if core.raw() >= config.cores {
        Err(ConfigError::UnknownCore {
            kind,
            id,
            core: core.raw(),
        })
    } else {
        Ok(())
    }
}

fn check_task_ref(config: &OsConfig, from: impl Fn() -> String, task: TaskId) -> Result<(), ConfigError> {
    match config.task(task) {
        Some(_) => Ok(()),
        None => Err(ConfigError::UnknownReference {
            from: from(),
            kind: "task",
            id: u32::from(task.raw()),
        }),
    }
}

fn check_resource_ref<'a>(
    config: &'a OsConfig,
    from: &str,
    resource: ResourceId,
) -> Result<&'a ResourceConfig, ConfigError> {
    config
        .resource(resource)
        .ok_or_else(|| ConfigError::UnknownReference {
            from: from.to_string(),
            kind: "resource",
            id: u32::from(resource.raw()),
        })
}

fn check_counter_ref(config: &OsConfig, from: &str, counter: CounterId) -> Result<(), ConfigError> {
    match config.counter(counter) {
        Some(_) => Ok(()),
        None => Err(ConfigError::UnknownReference {
            from: from.to_string(),
            kind: "counter",
            id: u32::from(counter.raw()),
        }),
    }
}

fn check_app_ref(config: &OsConfig, from: &str, app: Option<AppId>) -> Result<(), ConfigError> {
    match app {
        Some(app) if config.app(app).is_none() => Err(ConfigError::UnknownReference {
            from: from.to_string(),
            kind: "application",
            id: u32::from(app.raw()),
        }),
        _ => Ok(()),
    }
}

fn validate(config: &OsConfig) -> Result<(), ConfigError> {
    if config.cores == 0 {
        return Err(ConfigError::NoCores);
    }
    if config.message_queue_size < 2 {
        return Err(ConfigError::QueueSize(config.message_queue_size));
    }

    check_dense("task", config.tasks.iter().map(|t| u32::from(t.id.raw())))?;
    check_dense("resource", config.resources.iter().map(|r| u32::from(r.id.raw())))?;
    check_dense("counter", config.counters.iter().map(|c| u32::from(c.id.raw())))?;
    check_dense("alarm", config.alarms.iter().map(|a| u32::from(a.id.raw())))?;
    check_dense("schedule table", config.tables.iter().map(|s| u32::from(s.id.raw())))?;
    check_dense("isr", config.isrs.iter().map(|i| u32::from(i.id.raw())))?;
    check_dense("application", config.apps.iter().map(|a| u32::from(a.id.raw())))?;

    for task in &config.tasks {
        let id = u32::from(task.id.raw());
        check_core(config, "task", id, task.core)?;
        if task.priority > MAX_TASK_PRIORITY
            || task.run_priority.is_some_and(|prio| prio > MAX_TASK_PRIORITY)
        {
            return Err(ConfigError::InvalidPriority {
                task: task.id,
                priority: task.priority,
            });
        }
        if task.max_activations == 0 {
            return Err(ConfigError::ZeroActivations(task.id));
        }
        check_app_ref(config, &task.name, task.app)?;
        for &resource_id in &task.resources {
            let resource = check_resource_ref(config, &task.name, resource_id)?;
            if resource.ceiling < task.priority {
                return Err(ConfigError::CeilingTooLow {
                    resource: resource.id,
                    user: task.name.clone(),
                });
            }
        }
    }

    for isr in &config.isrs {
        check_core(config, "isr", u32::from(isr.id.raw()), isr.core)?;
        check_app_ref(config, &isr.name, isr.app)?;
        for &resource_id in &isr.resources {
            let resource = check_resource_ref(config, &isr.name, resource_id)?;
            if resource.ceiling < Priority::interrupt(isr.level).raw() {
                return Err(ConfigError::CeilingTooLow {
                    resource: resource.id,
                    user: isr.name.clone(),
                });
            }
        }
    }

    for counter in &config.counters {
        check_core(config, "counter", u32::from(counter.id.raw()), counter.core)?;
        if counter.max_allowed == 0 {
            return Err(ConfigError::InvalidCounter {
                counter: counter.id,
                reason: "maximum allowed value must be positive",
            });
        }
        if counter.min_cycle == 0 || counter.min_cycle > counter.max_allowed {
            return Err(ConfigError::InvalidCounter {
                counter: counter.id,
                reason: "minimum cycle outside 1..=max",
            });
        }
    }

    for alarm in &config.alarms {
        check_core(config, "alarm", u32::from(alarm.id.raw()), alarm.core)?;
        check_counter_ref(config, &alarm.name, alarm.counter)?;
        check_app_ref(config, &alarm.name, alarm.app)?;
        let owner = config.counter(alarm.counter).map(|counter| counter.core);
        if owner != Some(alarm.core) {
            return Err(ConfigError::InvalidAlarm {
                alarm: alarm.id,
                reason: "alarm and counter must live on the same core",
            });
        }
        match alarm.action {
            AlarmAction::ActivateTask(task) | AlarmAction::SetEvent(task, _) => {
                check_task_ref(config, || alarm.name.clone(), task)?;
            }
            AlarmAction::IncrementCounter(counter) => {
                check_counter_ref(config, &alarm.name, counter)?;
                if counter == alarm.counter {
                    return Err(ConfigError::InvalidAlarm {
                        alarm: alarm.id,
                        reason: "alarm may not increment its own counter",
                    });
                }
            }
            AlarmAction::Callback(_) => {}
        }
    }

    for table in &config.tables {
        check_core(config, "schedule table", u32::from(table.id.raw()), table.core)?;
        check_counter_ref(config, &table.name, table.counter)?;
        check_app_ref(config, &table.name, table.app)?;
        let max = config
            .counter(table.counter)
            .map_or(0, |counter| counter.max_allowed);
        let invalid = |reason| ConfigError::InvalidTable {
            table: table.id,
            reason,
        };
        if table.points.is_empty() {
            return Err(invalid("at least one expiry point is required"));
        }
        if table.duration == 0 || table.duration > max {
            return Err(invalid("duration outside 1..=counter max"));
        }
        if !table
            .points
            .windows(2)
            .all(|pair| pair[0].offset < pair[1].offset)
        {
            return Err(invalid("expiry point offsets must increase"));
        }
        if table.points.iter().any(|point| point.offset >= table.duration) {
            return Err(invalid("expiry point beyond duration"));
        }
        for point in &table.points {
            for action in &point.actions {
                let (ExpiryAction::ActivateTask(task) | ExpiryAction::SetEvent(task, _)) = *action;
                check_task_ref(config, || table.name.clone(), task)?;
            }
        }
    }

    for app in &config.apps {
        check_core(config, "application", u32::from(app.id.raw()), app.core)?;
        if let Some(task) = app.restart_task {
            check_task_ref(config, || app.name.clone(), task)?;
        }
    }

    Ok(())
}
