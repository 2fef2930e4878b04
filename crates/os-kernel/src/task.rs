//! Task states, bodies and the simulated task stack.
//!
//! Task bodies run to their next kernel interaction: each call of
//! [`TaskBody::run`] is one step and its [`TaskExit`] says what the task
//! asks of the kernel next. The dispatcher decides between steps whether the
//! task keeps the CPU.

use core::fmt;

use os_core::{EventMask, Priority, ResourceId, TaskId, TaskStateType};

use crate::api::TaskApi;

/// Guard pattern filling unused stack words.
pub const STACK_GUARD: u32 = 0xEBEB_EBEB;

/// Number of words checked at the cold end of a stack.
pub const GUARD_WORDS: usize = 4;

/// Kernel-internal task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Activated, never dispatched in this activation.
    New,
    /// Gave up the CPU in a service call.
    ReadySync,
    /// Preempted by an interrupt.
    ReadyAsync,
    Running,
    Waiting,
    Suspended,
}

impl TaskState {
    /// State reported by `GetTaskState`.
    pub fn reported(self) -> TaskStateType {
        match self {
            Self::Running => TaskStateType::Running,
            Self::Waiting => TaskStateType::Waiting,
            Self::Suspended => TaskStateType::Suspended,
            Self::New | Self::ReadySync | Self::ReadyAsync => TaskStateType::Ready,
        }
    }

    pub fn is_ready(self) -> bool {
        matches!(self, Self::New | Self::ReadySync | Self::ReadyAsync)
    }
}

/// Ready variant a displaced running task is put into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyKind {
    /// Displaced from a system call.
    #[default]
    Sync,
    /// Displaced from an interrupt.
    Async,
}

impl ReadyKind {
    pub fn state(self) -> TaskState {
        match self {
            Self::Sync => TaskState::ReadySync,
            Self::Async => TaskState::ReadyAsync,
        }
    }
}

/// What a task asks for at the end of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// Keep running; the body is called again unless preempted.
    Continue,
    /// `WaitEvent(mask)`.
    Wait(EventMask),
    /// `TerminateTask()`.
    Terminate,
    /// `ChainTask(task)`.
    Chain(TaskId),
}

/// Code of a task.
pub trait TaskBody: Send {
    fn run(&mut self, api: &mut TaskApi<'_>) -> TaskExit;
}

impl<F> TaskBody for F
where
    F: FnMut(&mut TaskApi<'_>) -> TaskExit + Send,
{
    fn run(&mut self, api: &mut TaskApi<'_>) -> TaskExit {
        self(api)
    }
}

/// Simulated downward-growing stack. Index 0 is the cold end.
#[derive(Clone, PartialEq, Eq)]
pub struct TaskStack {
    words: Vec<u32>,
}

impl TaskStack {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![STACK_GUARD; len.max(GUARD_WORDS)],
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Marks `depth` words from the hot end as used. A depth beyond the
    /// stack length tramples the guard.
    pub fn touch(&mut self, depth: usize) {
        let len = self.words.len();
        let start = len.saturating_sub(depth);
        for word in &mut self.words[start..] {
            *word = 0;
        }
        if depth > len {
            self.words[0] = !STACK_GUARD;
        }
    }

    /// True once the guard words at the cold end are no longer intact.
    pub fn overflowed(&self) -> bool {
        self.words[..GUARD_WORDS]
            .iter()
            .any(|&word| word != STACK_GUARD)
    }

    /// Deepest use seen so far, in words.
    pub fn high_water(&self) -> usize {
        self.words
            .iter()
            .position(|&word| word != STACK_GUARD)
            .map_or(0, |first| self.words.len() - first)
    }
}

impl fmt::Debug for TaskStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStack")
            .field("len", &self.words.len())
            .field("high_water", &self.high_water())
            .finish()
    }
}

/// Dynamic state of a task owned by this core.
#[derive(Debug, Clone)]
pub(crate) struct TaskControl {
    pub state: TaskState,
    pub base: Priority,
    pub prio: Priority,
    pub activations: u8,
    pub pending_events: EventMask,
    pub waiting_events: EventMask,
    /// Head of the held-resource chain.
    pub last_lock: Option<ResourceId>,
    pub stack: TaskStack,
    /// Clock value when the task last got the CPU.
    pub started_at: u64,
    /// Execution time of the current activation.
    pub exec_time: u64,
    pub max_exec_time: u64,
    pub yield_requested: bool,
}

impl TaskControl {
    pub fn new(base: Priority, stack_words: usize) -> Self {
        Self {
            state: TaskState::Suspended,
            base,
            prio: base,
            activations: 0,
            pending_events: 0,
            waiting_events: 0,
            last_lock: None,
            stack: TaskStack::new(stack_words),
            started_at: 0,
            exec_time: 0,
            max_exec_time: 0,
            yield_requested: false,
        }
    }
}

/// Read-only view of a task for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: TaskState,
    pub priority: Priority,
    pub activations: u8,
    pub pending_events: EventMask,
    pub last_lock: Option<ResourceId>,
    pub stack_high_water: usize,
    pub max_exec_time: u64,
}
