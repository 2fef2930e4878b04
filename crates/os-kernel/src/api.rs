//! Handle given to task bodies.

use core::ops::{Deref, DerefMut};

use os_core::TaskId;

use crate::kernel::CoreKernel;

/// The kernel as seen from inside a task step. Every kernel service is
/// reachable through `Deref`.
pub struct TaskApi<'a> {
    kernel: &'a mut CoreKernel,
    task: TaskId,
}

impl<'a> TaskApi<'a> {
    pub(crate) fn new(kernel: &'a mut CoreKernel, task: TaskId) -> Self {
        Self { kernel, task }
    }

    /// The task this step belongs to.
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Records that the step used `words` of stack.
    pub fn use_stack(&mut self, words: usize) {
        let task = self.task;
        if let Some(tc) = self.kernel.tcb_mut(task) {
            tc.stack.touch(words);
        }
    }
}

impl Deref for TaskApi<'_> {
    type Target = CoreKernel;

    fn deref(&self) -> &CoreKernel {
        self.kernel
    }
}

impl DerefMut for TaskApi<'_> {
    fn deref_mut(&mut self) -> &mut CoreKernel {
        self.kernel
    }
}
