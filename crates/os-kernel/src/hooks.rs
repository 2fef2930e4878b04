//! Application hooks called by the kernel.

use os_core::{AppId, OsError, TaskId};

use crate::error::{ErrorInfo, ProtectionAction};
use crate::kernel::CoreKernel;

/// Callbacks into the application. Every method has an empty default.
///
/// The kernel is handed back to the hook so it can query state or call the
/// services allowed in the hook's calling context.
pub trait KernelHooks: Send {
    fn startup(&mut self, _kernel: &mut CoreKernel) {}

    fn shutdown(&mut self, _kernel: &mut CoreKernel, _error: Option<OsError>) {}

    fn error(&mut self, _kernel: &mut CoreKernel, _info: &ErrorInfo) {}

    /// Error hook of the application owning the failing caller.
    fn app_error(&mut self, _kernel: &mut CoreKernel, _app: AppId, _info: &ErrorInfo) {}

    /// Decides how a protection violation is handled. Without an override
    /// the core shuts down.
    fn protection(&mut self, _kernel: &mut CoreKernel, _error: OsError) -> ProtectionAction {
        ProtectionAction::Shutdown
    }

    fn pre_task(&mut self, _kernel: &mut CoreKernel, _task: TaskId) {}

    fn post_task(&mut self, _kernel: &mut CoreKernel, _task: TaskId) {}

    /// Called each time the dispatcher finds no ready task.
    fn idle(&mut self, _kernel: &mut CoreKernel) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl KernelHooks for NoHooks {}

impl CoreKernel {
    /// Runs `f` with the hooks taken out of the kernel and the calling
    /// context set to `context`. Returns `None` when no hooks are installed
    /// or a hook of the same kernel is already running.
    pub(crate) fn with_hooks<R>(
        &mut self,
        context: crate::kernel::CallContext,
        f: impl FnOnce(&mut dyn KernelHooks, &mut CoreKernel) -> R,
    ) -> Option<R> {
        let mut hooks = self.hooks.take()?;
        let saved = core::mem::replace(&mut self.context, context);
        let result = f(hooks.as_mut(), self);
        self.context = saved;
        self.hooks = Some(hooks);
        Some(result)
    }
}
