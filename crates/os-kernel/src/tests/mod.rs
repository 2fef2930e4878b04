mod apps;
mod errors;
mod resources;

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::clock::ManualClock;
use crate::config::OsConfig;
use crate::error::{ErrorInfo, ProtectionAction};
use crate::hooks::KernelHooks;
use crate::kernel::{CoreKernel, CoreKernelBuilder};
use crate::task::TaskExit;
use crate::TaskApi;
use os_core::{CoreId, OsError, TaskId};

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

pub(super) fn init_logging() {
    Lazy::force(&LOGGER);
}

/// Shared list of things that happened, in order.
#[derive(Clone, Default)]
pub(super) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

/// Hooks writing every call into a [`Journal`].
pub(super) struct JournalHooks {
    pub journal: Journal,
    pub protection: ProtectionAction,
}

impl JournalHooks {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            protection: ProtectionAction::Ignore,
        }
    }
}

impl KernelHooks for JournalHooks {
    fn startup(&mut self, _kernel: &mut CoreKernel) {
        self.journal.push("startup");
    }

    fn shutdown(&mut self, _kernel: &mut CoreKernel, error: Option<OsError>) {
        self.journal
            .push(format!("shutdown {}", error.map_or("E_OK", OsError::name)));
    }

    fn error(&mut self, _kernel: &mut CoreKernel, info: &ErrorInfo) {
        self.journal
            .push(format!("error {} {}", info.service, info.error));
    }

    fn protection(&mut self, _kernel: &mut CoreKernel, error: OsError) -> ProtectionAction {
        self.journal.push(format!("protection {error}"));
        self.protection
    }

    fn idle(&mut self, _kernel: &mut CoreKernel) {
        self.journal.push("idle");
    }
}

/// Builder for core 0 of `config` driven by a manual clock.
pub(super) fn core0(config: OsConfig) -> (CoreKernelBuilder, ManualClock) {
    init_logging();
    let clock = ManualClock::new();
    let builder =
        CoreKernel::builder(Arc::new(config), CoreId(0)).clock(Arc::new(clock.clone()));
    (builder, clock)
}

/// Body that logs its name and terminates.
pub(super) fn logging_task(
    journal: &Journal,
    name: &'static str,
) -> impl FnMut(&mut TaskApi<'_>) -> TaskExit + Send + 'static {
    let journal = journal.clone();
    move |_api: &mut TaskApi<'_>| {
        journal.push(name);
        TaskExit::Terminate
    }
}

/// Starts `kernel` and runs `task` so it is the running task.
pub(super) fn start_running(kernel: &mut CoreKernel, task: TaskId) {
    kernel.start().unwrap();
    kernel.activate_task(task).unwrap();
    kernel.dispatch(crate::task::ReadyKind::Sync);
    assert_eq!(kernel.current_task(), Some(task));
}
