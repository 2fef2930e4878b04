//! OS-Applications and core shutdown.

use std::sync::Arc;

use os_core::{AppId, ApplicationState, OsError, OsResult, TaskId};

use crate::error::{Call, ServiceId};
use crate::kernel::{callers, CoreKernel};
use crate::remote::{RemoteReply, RemoteRequest};
use crate::task::TaskState;

#[derive(Debug, Clone)]
pub(crate) struct AppControl {
    pub state: ApplicationState,
}

impl Default for AppControl {
    fn default() -> Self {
        Self {
            state: ApplicationState::Accessible,
        }
    }
}

impl CoreKernel {
    /// `TerminateApplication`. Kills every task of `app`, cancels its
    /// alarms, stops its schedule tables and disables its interrupt
    /// sources. With `restart` the application's restart task is
    /// activated and the application stays `Restarting` until it calls
    /// `AllowAccess`.
    pub fn terminate_application(&mut self, app: AppId, restart: bool) -> OsResult<()> {
        let call = Call::new(ServiceId::TerminateApplication)
            .arg(app.raw())
            .arg(u32::from(restart));
        self.enter(call, callers::TASK | callers::CAT2 | callers::ERROR_HOOK)?;
        let owner = self.config.app(app).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return self.forward_status(
                call,
                owner,
                RemoteRequest::TerminateApplication { app, restart },
            );
        }
        if self.apps[app.index()].state == ApplicationState::Terminated {
            return self.fail(call, OsError::State);
        }
        self.terminate_app_local(app, restart);
        Ok(())
    }

    /// `GetApplicationState`.
    pub fn get_application_state(&mut self, app: AppId) -> OsResult<ApplicationState> {
        let call = Call::new(ServiceId::GetApplicationState).arg(app.raw());
        self.enter(call, callers::TASK | callers::CAT2 | callers::HOOKS)?;
        let owner = self.config.app(app).map(|cfg| cfg.core);
        let owner = self.owner(call, owner)?;
        if owner != self.core {
            return match self.forward(call, owner, RemoteRequest::GetApplicationState { app })? {
                RemoteReply::ApplicationState(state) => Ok(state),
                _ => self.fail(call, OsError::Core),
            };
        }
        Ok(self.apps[app.index()].state)
    }

    /// `AllowAccess`: a restarting application becomes accessible again.
    pub fn allow_access(&mut self) -> OsResult<()> {
        let call = Call::new(ServiceId::AllowAccess);
        self.enter(call, callers::TASK | callers::CAT2)?;
        let Some(app) = self.caller_app() else {
            return self.fail(call, OsError::Access);
        };
        let ctl = &mut self.apps[app.index()];
        if ctl.state != ApplicationState::Restarting {
            return self.fail(call, OsError::State);
        }
        ctl.state = ApplicationState::Accessible;
        log::info!("{}: {} accessible again", self.core, app);
        Ok(())
    }

    pub(crate) fn terminate_app_local(&mut self, app: AppId, restart: bool) {
        let config = Arc::clone(&self.config);
        let core = self.core;
        log::warn!(
            "{}: terminating {}{}",
            core,
            app,
            if restart { " for restart" } else { "" }
        );

        for task in config
            .tasks
            .iter()
            .filter(|task| task.core == core && task.app == Some(app))
        {
            let active = self
                .tcb(task.id)
                .is_some_and(|tc| tc.state != TaskState::Suspended);
            if active {
                self.kill_task(task.id);
            }
        }
        for alarm in config
            .alarms
            .iter()
            .filter(|alarm| alarm.core == core && alarm.app == Some(app))
        {
            self.cancel_alarm_local(alarm.id);
        }
        for table in config
            .tables
            .iter()
            .filter(|table| table.core == core && table.app == Some(app))
        {
            self.stop_table_local(table.id);
        }
        for isr in config
            .isrs
            .iter()
            .filter(|isr| isr.core == core && isr.app == Some(app))
        {
            self.disable_source_local(isr.id);
            if self.isr.current == Some(isr.id) {
                self.isr.killed = true;
                self.release_isr_locks();
            }
        }

        let Some(ctl) = self.apps.get_mut(app.index()) else {
            return;
        };
        if !restart {
            ctl.state = ApplicationState::Terminated;
            return;
        }
        ctl.state = ApplicationState::Restarting;
        if let Some(task) = config.app(app).and_then(|cfg| cfg.restart_task) {
            if let Err(err) = self.activate_local(task) {
                log::warn!("{}: restart task {} not activated: {}", core, task, err);
            }
        }
    }

    /// True when `task` may be activated with respect to its application.
    pub(crate) fn app_admits(&self, task: TaskId) -> bool {
        let Some(app) = self.config.task(task).and_then(|cfg| cfg.app) else {
            return true;
        };
        match self.apps.get(app.index()).map(|ctl| ctl.state) {
            Some(ApplicationState::Accessible) | None => true,
            Some(ApplicationState::Restarting) => self
                .config
                .app(app)
                .is_some_and(|cfg| cfg.restart_task == Some(task)),
            Some(ApplicationState::Terminated) => false,
        }
    }

    /// `ShutdownOS`: shuts this core down after running the shutdown hook.
    pub fn shutdown_os(&mut self, error: Option<OsError>) -> OsResult<()> {
        let call = Call::new(ServiceId::ShutdownOs).arg(error.map_or(0, OsError::code));
        self.enter(
            call,
            callers::TASK | callers::CAT2 | callers::ERROR_HOOK | callers::STARTUP,
        )?;
        self.shutdown(error);
        Ok(())
    }

    /// `ShutdownAllCores`: asks every other core to shut down, then shuts
    /// this one down.
    pub fn shutdown_all_cores(&mut self, error: Option<OsError>) -> OsResult<()> {
        let call = Call::new(ServiceId::ShutdownAllCores).arg(error.map_or(0, OsError::code));
        self.enter(
            call,
            callers::TASK | callers::CAT2 | callers::ERROR_HOOK | callers::STARTUP,
        )?;
        let others: Vec<_> = self
            .config
            .core_ids()
            .filter(|&core| core != self.core)
            .collect();
        for core in others {
            if let Err(err) = self.forward_post(call, core, RemoteRequest::ShutdownCore { error }) {
                log::warn!("{}: {} did not get the shutdown request: {}", self.core, core, err);
            }
        }
        self.shutdown(error);
        Ok(())
    }

    /// Shutdown requested by another core.
    pub fn shutdown_core(&mut self, error: Option<OsError>) {
        self.shutdown(error);
    }
}
