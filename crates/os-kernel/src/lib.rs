//! # OS Kernel
//!
//! Per-core kernel of an AUTOSAR-style operating system, hosted on `std`.
//! Each core owns one [`CoreKernel`]; cores only meet through the
//! [`RemoteCall`] seam, which the cross-core message layer implements.
//!
//! Task bodies run in steps: a step ends with a [`TaskExit`] and the
//! dispatcher decision is returned as a value ([`Dispatched`], [`Step`])
//! instead of switching stacks.
//!
//! ## Module Overview
//! - [`config`]      – validated static configuration shared by all cores.
//! - [`kernel`]      – per-core state, builder and the step runner.
//! - [`dispatch`]    – selection of the next task.
//! - [`scheduling`]  – task management services.
//! - [`resource`]    – immediate priority ceiling resources.
//! - [`event`]       – events of extended tasks.
//! - [`counter`]     – counters and alarms.
//! - [`schedtable`]  – schedule tables.
//! - [`isr`]         – interrupt routines and sources.
//! - [`application`] – OS-Applications and shutdown.
//! - [`error`]       – error reporting, protection handling, panics.
//! - [`cpuload`]     – busy time measurement.
//! - [`remote`]      – forwarding of services to other cores.

pub mod api;
pub mod application;
pub mod clock;
pub mod config;
pub mod counter;
pub mod cpuload;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod hooks;
pub mod isr;
pub mod kernel;
pub mod remote;
pub mod resource;
pub mod schedtable;
pub mod scheduling;
pub mod task;

pub use api::TaskApi;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    AlarmAction, AlarmConfig, AppConfig, ConfigError, CounterConfig, ExpiryPoint, IsrCategory,
    IsrConfig, OsConfig, OsConfigBuilder, ResourceConfig, ScheduleTableConfig, SyncStrategy,
    TableAutostart, TaskConfig, TaskFlags,
};
pub use counter::{counter_add, counter_sub, AlarmBase, AlarmCallback};
pub use cpuload::CpuLoadQuery;
pub use dispatch::Dispatched;
pub use error::{
    ErrorAction, ErrorInfo, HookKind, PanicCode, ProtectionAction, ServiceId,
};
pub use hooks::{KernelHooks, NoHooks};
pub use isr::IsrBody;
pub use kernel::{CallContext, CoreKernel, CoreKernelBuilder, CorePhase, KernelError, KernelStats, Step};
pub use os_core::*;
pub use remote::{RemoteCall, RemoteRef, RemoteReply, RemoteRequest};
pub use resource::Holder;
pub use task::{ReadyKind, TaskBody, TaskExit, TaskSnapshot, TaskState};

#[cfg(test)]
mod tests;
