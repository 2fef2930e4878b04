use std::time::Duration;

use os_core::{CoreId, OsError};
use os_kernel::{ConfigError, KernelError};
use thiserror::Error;

use crate::message::Opcode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XcoreError {
    #[error("message queue of {core} is full")]
    QueueFull { core: CoreId },
    /// A second core wrote to a queue set up for a single producer.
    #[error("concurrent sender on the single-producer queue of {core}")]
    ConcurrentSender { core: CoreId },
    #[error("{0} is not configured")]
    UnknownCore(CoreId),
    #[error("{0} cannot send a message to itself")]
    LocalTarget(CoreId),
    /// The system stopped while a sender waited for its reply.
    #[error("interconnect closed")]
    Disconnected,
    #[error("{core} did not answer {opcode} within {timeout:?}")]
    ReplyTimeout {
        core: CoreId,
        opcode: Opcode,
        timeout: Duration,
    },
    #[error("{0} has already been started")]
    AlreadyStarted(CoreId),
    #[error("thread of {0} panicked")]
    ThreadPanicked(CoreId),
    #[error("kernel setup failed: {0}")]
    Kernel(#[from] KernelError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl XcoreError {
    /// Status a service reports for this failure.
    pub fn status(&self) -> OsError {
        match self {
            XcoreError::QueueFull { .. } => OsError::Limit,
            _ => OsError::Core,
        }
    }
}

impl From<XcoreError> for OsError {
    fn from(err: XcoreError) -> Self {
        err.status()
    }
}
