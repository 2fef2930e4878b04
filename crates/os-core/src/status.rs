//! Service status codes and the public state enumerations reported by the
//! kernel services.

use core::fmt;

/// Result type returned by kernel services.
pub type OsResult<T> = Result<T, OsError>;

/// Wire value of a successful service call (`E_OK`).
pub const E_OK: u32 = 0;

/// Error codes reported by kernel services. The discriminants are the
/// `StatusType` values exchanged between cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum OsError {
    /// Object not accessible in the current state or by the caller.
    Access = 1,
    /// Service called from a context that may not use it.
    CallLevel = 2,
    /// Invalid object identifier.
    Id = 3,
    /// Activation or queue limit exceeded.
    Limit = 4,
    /// Object not in use, or a resource released out of order.
    NoFunc = 5,
    /// Resources still held, or a ceiling below the caller.
    Resource = 6,
    /// Object in the wrong state for the request.
    State = 7,
    /// Value outside the admissible range.
    Value = 8,
    /// Unknown service.
    ServiceId = 9,
    IllegalAddress = 10,
    /// Task returned without terminating.
    MissingEnd = 11,
    /// Service called with interrupts disabled.
    DisabledInt = 12,
    StackFault = 13,
    ProtectionMemory = 14,
    ProtectionTime = 15,
    ProtectionArrival = 16,
    ProtectionLocked = 17,
    ProtectionException = 18,
    /// Core not started, shut down, or not able to serve the request.
    Core = 19,
    Spinlock = 20,
    InterferenceDeadlock = 21,
    NestingDeadlock = 22,
}

impl OsError {
    const ALL: [OsError; 22] = [
        OsError::Access,
        OsError::CallLevel,
        OsError::Id,
        OsError::Limit,
        OsError::NoFunc,
        OsError::Resource,
        OsError::State,
        OsError::Value,
        OsError::ServiceId,
        OsError::IllegalAddress,
        OsError::MissingEnd,
        OsError::DisabledInt,
        OsError::StackFault,
        OsError::ProtectionMemory,
        OsError::ProtectionTime,
        OsError::ProtectionArrival,
        OsError::ProtectionLocked,
        OsError::ProtectionException,
        OsError::Core,
        OsError::Spinlock,
        OsError::InterferenceDeadlock,
        OsError::NestingDeadlock,
    ];

    /// Numeric `StatusType` code.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decodes a `StatusType` code. `E_OK` and unknown values yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|err| err.code() == code)
    }

    /// Symbolic AUTOSAR name of the code.
    pub const fn name(self) -> &'static str {
        match self {
            OsError::Access => "E_OS_ACCESS",
            OsError::CallLevel => "E_OS_CALLEVEL",
            OsError::Id => "E_OS_ID",
            OsError::Limit => "E_OS_LIMIT",
            OsError::NoFunc => "E_OS_NOFUNC",
            OsError::Resource => "E_OS_RESOURCE",
            OsError::State => "E_OS_STATE",
            OsError::Value => "E_OS_VALUE",
            OsError::ServiceId => "E_OS_SERVICEID",
            OsError::IllegalAddress => "E_OS_ILLEGAL_ADDRESS",
            OsError::MissingEnd => "E_OS_MISSINGEND",
            OsError::DisabledInt => "E_OS_DISABLEDINT",
            OsError::StackFault => "E_OS_STACKFAULT",
            OsError::ProtectionMemory => "E_OS_PROTECTION_MEMORY",
            OsError::ProtectionTime => "E_OS_PROTECTION_TIME",
            OsError::ProtectionArrival => "E_OS_PROTECTION_ARRIVAL",
            OsError::ProtectionLocked => "E_OS_PROTECTION_LOCKED",
            OsError::ProtectionException => "E_OS_PROTECTION_EXCEPTION",
            OsError::Core => "E_OS_CORE",
            OsError::Spinlock => "E_OS_SPINLOCK",
            OsError::InterferenceDeadlock => "E_OS_INTERFERENCE_DEADLOCK",
            OsError::NestingDeadlock => "E_OS_NESTING_DEADLOCK",
        }
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for OsError {}

#[cfg(feature = "defmt")]
impl defmt::Format for OsError {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{=str}", self.name());
    }
}

/// Encodes a service result as a `StatusType` word.
pub fn status_code<T>(result: &OsResult<T>) -> u32 {
    match result {
        Ok(_) => E_OK,
        Err(err) => err.code(),
    }
}

/// Decodes a `StatusType` word. Unknown non-zero codes map to
/// [`OsError::ServiceId`].
pub fn status_from_code(code: u32) -> OsResult<()> {
    if code == E_OK {
        Ok(())
    } else {
        Err(OsError::from_code(code).unwrap_or(OsError::ServiceId))
    }
}

/// Task state as reported by `GetTaskState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum TaskStateType {
    Running = 0,
    Waiting = 1,
    Ready = 2,
    Suspended = 3,
}

impl TaskStateType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Running),
            1 => Some(Self::Waiting),
            2 => Some(Self::Ready),
            3 => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// Schedule table state as reported by `GetScheduleTableStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ScheduleTableStatus {
    Stopped = 0,
    Next = 1,
    Waiting = 2,
    Running = 3,
    RunningAndSynchronous = 4,
}

impl ScheduleTableStatus {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Stopped),
            1 => Some(Self::Next),
            2 => Some(Self::Waiting),
            3 => Some(Self::Running),
            4 => Some(Self::RunningAndSynchronous),
            _ => None,
        }
    }
}

/// OS-Application state as reported by `GetApplicationState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ApplicationState {
    Accessible = 0,
    Restarting = 1,
    Terminated = 2,
}

impl ApplicationState {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Accessible),
            1 => Some(Self::Restarting),
            2 => Some(Self::Terminated),
            _ => None,
        }
    }
}
