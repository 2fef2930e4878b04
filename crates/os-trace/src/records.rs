//! Trace record identifiers emitted by the kernel crates.

/// Task lifecycle records. Payload: task id (u16), priority (u16).
pub mod task {
    /// Task activated (`ActivateTask`).
    pub const ACTIVATE: u8 = 1;
    /// First dispatch of an activation.
    pub const START: u8 = 2;
    /// Task resumed after it gave up the CPU in a service call.
    pub const RESUME_SYNC: u8 = 3;
    /// Task resumed after an interrupt preempted it.
    pub const RESUME_ASYNC: u8 = 4;
    /// Running task displaced by a higher priority one.
    pub const PREEMPT: u8 = 5;
    pub const TERMINATE: u8 = 6;
    /// Task blocked in `WaitEvent`.
    pub const WAIT: u8 = 7;
    /// Waiting task released by `SetEvent`.
    pub const WAKE: u8 = 8;
}

/// Dispatcher records.
pub mod sched {
    /// No task ready; the core idles.
    pub const IDLE: u8 = 16;
    /// Dispatcher stopped after a kernel panic or shutdown.
    pub const HALT: u8 = 17;
}

/// Resource records. Payload: resource id (u16), priority (u16).
pub mod resource {
    pub const GET: u8 = 24;
    pub const RELEASE: u8 = 25;
}

/// Error handling records.
pub mod error {
    /// Service error. Payload: service id (u8), error code (u8).
    pub const SERVICE: u8 = 32;
    /// Kernel panic. Payload: panic code (u8).
    pub const PANIC: u8 = 33;
    /// Core shutdown. Payload: error code (u8).
    pub const SHUTDOWN: u8 = 34;
}

/// Counter driven records.
pub mod alarm {
    /// Alarm expired. Payload: alarm id (u16), counter value (u32).
    pub const EXPIRE: u8 = 40;
    /// Schedule table expiry point. Payload: table id (u16), offset (u32).
    pub const EXPIRY_POINT: u8 = 41;
}

/// Interrupt records. Payload: isr id (u16).
pub mod isr {
    pub const ENTER: u8 = 48;
    pub const EXIT: u8 = 49;
}

/// Cross-core records. Payload: from (u8), to (u8), opcode (u8).
pub mod xcore {
    pub const SEND: u8 = 56;
    pub const RECEIVE: u8 = 57;
    /// Target queue full. Payload as for `SEND`.
    pub const QUEUE_FULL: u8 = 58;
}

/// Human readable name of a record identifier.
pub fn name(record: u8) -> Option<&'static str> {
    let name = match record {
        task::ACTIVATE => "TASK_ACTIVATE",
        task::START => "TASK_START",
        task::RESUME_SYNC => "TASK_RESUME_SYNC",
        task::RESUME_ASYNC => "TASK_RESUME_ASYNC",
        task::PREEMPT => "TASK_PREEMPT",
        task::TERMINATE => "TASK_TERMINATE",
        task::WAIT => "TASK_WAIT",
        task::WAKE => "TASK_WAKE",
        sched::IDLE => "SCHED_IDLE",
        sched::HALT => "SCHED_HALT",
        resource::GET => "RES_GET",
        resource::RELEASE => "RES_RELEASE",
        error::SERVICE => "ERR_SERVICE",
        error::PANIC => "ERR_PANIC",
        error::SHUTDOWN => "ERR_SHUTDOWN",
        alarm::EXPIRE => "ALARM_EXPIRE",
        alarm::EXPIRY_POINT => "ST_EXPIRY_POINT",
        isr::ENTER => "ISR_ENTER",
        isr::EXIT => "ISR_EXIT",
        xcore::SEND => "XC_SEND",
        xcore::RECEIVE => "XC_RECEIVE",
        xcore::QUEUE_FULL => "XC_QUEUE_FULL",
        _ => return None,
    };
    Some(name)
}
