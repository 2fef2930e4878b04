//! Object identifiers and priority levels.

use core::fmt;

use crate::{OsError, OsResult};

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident($repr:ty), $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub $repr);

        impl $name {
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> $repr {
                self.0
            }

            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }

        #[cfg(feature = "defmt")]
        impl defmt::Format for $name {
            fn format(&self, fmt: defmt::Formatter) {
                defmt::write!(fmt, "{=str}#{}", $label, self.0);
            }
        }
    };
}

object_id!(
    /// Index of a core in the system.
    CoreId(u8),
    "core"
);
object_id!(TaskId(u16), "task");
object_id!(ResourceId(u16), "resource");
object_id!(CounterId(u16), "counter");
object_id!(AlarmId(u16), "alarm");
object_id!(ScheduleTableId(u16), "schedtable");
object_id!(IsrId(u16), "isr");
object_id!(
    /// OS-Application identifier.
    AppId(u8),
    "app"
);

/// Highest priority a task may run at. Anything above is an interrupt level.
pub const MAX_TASK_PRIORITY: u16 = 0xFF;

/// Kernel priority. Values up to [`MAX_TASK_PRIORITY`] are task levels;
/// larger values encode interrupt lock levels used by ISR-level resource
/// ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Priority(u16);

impl Priority {
    /// Lowest task priority.
    pub const IDLE: Priority = Priority(0);

    pub const MAX_TASK: Priority = Priority(MAX_TASK_PRIORITY);

    /// Creates a task-level priority.
    pub fn task(level: u16) -> OsResult<Self> {
        if level > MAX_TASK_PRIORITY {
            Err(OsError::Value)
        } else {
            Ok(Self(level))
        }
    }

    /// Priority that masks interrupts up to and including `level`.
    pub const fn interrupt(level: u8) -> Self {
        Self(MAX_TASK_PRIORITY + 1 + level as u16)
    }

    pub const fn new_unchecked(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// True for interrupt lock levels.
    pub const fn is_interrupt_level(self) -> bool {
        self.0 > MAX_TASK_PRIORITY
    }

    /// Interrupt level encoded in this priority, if any.
    pub const fn interrupt_level(self) -> Option<u8> {
        if self.is_interrupt_level() {
            Some((self.0 - MAX_TASK_PRIORITY - 1) as u8)
        } else {
            None
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interrupt_level() {
            Some(level) => write!(f, "Priority(irq {level})"),
            None => write!(f, "Priority({})", self.0),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Priority {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Priority({})", self.0);
    }
}

/// Bit set of task events.
pub type EventMask = u32;

/// Counter ticks.
pub type TickType = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_priority_range() {
        assert!(Priority::task(0).is_ok());
        assert!(Priority::task(MAX_TASK_PRIORITY).is_ok());
        assert_eq!(Priority::task(MAX_TASK_PRIORITY + 1), Err(OsError::Value));
    }

    #[test]
    fn interrupt_levels_sort_above_tasks() {
        let irq = Priority::interrupt(2);
        assert!(irq.is_interrupt_level());
        assert_eq!(irq.interrupt_level(), Some(2));
        assert!(irq > Priority::MAX_TASK);
        assert!(Priority::interrupt(3) > irq);
        assert_eq!(Priority::MAX_TASK.interrupt_level(), None);
    }

    #[test]
    fn ids_display_with_label() {
        assert_eq!(std::format!("{}", TaskId(4)), "task#4");
        assert_eq!(std::format!("{}", CoreId(1)), "core#1");
    }
}
