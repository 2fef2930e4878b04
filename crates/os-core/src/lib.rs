#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![forbid(unsafe_code)]

//! # OS Core
//!
//! Leaf types shared by the kernel crates: object identifiers, priorities,
//! service status codes and the ready-task structures the dispatcher is built
//! on.
//!
//! ## Module Overview
//! - [`ids`]    – object identifiers and task/interrupt priority levels.
//! - [`status`] – `StatusType` error codes and reported object states.
//! - [`bitmap`] – CLZ bitmap of ready priorities (single word or master/slave).
//! - [`queue`]  – per-priority FIFO rings and the ready-queue array.

extern crate alloc;

pub mod bitmap;
pub mod ids;
pub mod queue;
pub mod status;

pub use bitmap::{PriorityBitmap, PrioritySet};
pub use ids::*;
pub use queue::{QueueOverflow, ReadyEntry, ReadyQueues, TaskQueue, TaskRing};
pub use status::*;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
