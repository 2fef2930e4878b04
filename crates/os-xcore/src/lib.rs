//! # Cross-Core Messaging
//!
//! Message passing between the per-core kernels. Each core has one bounded
//! inbound queue; a service on an object owned by another core becomes a
//! [`Message`] in the owner's queue, is executed there by the opcode
//! handlers, and its status comes back in a `Return*` message that fills
//! the caller's [`ReplySlot`].
//!
//! ## Module Overview
//! - [`message`]  – opcodes, message layout and reply slots.
//! - [`queue`]    – the ring buffer, lock-free for two cores.
//! - [`router`]   – per-core send, send-and-wait and receive.
//! - `handlers`   – execution of received requests.
//! - [`system`]   – one thread per core driving the kernels.

mod error;
mod handlers;
pub mod message;
pub mod queue;
pub mod router;
pub mod sync;
pub mod system;

pub use error::XcoreError;
pub use message::{Completion, Message, Opcode, ReplySlot, MAX_PARAM, WAITING_FOR_REPLY};
pub use queue::{Inbox, MessageQueue, QueueMode};
pub use router::{CoreRouter, Endpoint, Interconnect, RouterStats, INTERCORE_LEVEL};
pub use system::{CoreReport, MulticoreSystem, MulticoreSystemBuilder, SystemHandle};

#[cfg(test)]
mod tests;
