//! Inbound message queue of a core.
//!
//! A ring of `capacity` slots indexed by `fill` (next slot the producer
//! writes) and `empty` (next slot the consumer reads). One slot always stays
//! free, so the queue is full when `(fill + 1) % capacity == empty` and holds
//! at most `capacity - 1` messages. The two indices live on separate cache
//! lines.
//!
//! With two cores every queue has exactly one producer and the ring is
//! lock-free. With more cores the producers take the queue's spin lock
//! before writing. The owning core is the only consumer; it reads through
//! the [`Inbox`] handed out when the queue is created.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;
use os_core::CoreId;

use crate::message::Message;
use crate::sync::{Arc, SpinLock};
use crate::XcoreError;

/// How producers are serialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// A single producer core; no lock is taken.
    SingleProducer,
    /// Producers take a spin lock around the write.
    Locked,
}

impl QueueMode {
    /// Mode used for a system of `cores` cores.
    pub fn for_cores(cores: u8) -> Self {
        if cores <= 2 {
            Self::SingleProducer
        } else {
            Self::Locked
        }
    }
}

pub struct MessageQueue {
    owner: CoreId,
    mode: QueueMode,
    slots: Box<[UnsafeCell<Option<Message>>]>,
    fill: CachePadded<AtomicUsize>,
    empty: CachePadded<AtomicUsize>,
    senders: SpinLock,
    /// Set while the single producer writes.
    producing: AtomicBool,
}

// SAFETY: a slot is written only by the producer while it lies outside
// `empty..fill` and read only by the single consumer while it lies inside.
// Producers are serialised by the spin lock or the `producing` flag, and the
// consumer is the unique `Inbox`. Index updates use release/acquire, so a
// slot's contents are visible before its index moves past it.
unsafe impl Sync for MessageQueue {}

enum SendGuard<'a> {
    Locked(#[allow(dead_code)] spin::MutexGuard<'a, ()>),
    Claimed(&'a AtomicBool),
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if let SendGuard::Claimed(flag) = self {
            flag.store(false, Ordering::Release);
        }
    }
}

impl MessageQueue {
    /// Creates the queue of `owner` with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity < 2`; configuration validation rejects such
    /// sizes.
    pub fn new(owner: CoreId, capacity: usize, mode: QueueMode) -> (Arc<Self>, Inbox) {
        assert!(capacity >= 2, "a message queue needs at least two slots");
        let queue = Arc::new(Self {
            owner,
            mode,
            slots: (0..capacity).map(|_| UnsafeCell::new(None)).collect(),
            fill: CachePadded::new(AtomicUsize::new(0)),
            empty: CachePadded::new(AtomicUsize::new(0)),
            senders: SpinLock::new(),
            producing: AtomicBool::new(false),
        });
        let inbox = Inbox {
            queue: Arc::clone(&queue),
        };
        (queue, inbox)
    }

    pub fn owner(&self) -> CoreId {
        self.owner
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Number of slots, one of which always stays free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        let fill = self.fill.load(Ordering::Acquire);
        let empty = self.empty.load(Ordering::Acquire);
        (fill + self.capacity() - empty) % self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let fill = self.fill.load(Ordering::Acquire);
        (fill + 1) % self.capacity() == self.empty.load(Ordering::Acquire)
    }

    /// `SendMessage`: appends `message` or fails without touching the
    /// queue.
    pub fn try_send(&self, message: Message) -> Result<(), XcoreError> {
        let _guard = self.claim()?;
        let fill = self.fill.load(Ordering::Relaxed);
        let next = (fill + 1) % self.capacity();
        if next == self.empty.load(Ordering::Acquire) {
            return Err(XcoreError::QueueFull { core: self.owner });
        }
        // SAFETY: `fill` is outside `empty..fill`, so the consumer does not
        // read it, and the guard makes this the only producer.
        unsafe {
            *self.slots[fill].get() = Some(message);
        }
        self.fill.store(next, Ordering::Release);
        Ok(())
    }

    fn claim(&self) -> Result<SendGuard<'_>, XcoreError> {
        match self.mode {
            QueueMode::Locked => Ok(SendGuard::Locked(self.senders.lock())),
            QueueMode::SingleProducer => {
                if self.producing.swap(true, Ordering::Acquire) {
                    return Err(XcoreError::ConcurrentSender { core: self.owner });
                }
                Ok(SendGuard::Claimed(&self.producing))
            }
        }
    }

    fn pop(&self) -> Option<Message> {
        let empty = self.empty.load(Ordering::Relaxed);
        if empty == self.fill.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: `empty` is inside `empty..fill`; the producer does not
        // write it until `empty` moves on, and only the inbox calls `pop`.
        let message = unsafe { (*self.slots[empty].get()).take() };
        self.empty
            .store((empty + 1) % self.capacity(), Ordering::Release);
        message
    }
}

/// Receiving end of a core's queue.
pub struct Inbox {
    queue: Arc<MessageQueue>,
}

impl Inbox {
    pub fn owner(&self) -> CoreId {
        self.queue.owner
    }

    /// Takes the oldest message.
    pub fn receive(&mut self) -> Option<Message> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
