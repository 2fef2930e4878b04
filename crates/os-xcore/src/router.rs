//! Routing of messages between cores.
//!
//! The [`Interconnect`] owns every core's inbound queue and the doorbell
//! that wakes the core when something arrives. Each core talks to it
//! through its own [`CoreRouter`], which is also the core kernel's
//! [`RemoteCall`] implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::sync::{Parker, Unparker};
use crossbeam::utils::Backoff;
use os_core::{CoreId, OsResult};
use os_kernel::{CoreKernel, OsConfig, RemoteCall, RemoteReply, RemoteRequest};
use os_trace::{records, PayloadBuilder, TraceHook};

use crate::handlers;
use crate::message::{Completion, Message, Opcode, ReplySlot};
use crate::queue::{Inbox, MessageQueue, QueueMode};
use crate::sync::{Arc, Mutex};
use crate::XcoreError;

/// Level of the inter-core interrupt. It sits above every configured ISR,
/// so only `DisableAllInterrupts` or a lock up to this level holds it off.
pub const INTERCORE_LEVEL: u8 = u8::MAX;

/// Queues and doorbells of all cores.
pub struct Interconnect {
    queues: Vec<Arc<MessageQueue>>,
    doorbells: Vec<Unparker>,
    trace: Option<TraceHook>,
    reply_timeout: Option<Duration>,
    closed: AtomicBool,
}

/// What a core needs to receive: its inbox and the parker its doorbell
/// wakes.
pub struct Endpoint {
    pub core: CoreId,
    pub inbox: Inbox,
    pub parker: Parker,
}

impl Interconnect {
    /// Creates one queue per configured core.
    pub fn new(config: &OsConfig) -> (Self, Vec<Endpoint>) {
        let mode = QueueMode::for_cores(config.cores);
        let mut queues = Vec::with_capacity(usize::from(config.cores));
        let mut doorbells = Vec::with_capacity(queues.capacity());
        let mut endpoints = Vec::with_capacity(queues.capacity());
        for core in config.core_ids() {
            let (queue, inbox) = MessageQueue::new(core, config.message_queue_size, mode);
            let parker = Parker::new();
            queues.push(queue);
            doorbells.push(parker.unparker().clone());
            endpoints.push(Endpoint {
                core,
                inbox,
                parker,
            });
        }
        log::debug!(
            "interconnect for {} cores, {} slots per queue, {:?}",
            config.cores,
            config.message_queue_size,
            mode
        );
        let link = Self {
            queues,
            doorbells,
            trace: None,
            reply_timeout: None,
            closed: AtomicBool::new(false),
        };
        (link, endpoints)
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    /// Bounds how long a blocking sender waits for its answer.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn cores(&self) -> usize {
        self.queues.len()
    }

    pub fn queue(&self, core: CoreId) -> Result<&Arc<MessageQueue>, XcoreError> {
        self.queues
            .get(usize::from(core.raw()))
            .ok_or(XcoreError::UnknownCore(core))
    }

    /// Wakes `core` if it is parked.
    pub fn ring(&self, core: CoreId) {
        if let Some(doorbell) = self.doorbells.get(usize::from(core.raw())) {
            doorbell.unpark();
        }
    }

    /// Stops blocking senders and wakes every core.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for doorbell in &self.doorbells {
            doorbell.unpark();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn emit(&self, record: u8, from: CoreId, to: CoreId, opcode: Opcode) {
        let Some(trace) = &self.trace else {
            return;
        };
        let payload = PayloadBuilder::new()
            .u8(from.raw())
            .u8(to.raw())
            .u8(opcode.raw() as u8)
            .finish();
        match payload {
            Ok(payload) => {
                if let Err(err) = trace(record, &payload, true) {
                    log::debug!("trace record {record} dropped: {err}");
                }
            }
            Err(err) => log::debug!("trace record {record} dropped: {err}"),
        }
    }
}

/// Message counters of one core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub sent: u64,
    pub received: u64,
    /// Sends refused because the target queue was full.
    pub rejected: u64,
}

/// A core's access to the interconnect.
pub struct CoreRouter {
    core: CoreId,
    link: Arc<Interconnect>,
    inbox: Mutex<Inbox>,
    sent: AtomicU64,
    received: AtomicU64,
    rejected: AtomicU64,
}

impl CoreRouter {
    pub fn new(link: Arc<Interconnect>, inbox: Inbox) -> Arc<Self> {
        Arc::new(Self {
            core: inbox.owner(),
            link,
            inbox: Mutex::new(inbox),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn link(&self) -> &Arc<Interconnect> {
        &self.link
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Messages waiting in this core's queue.
    pub fn pending(&self) -> usize {
        self.inbox.lock().len()
    }

    /// `SendMessage`: queues `message` for its receiver and rings the
    /// receiver's doorbell.
    pub fn send(&self, message: Message) -> Result<(), XcoreError> {
        let target = message.to;
        if target == self.core {
            return Err(XcoreError::LocalTarget(target));
        }
        let queue = self.link.queue(target)?;
        let opcode = message.opcode;
        match queue.try_send(message) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                log::trace!("{}: sent {} to {}", self.core, opcode, target);
                self.link
                    .emit(records::xcore::SEND, self.core, target, opcode);
                self.link.ring(target);
                Ok(())
            }
            Err(err) => {
                if let XcoreError::QueueFull { .. } = err {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    log::warn!("{}: {} to {} refused, queue full", self.core, opcode, target);
                    self.link
                        .emit(records::xcore::QUEUE_FULL, self.core, target, opcode);
                }
                Err(err)
            }
        }
    }

    /// `SendWaitMessage`: sends `message` with a reply slot and waits until
    /// the receiver answers. Requests reaching this core meanwhile are
    /// served, so two cores calling each other do not deadlock.
    pub fn send_wait(
        &self,
        kernel: &mut CoreKernel,
        message: Message,
    ) -> Result<Completion, XcoreError> {
        let slot = Arc::new(ReplySlot::new());
        let (target, opcode) = (message.to, message.opcode);
        self.send(message.with_result(Arc::clone(&slot)))?;

        let started = Instant::now();
        let backoff = Backoff::new();
        loop {
            if let Some(done) = slot.poll() {
                return Ok(done);
            }
            if self.receive(kernel) > 0 {
                backoff.reset();
                continue;
            }
            if self.link.is_closed() {
                return Err(XcoreError::Disconnected);
            }
            if let Some(timeout) = self.link.reply_timeout {
                if started.elapsed() >= timeout {
                    log::error!("{}: no answer from {} to {}", self.core, target, opcode);
                    return Err(XcoreError::ReplyTimeout {
                        core: target,
                        opcode,
                        timeout,
                    });
                }
            }
            backoff.snooze();
        }
    }

    /// `ReceiveMessage`: handles everything in this core's queue. Returns
    /// the number of messages handled.
    ///
    /// While the running kernel masks the inter-core interrupt nothing is
    /// taken; the messages stay queued until a later call finds it open.
    pub fn receive(&self, kernel: &mut CoreKernel) -> usize {
        let mut handled = 0;
        loop {
            if kernel.is_running() && !kernel.accepts_interrupt(INTERCORE_LEVEL) {
                if handled == 0 && self.pending() > 0 {
                    log::trace!("{}: inter-core interrupt masked", self.core);
                }
                return handled;
            }
            // The guard is dropped before handling; handlers may wait for
            // replies and receive again.
            let next = self.inbox.lock().receive();
            let Some(message) = next else {
                return handled;
            };
            self.received.fetch_add(1, Ordering::Relaxed);
            log::trace!("{}: received {}", self.core, message);
            self.link.emit(
                records::xcore::RECEIVE,
                message.from,
                message.to,
                message.opcode,
            );
            handlers::handle(self, kernel, message);
            handled += 1;
        }
    }

    /// Sends an answer, serving this core's queue while the caller's queue
    /// is full.
    pub(crate) fn reply(&self, kernel: &mut CoreKernel, answer: Message) {
        let backoff = Backoff::new();
        let mut answer = answer;
        loop {
            let retry = answer.clone();
            match self.send(answer) {
                Ok(()) => return,
                Err(XcoreError::QueueFull { .. }) if !self.link.is_closed() => {
                    answer = retry;
                    self.receive(kernel);
                    backoff.snooze();
                }
                Err(err) => {
                    log::error!("{}: answer {} lost: {}", self.core, retry, err);
                    return;
                }
            }
        }
    }
}

impl RemoteCall for CoreRouter {
    fn call(
        &self,
        kernel: &mut CoreKernel,
        target: CoreId,
        request: RemoteRequest,
    ) -> OsResult<RemoteReply> {
        let message = Message::request(self.core, target, &request);
        let done = self.send_wait(kernel, message)?;
        done.into_reply()
    }

    fn post(
        &self,
        _kernel: &mut CoreKernel,
        target: CoreId,
        request: RemoteRequest,
    ) -> OsResult<()> {
        self.send(Message::request(self.core, target, &request))?;
        Ok(())
    }
}
