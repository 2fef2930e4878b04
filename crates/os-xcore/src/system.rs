//! Threaded multicore runner.
//!
//! Every configured core gets a thread that owns the core's kernel. The
//! thread starts the kernel, meets the other cores at a start barrier and
//! then loops: serve the inbox, advance due hardware counters, run one
//! step, and park on the doorbell when there is nothing to do.
//!
//! A core that shut down or halted keeps serving its inbox, answering
//! `E_OS_CORE`, until every core has stopped or the system is stopped.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::sync::Parker;
use os_core::{CoreId, CounterId, OsError};
use os_kernel::{CoreKernel, CoreKernelBuilder, CorePhase, KernelStats, OsConfig, RemoteRef, Step};
use os_trace::TraceHook;

use crate::router::{CoreRouter, Endpoint, Interconnect, RouterStats};
use crate::sync::Arc;
use crate::XcoreError;

/// How long an idle core parks before looking at its counters again.
pub const DEFAULT_IDLE_PARK: Duration = Duration::from_millis(1);

type CoreSetup = Box<dyn FnOnce(CoreKernelBuilder) -> CoreKernelBuilder + Send>;

/// Hardware counter driven by wall-clock time.
#[derive(Debug, Clone, Copy)]
struct TickSource {
    core: CoreId,
    counter: CounterId,
    period: Duration,
}

pub struct MulticoreSystemBuilder {
    config: Arc<OsConfig>,
    setups: Vec<Option<CoreSetup>>,
    ticks: Vec<TickSource>,
    reply_timeout: Option<Duration>,
    idle_park: Duration,
    trace: Option<TraceHook>,
}

impl MulticoreSystemBuilder {
    /// Adds task bodies, interrupt routines, hooks or a clock to the kernel
    /// of `core`.
    pub fn core(
        mut self,
        core: u8,
        setup: impl FnOnce(CoreKernelBuilder) -> CoreKernelBuilder + Send + 'static,
    ) -> Self {
        if let Some(slot) = self.setups.get_mut(usize::from(core)) {
            *slot = Some(Box::new(setup));
        } else {
            log::warn!("setup for unconfigured core {core} ignored");
        }
        self
    }

    /// Increments `counter` on `core` once per `period`.
    pub fn tick(mut self, core: u8, counter: u16, period: Duration) -> Self {
        self.ticks.push(TickSource {
            core: CoreId(core),
            counter: CounterId(counter),
            period,
        });
        self
    }

    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn idle_park(mut self, park: Duration) -> Self {
        self.idle_park = park;
        self
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    /// Builds every core's kernel and starts the core threads.
    pub fn start(self) -> Result<SystemHandle, XcoreError> {
        let config = self.config;
        let (mut link, endpoints) = Interconnect::new(&config);
        if let Some(timeout) = self.reply_timeout {
            link = link.with_reply_timeout(timeout);
        }
        if let Some(trace) = &self.trace {
            link = link.with_trace_hook(Arc::clone(trace));
        }
        let link = Arc::new(link);

        let mut cores = Vec::with_capacity(endpoints.len());
        for (endpoint, setup) in endpoints.into_iter().zip(self.setups) {
            let Endpoint {
                core,
                inbox,
                parker,
            } = endpoint;
            let router = CoreRouter::new(Arc::clone(&link), inbox);
            let remote: RemoteRef = router.clone();
            let mut builder = CoreKernel::builder(Arc::clone(&config), core).remote(remote);
            if let Some(trace) = &self.trace {
                builder = builder.with_trace_hook(Arc::clone(trace));
            }
            if let Some(setup) = setup {
                builder = setup(builder);
            }
            let kernel = builder.build()?;
            let ticks = self
                .ticks
                .iter()
                .filter(|tick| tick.core == core)
                .map(|tick| (tick.counter, tick.period))
                .collect();
            cores.push(CoreThread {
                kernel,
                router,
                parker,
                ticks,
                idle_park: self.idle_park,
            });
        }

        let shared = Arc::new(Shared {
            link: Arc::clone(&link),
            stop: AtomicBool::new(false),
            running: AtomicUsize::new(cores.len()),
            started: Barrier::new(cores.len()),
        });
        let mut routers = Vec::with_capacity(cores.len());
        let mut threads = Vec::with_capacity(cores.len());
        for core_thread in cores {
            let core = core_thread.router.core();
            routers.push(Arc::clone(&core_thread.router));
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("core-{}", core.raw()))
                .spawn(move || core_thread.run(&shared))
                .map_err(|err| {
                    log::error!("{core}: thread not spawned: {err}");
                    XcoreError::ThreadPanicked(core)
                })?;
            threads.push((core, handle));
        }
        log::info!("multicore system started with {} cores", threads.len());

        Ok(SystemHandle {
            shared,
            routers,
            threads,
        })
    }
}

/// Entry point of the runner.
pub struct MulticoreSystem;

impl MulticoreSystem {
    pub fn builder(config: OsConfig) -> MulticoreSystemBuilder {
        let cores = usize::from(config.cores);
        MulticoreSystemBuilder {
            config: Arc::new(config),
            setups: (0..cores).map(|_| None).collect(),
            ticks: Vec::new(),
            reply_timeout: None,
            idle_park: DEFAULT_IDLE_PARK,
            trace: None,
        }
    }
}

struct Shared {
    link: Arc<Interconnect>,
    stop: AtomicBool,
    /// Cores whose kernel is still running.
    running: AtomicUsize,
    started: Barrier,
}

impl Shared {
    fn finished(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.running.load(Ordering::Acquire) == 0
    }
}

struct CoreThread {
    kernel: CoreKernel,
    router: Arc<CoreRouter>,
    parker: Parker,
    ticks: Vec<(CounterId, Duration)>,
    idle_park: Duration,
}

impl CoreThread {
    fn run(mut self, shared: &Shared) -> CoreReport {
        let core = self.kernel.core();
        if let Err(err) = self.kernel.start() {
            log::error!("{core}: start failed: {err}");
        }
        shared.started.wait();
        log::info!("{core} has entered its event loop");

        let started = Instant::now();
        let mut due: Vec<Instant> = self
            .ticks
            .iter()
            .map(|&(_, period)| started + period)
            .collect();
        let mut counted = true;

        loop {
            if counted && !self.kernel.is_running() {
                counted = false;
                if shared.running.fetch_sub(1, Ordering::AcqRel) == 1 {
                    log::info!("all cores have stopped");
                    shared.link.close();
                }
            }
            let handled = self.router.receive(&mut self.kernel);
            if shared.finished() && self.router.pending() == 0 {
                break;
            }

            let now = Instant::now();
            for (&(counter, period), next) in self.ticks.iter().zip(due.iter_mut()) {
                while *next <= now {
                    *next += period;
                    if self.kernel.is_running() {
                        if let Err(err) = self.kernel.tick(counter) {
                            log::warn!("{core}: tick of {counter} failed: {err}");
                        }
                    }
                }
            }

            match self.kernel.run_once() {
                Step::Ran(_) => continue,
                _ if handled > 0 => continue,
                _ => {}
            }
            let park = due
                .iter()
                .map(|next| next.saturating_duration_since(Instant::now()))
                .fold(self.idle_park, Duration::min);
            self.parker.park_timeout(park);
        }

        log::info!("{core} left its event loop in {:?}", self.kernel.phase());
        CoreReport {
            core,
            phase: self.kernel.phase(),
            stats: self.kernel.stats(),
            errors: self.kernel.error_count(),
            last_error: self.kernel.get_error_info().map(|info| info.error),
            messages: self.router.stats(),
        }
    }
}

/// State of a core when its thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreReport {
    pub core: CoreId,
    pub phase: CorePhase,
    pub stats: KernelStats,
    pub errors: u64,
    pub last_error: Option<OsError>,
    pub messages: RouterStats,
}

/// Control of a started system.
pub struct SystemHandle {
    shared: Arc<Shared>,
    routers: Vec<Arc<CoreRouter>>,
    threads: Vec<(CoreId, JoinHandle<CoreReport>)>,
}

impl SystemHandle {
    /// Cores whose kernel is still running.
    pub fn running_cores(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn router(&self, core: CoreId) -> Option<&Arc<CoreRouter>> {
        self.routers.get(usize::from(core.raw()))
    }

    /// Waits until every core has stopped on its own. Returns `false` when
    /// `timeout` passed first.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.running_cores() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Makes every core leave its event loop, running or not.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.link.close();
    }

    /// Waits for every core thread and collects the reports.
    pub fn join(self) -> Result<Vec<CoreReport>, XcoreError> {
        let mut reports = Vec::with_capacity(self.threads.len());
        for (core, thread) in self.threads {
            let report = thread
                .join()
                .map_err(|_| XcoreError::ThreadPanicked(core))?;
            reports.push(report);
        }
        Ok(reports)
    }

    pub fn stop_and_join(self) -> Result<Vec<CoreReport>, XcoreError> {
        self.stop();
        self.join()
    }
}
