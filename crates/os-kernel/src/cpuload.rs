//! CPU load measurement over a rolling window of fixed intervals.

use std::collections::VecDeque;

use os_core::{CoreId, OsError, OsResult};

use crate::config::CpuLoadConfig;
use crate::error::{Call, ServiceId};
use crate::kernel::{callers, CoreKernel};
use crate::remote::{RemoteReply, RemoteRequest};

/// What `MeasureCpuLoad` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuLoadQuery {
    /// Busy share of the rolling window.
    Current = 0,
    /// Highest busy share of any completed interval since the last reset.
    Peak = 1,
    /// Restarts the measurement and reports 0.
    Reset = 2,
}

impl CpuLoadQuery {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Current),
            1 => Some(Self::Peak),
            2 => Some(Self::Reset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CpuLoad {
    interval_len: u64,
    intervals: usize,
    window: VecDeque<u64>,
    interval_start: u64,
    busy_acc: u64,
    busy_since: Option<u64>,
    peak: u8,
}

fn percent(busy: u64, total: u64) -> u8 {
    if total == 0 {
        0
    } else {
        (u128::from(busy) * 100 / u128::from(total)).min(100) as u8
    }
}

impl CpuLoad {
    pub fn new(config: CpuLoadConfig, now: u64) -> Self {
        Self {
            interval_len: config.interval_len.max(1),
            intervals: config.intervals.max(1),
            window: VecDeque::with_capacity(config.intervals.max(1)),
            interval_start: now,
            busy_acc: 0,
            busy_since: None,
            peak: 0,
        }
    }

    /// Records a busy/idle transition at `now`.
    pub fn set_busy(&mut self, now: u64, busy: bool) {
        self.advance(now);
        match (self.busy_since, busy) {
            (None, true) => self.busy_since = Some(now),
            (Some(since), false) => {
                self.busy_acc += now.saturating_sub(since);
                self.busy_since = None;
            }
            _ => {}
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy_since.is_some()
    }

    /// Busy percentage over the completed intervals of the window plus the
    /// running one.
    pub fn current(&mut self, now: u64) -> u8 {
        self.advance(now);
        let running = self.busy_acc + self.busy_since.map_or(0, |since| now - since);
        let busy: u64 = self.window.iter().sum::<u64>() + running;
        let total = self.window.len() as u64 * self.interval_len + (now - self.interval_start);
        percent(busy, total)
    }

    pub fn peak(&mut self, now: u64) -> u8 {
        self.advance(now);
        self.peak
    }

    pub fn reset(&mut self, now: u64) {
        self.window.clear();
        self.peak = 0;
        self.busy_acc = 0;
        self.interval_start = now;
        self.busy_since = self.busy_since.map(|_| now);
    }

    fn close_interval(&mut self) {
        let end = self.interval_start + self.interval_len;
        if let Some(since) = self.busy_since {
            self.busy_acc += end - since;
            self.busy_since = Some(end);
        }
        let busy = self.busy_acc;
        if self.window.len() == self.intervals {
            self.window.pop_front();
        }
        self.window.push_back(busy);
        self.peak = self.peak.max(percent(busy, self.interval_len));
        self.busy_acc = 0;
        self.interval_start = end;
    }

    fn advance(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.interval_start) / self.interval_len;
        if elapsed == 0 {
            return;
        }
        self.close_interval();
        // Intervals older than the window only matter for the peak, and
        // they all look alike.
        let skip = (elapsed - 1).saturating_sub(self.intervals as u64);
        if skip > 0 {
            self.close_interval();
            self.interval_start += (skip - 1) * self.interval_len;
            if self.busy_since.is_some() {
                self.busy_since = Some(self.interval_start);
            }
        }
        while now >= self.interval_start + self.interval_len {
            self.close_interval();
        }
    }
}

impl CoreKernel {
    /// `MeasureCpuLoad` for `core`.
    pub fn measure_cpu_load(&mut self, core: CoreId, query: CpuLoadQuery) -> OsResult<u8> {
        let call = Call::new(ServiceId::MeasureCpuLoad)
            .arg(core.raw())
            .arg(query as u8);
        self.enter(call, callers::TASK | callers::CAT2 | callers::HOOKS)?;
        if core.raw() >= self.config.cores {
            return self.fail(call, OsError::Id);
        }
        if core != self.core {
            return match self.forward(call, core, RemoteRequest::MeasureCpuLoad { query })? {
                RemoteReply::CpuLoad(load) => Ok(load),
                _ => self.fail(call, OsError::Core),
            };
        }
        let now = self.now();
        let load = match query {
            CpuLoadQuery::Current => self.cpu_load.current(now),
            CpuLoadQuery::Peak => self.cpu_load.peak(now),
            CpuLoadQuery::Reset => {
                self.cpu_load.reset(now);
                0
            }
        };
        Ok(load)
    }
}
