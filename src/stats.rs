//! Periodic stream statistics logging.
//!
//! Purely observational: the stats task derives rolling message rates from
//! counters the sinker bumps on every message and logs them on a fixed
//! cadence. It never influences the connection loop.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cursor::BlockRef;

/// Windowed rolling average over the last `entry_count` samples.
pub(crate) struct RollingAverage {
    entries: VecDeque<i64>,
    sum: i64,
    entry_count: usize,
    average: f64,
}

impl RollingAverage {
    pub fn new(entry_count: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(entry_count),
            sum: 0,
            entry_count,
            average: 0.0,
        }
    }

    pub fn add(&mut self, value: i64) {
        self.entries.push_back(value);
        self.sum += value;

        if self.entries.len() == self.entry_count + 1 {
            if let Some(first) = self.entries.pop_front() {
                self.sum -= first;
            }
        }

        self.average = self.sum as f64 / self.entries.len() as f64;
    }

    pub fn average(&self) -> f64 {
        self.average
    }
}

/// Per-second message rate over 1 s and 30 s windows, fed with cumulative
/// totals sampled once per second.
struct RateWindow {
    totals: VecDeque<u64>,
}

const RATE_WINDOW_SECS: usize = 30;

impl RateWindow {
    fn new() -> Self {
        let mut totals = VecDeque::with_capacity(RATE_WINDOW_SECS + 1);
        totals.push_back(0);
        Self { totals }
    }

    fn observe(&mut self, total: u64) {
        self.totals.push_back(total);
        if self.totals.len() > RATE_WINDOW_SECS + 1 {
            self.totals.pop_front();
        }
    }

    fn rates(&self) -> Rates {
        let newest = *self.totals.back().unwrap_or(&0);
        let previous = if self.totals.len() >= 2 {
            self.totals[self.totals.len() - 2]
        } else {
            0
        };
        let oldest = *self.totals.front().unwrap_or(&0);
        let span = (self.totals.len().saturating_sub(1)).max(1) as f64;

        Rates {
            one_sec: newest.saturating_sub(previous),
            window: newest.saturating_sub(oldest) as f64 / span,
        }
    }
}

struct Rates {
    one_sec: u64,
    window: f64,
}

impl fmt::Display for Rates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} msg/s (1s), {:.2} msg/s (30s)",
            self.one_sec, self.window
        )
    }
}

struct StatsInner {
    data_msg_count: AtomicU64,
    undo_msg_count: AtomicU64,
    last_block: Mutex<Option<BlockRef>>,
    block_processing_time: Option<Mutex<RollingAverage>>,
    blocks_per_second: Option<Mutex<RollingAverage>>,
}

#[derive(Clone)]
pub(crate) struct Stats {
    inner: Arc<StatsInner>,
}

impl Stats {
    pub fn new(average_block_processing_time: bool, average_blocks_per_second: bool) -> Self {
        Self {
            inner: Arc::new(StatsInner {
                data_msg_count: AtomicU64::new(0),
                undo_msg_count: AtomicU64::new(0),
                last_block: Mutex::new(None),
                block_processing_time: average_block_processing_time
                    .then(|| Mutex::new(RollingAverage::new(100))),
                blocks_per_second: average_blocks_per_second
                    .then(|| Mutex::new(RollingAverage::new(100))),
            }),
        }
    }

    pub fn record_block(&self, block: BlockRef) {
        if let Ok(mut last_block) = self.inner.last_block.lock() {
            *last_block = Some(block);
        }
    }

    pub fn record_data_message(&self) {
        self.inner.data_msg_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_undo_message(&self) {
        self.inner.undo_msg_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_processing_time(&self, elapsed: Duration) {
        if let Some(average) = &self.inner.block_processing_time {
            if let Ok(mut average) = average.lock() {
                average.add(elapsed.as_micros().min(i64::MAX as u128) as i64);
            }
        }
    }

    /// Spawns the companion logging task. It samples counters every second
    /// and emits a stats line every `log_each`; on cancellation it logs one
    /// final line before exiting so the last state is always flushed.
    pub fn start(&self, log_each: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let stats = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut data_rate = RateWindow::new();
            let mut undo_rate = RateWindow::new();
            let mut previous_data_total = 0u64;
            let mut seconds_since_log = 0u64;
            let log_each_secs = log_each.as_secs().max(1);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = shutdown.cancelled() => {
                        stats.log_now(&data_rate, &undo_rate);
                        return;
                    }
                }

                let data_total = stats.inner.data_msg_count.load(Ordering::Relaxed);
                data_rate.observe(data_total);
                undo_rate.observe(stats.inner.undo_msg_count.load(Ordering::Relaxed));

                if let Some(average) = &stats.inner.blocks_per_second {
                    if let Ok(mut average) = average.lock() {
                        average.add(data_total.saturating_sub(previous_data_total) as i64);
                    }
                }
                previous_data_total = data_total;

                seconds_since_log += 1;
                if seconds_since_log >= log_each_secs {
                    seconds_since_log = 0;
                    stats.log_now(&data_rate, &undo_rate);
                }
            }
        })
    }

    fn log_now(&self, data_rate: &RateWindow, undo_rate: &RateWindow) {
        let last_block = self
            .inner
            .last_block
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .map_or_else(|| "None".to_string(), |block| block.to_string());

        let block_processing_time_us = self
            .inner
            .block_processing_time
            .as_ref()
            .and_then(|average| average.lock().ok().map(|average| average.average()));
        let blocks_per_second = self
            .inner
            .blocks_per_second
            .as_ref()
            .and_then(|average| average.lock().ok().map(|average| average.average()));

        // Field order is kept stable so development logs render consistently.
        info!(
            data_msg_rate = %data_rate.rates(),
            undo_msg_rate = %undo_rate.rates(),
            block_processing_time_us,
            blocks_per_second,
            last_block = %last_block,
            "substreams stream stats"
        );
    }
}
