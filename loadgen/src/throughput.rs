//! Accounting of attempted requests and the periodic throughput report.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Counts request attempts across all workers.
///
/// Workers [`record`](Self::record) every attempt. The reporter [`take`](Self::take)s the count
/// since the previous report, which atomically resets it, so no attempt is lost between reading
/// and resetting.
#[derive(Debug, Default)]
pub struct ThroughputCounter {
    pending: AtomicU64,
    total: AtomicU64,
}

impl ThroughputCounter {
    /// Records one attempt.
    pub fn record(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the attempts since the last call and resets them to zero.
    pub fn take(&self) -> u64 {
        self.pending.swap(0, Ordering::Relaxed)
    }

    /// Attempts recorded over the lifetime of the counter.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Periodically logs the attempted requests per second.
#[derive(Debug)]
pub struct Reporter {
    counter: Arc<ThroughputCounter>,
    interval: Duration,
}

impl Reporter {
    /// Creates a reporter for `counter` ticking every `interval`.
    pub fn new(counter: Arc<ThroughputCounter>, interval: Duration) -> Self {
        Self { counter, interval }
    }

    /// Takes the pending count and reports it as requests per second over one interval.
    pub fn report(&self) -> f64 {
        let count = self.counter.take();
        let rate = count as f64 / self.interval.as_secs_f64();

        tracing::info!(count, "QPS: {rate:.2}/s");
        merni::gauge!("throughput.attempts": count);

        rate
    }

    /// Reports once per interval until `cancel` fires.
    ///
    /// The first report happens one full interval after start. Returns the number of reports.
    pub async fn run(self, cancel: CancellationToken) -> usize {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut reports = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.report();
            reports += 1;
        }

        tracing::debug!(reports, "reporter exiting");
        reports
    }
}
