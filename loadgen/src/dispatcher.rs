//! The worker pool generating load.
//!
//! A fixed number of workers run concurrently. Each worker loops on its own: it picks an
//! endpoint, samples a batch and posts it, and counts the attempt regardless of the outcome.
//! There is no shared work queue and no backpressure besides the per-host connection limit.
//!
//! Workers check the cancellation token at the top of every iteration and pass it into the
//! request, so after shutdown was requested every worker finishes at most the request it has in
//! flight, which is itself aborted promptly.

use std::sync::Arc;
use std::time::Duration;

use loadgen_dataset::RecordSet;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::endpoints::EndpointSelector;
use crate::http::TargetClient;
use crate::sampler::Sampler;
use crate::throughput::{Reporter, ThroughputCounter};

/// A builder for creating a [`Dispatcher`].
#[derive(Debug)]
pub struct DispatcherBuilder {
    records: RecordSet,
    selector: EndpointSelector,
    client: TargetClient,

    workers: usize,
    sampler: Sampler,
    report_interval: Duration,
    seed: Option<u64>,
    drain_timeout: Option<Duration>,
}

impl DispatcherBuilder {
    /// The number of concurrent workers.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// How batches are drawn from the records.
    pub fn sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Interval of the throughput report.
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Seeds worker `n` with `seed + n` instead of a random seed.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Aborts workers that are still running this long after cancellation.
    pub fn drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Creates the dispatcher.
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            shared: Arc::new(Shared {
                records: self.records,
                selector: self.selector,
                client: self.client,
                sampler: self.sampler,
                counter: Arc::new(ThroughputCounter::default()),
            }),
            workers: self.workers,
            report_interval: self.report_interval,
            seed: self.seed,
            drain_timeout: self.drain_timeout,
        }
    }
}

/// State shared read-only by all workers.
#[derive(Debug)]
struct Shared {
    records: RecordSet,
    selector: EndpointSelector,
    client: TargetClient,
    sampler: Sampler,
    counter: Arc<ThroughputCounter>,
}

/// Runs the workers and the throughput reporter until cancelled.
#[derive(Debug)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    workers: usize,
    report_interval: Duration,
    seed: Option<u64>,
    drain_timeout: Option<Duration>,
}

/// What happened during a [`Dispatcher::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Requests attempted across all workers.
    pub attempts: u64,
    /// Throughput reports emitted.
    pub reports: usize,
    /// Whether workers had to be aborted after the drain timeout.
    pub aborted: bool,
}

impl Dispatcher {
    /// Constructs a new dispatcher builder with the default settings.
    pub fn builder(
        records: RecordSet,
        selector: EndpointSelector,
        client: TargetClient,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            records,
            selector,
            client,

            workers: 10,
            sampler: Sampler::default(),
            report_interval: Duration::from_secs(30),
            seed: None,
            drain_timeout: None,
        }
    }

    /// Runs all workers until `cancel` fires and every worker has exited.
    pub async fn run(self, cancel: CancellationToken) -> Summary {
        tracing::info!("starting up {} workers to generate load", self.workers);

        let reporter = Reporter::new(self.shared.counter.clone(), self.report_interval);
        let reporter = tokio::spawn(reporter.run(cancel.clone()));

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let rng = match self.seed {
                Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(id as u64)),
                None => SmallRng::seed_from_u64(rand::random()),
            };
            let worker = Worker {
                id,
                shared: Arc::clone(&self.shared),
                rng,
            };
            workers.spawn(worker.run(cancel.clone()));
        }
        merni::gauge!("workers.active": self.workers);

        let drained = async {
            while let Some(result) = workers.join_next().await {
                if let Err(error) = result {
                    tracing::error!(error = &error as &dyn std::error::Error, "worker failed");
                }
            }
        };
        let aborted = match self.drain_timeout {
            None => {
                drained.await;
                false
            }
            Some(timeout) => tokio::select! {
                _ = drained => false,
                _ = drain_deadline(&cancel, timeout) => true,
            },
        };
        if aborted {
            tracing::warn!(
                remaining = workers.len(),
                "workers did not drain in time, aborting"
            );
            workers.shutdown().await;
        }
        merni::gauge!("workers.active": 0);

        let reports = match reporter.await {
            Ok(reports) => reports,
            Err(error) => {
                tracing::error!(error = &error as &dyn std::error::Error, "reporter failed");
                0
            }
        };

        Summary {
            attempts: self.shared.counter.total(),
            reports,
            aborted,
        }
    }
}

async fn drain_deadline(cancel: &CancellationToken, timeout: Duration) {
    cancel.cancelled().await;
    tokio::time::sleep(timeout).await;
}

/// One request-issuing loop.
struct Worker {
    id: usize,
    shared: Arc<Shared>,
    rng: SmallRng,
}

impl Worker {
    async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("worker {} starting", self.id);

        while !cancel.is_cancelled() {
            let endpoint = self.shared.selector.select(&mut self.rng);
            let batch = self
                .shared
                .sampler
                .sample(&self.shared.records, &mut self.rng);
            self.shared.client.post(endpoint, &batch, &cancel).await;

            self.shared.counter.record();
            merni::counter!("requests.attempted": 1);
        }

        tracing::info!("worker {} exiting", self.id);
    }
}
