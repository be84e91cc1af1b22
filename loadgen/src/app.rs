//! Wiring of dataset, dispatcher and shutdown.

use anyhow::{Context, Result};
use loadgen_dataset::BoxedSource;
use loadgen_dataset::source::{Gcs, LocalFs};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Dataset};
use crate::dispatcher::{Dispatcher, Summary};
use crate::endpoints::EndpointSelector;
use crate::http::TargetClient;
use crate::sampler::Sampler;
use crate::shutdown;

/// Runs the load generator until a termination signal has been received and all workers drained.
///
/// Returns early with an error if startup fails, for instance because the dataset cannot be
/// loaded. In that case no request has been sent.
pub async fn run(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown::propagate(cancel.clone()));

    let mut generator = tokio::spawn(generate(config, cancel));
    tokio::select! {
        result = &mut generator => {
            // only startup failures end the generator without a signal
            result??;
            return Ok(());
        }
        _ = shutdown::on_signal() => {}
    }

    generator.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Loads the dataset and generates load until `cancel` fires.
pub async fn generate(config: Config, cancel: CancellationToken) -> Result<Summary> {
    let endpoints = config.endpoint_urls()?;
    let selector = EndpointSelector::new(endpoints, config.primary_weight)?;
    let sampler = Sampler::new(config.batch_size)?;
    let client = TargetClient::new(selector.endpoints(), &config.request)
        .context("failed to create HTTP client")?;

    let load = async {
        let source = dataset_source(&config.dataset)
            .await
            .context("failed to access data file")?;
        loadgen_dataset::load(&*source)
            .await
            .context("cannot read data file")
    };
    let records = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::info!("shutdown requested while loading data file");
            return Ok(Summary::default());
        }
        records = load => records?,
    };

    let dispatcher = Dispatcher::builder(records, selector, client)
        .workers(config.workers)
        .sampler(sampler)
        .report_interval(config.report_interval)
        .seed(config.seed)
        .drain_timeout(config.shutdown.drain_timeout)
        .build();
    let summary = dispatcher.run(cancel).await;

    tracing::info!(
        attempts = summary.attempts,
        "Finished generating load. Shutting down."
    );
    Ok(summary)
}

async fn dataset_source(dataset: &Dataset) -> loadgen_dataset::Result<BoxedSource> {
    Ok(match dataset {
        Dataset::Gcs {
            endpoint: Some(endpoint),
            bucket,
            object,
        } => Box::new(Gcs::with_endpoint(endpoint, bucket, object)?),
        Dataset::Gcs {
            endpoint: None,
            bucket,
            object,
        } => Box::new(Gcs::new(bucket, object).await?),
        Dataset::FileSystem { path } => Box::new(LocalFs::new(path)),
    })
}
