//! The dataset loader for the load generator.
//!
//! A dataset is a newline-delimited JSON document stored in object storage. It is fetched once at
//! startup through a [`Source`], and parsed into a [`RecordSet`] of opaque records which are then
//! shared read-only by all workers.
//!
//! Every error in this crate is considered fatal by the caller: a load generator without its
//! dataset has nothing to send.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod error;
mod records;
pub mod source;

pub use error::{DatasetError, Result};
pub use records::{Record, RecordSet};
pub use source::{BoxedSource, Source};

/// Fetches the dataset from `source` and parses it into a [`RecordSet`].
pub async fn load(source: &dyn Source) -> Result<RecordSet> {
    tracing::info!(source = source.name(), "downloading data file");
    let data = source.fetch().await?;

    tracing::info!(bytes = data.len(), "parsing data file");
    let records = RecordSet::parse_jsonl(&data)?;

    tracing::info!(records = records.len(), "data file loaded");
    Ok(records)
}
