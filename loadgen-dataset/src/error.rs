use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Obtaining credentials for object storage failed.
    #[error("authentication error: {0}")]
    Auth(#[from] gcp_auth::Error),

    /// The request to object storage failed.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The object storage endpoint is not a valid base URL.
    #[error("invalid object storage endpoint `{endpoint}`: {source}")]
    InvalidEndpoint {
        /// The configured endpoint.
        endpoint: String,
        /// The parse failure.
        #[source]
        source: url::ParseError,
    },

    /// Object storage answered with a non-success status.
    #[error("failed to fetch `{url}`: status {status}")]
    Status {
        /// The URL of the object.
        url: String,
        /// The status returned by object storage.
        status: reqwest::StatusCode,
    },

    /// Reading a local dataset file failed.
    #[error("failed to read `{}`: {source}", path.display())]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A line of the document is not valid JSON.
    #[error("invalid JSONL entry on line {line}: {source}")]
    InvalidRecord {
        /// The 1-based line number.
        line: usize,
        /// The parser error.
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for dataset operations.
pub type Result<T, E = DatasetError> = std::result::Result<T, E>;
