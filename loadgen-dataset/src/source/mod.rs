//! Object-storage locations a dataset can be fetched from.

use std::fmt;

use bytes::Bytes;

use crate::error::Result;

mod gcs;
mod in_memory;
mod local_fs;

pub use gcs::Gcs;
pub use in_memory::InMemory;
pub use local_fs::LocalFs;

/// A type-erased [`Source`].
pub type BoxedSource = Box<dyn Source>;

/// A location holding a newline-delimited JSON document.
#[async_trait::async_trait]
pub trait Source: fmt::Debug + Send + Sync + 'static {
    /// The source name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Downloads the full document.
    async fn fetch(&self) -> Result<Bytes>;
}
