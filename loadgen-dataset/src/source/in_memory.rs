use bytes::Bytes;

use crate::error::Result;
use crate::source::Source;

/// A dataset held in memory.
#[derive(Debug, Clone)]
pub struct InMemory {
    data: Bytes,
}

impl InMemory {
    /// Creates a source serving `data`.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait::async_trait]
impl Source for InMemory {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn fetch(&self) -> Result<Bytes> {
        Ok(self.data.clone())
    }
}
