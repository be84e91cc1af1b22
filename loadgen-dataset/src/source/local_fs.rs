use std::path::PathBuf;

use bytes::Bytes;

use crate::error::{DatasetError, Result};
use crate::source::Source;

/// A dataset file on the local filesystem.
///
/// Suitable for development and tests.
#[derive(Debug)]
pub struct LocalFs {
    path: PathBuf,
}

impl LocalFs {
    /// Creates a source reading the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Source for LocalFs {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn fetch(&self) -> Result<Bytes> {
        let contents = tokio::fs::read(&self.path)
            .await
            .map_err(|source| DatasetError::Io {
                path: self.path.clone(),
                source,
            })?;

        Ok(contents.into())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn reads_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"a\":1}\n").unwrap();

        let source = LocalFs::new(file.path());
        let data = source.fetch().await.unwrap();

        assert_eq!(data.as_ref(), b"{\"a\":1}\n");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.jsonl");

        let err = LocalFs::new(&path).fetch().await.unwrap_err();

        let DatasetError::Io { path: failed, .. } = err else {
            panic!("expected io error, got {err:?}");
        };
        assert_eq!(failed, path);
    }
}
