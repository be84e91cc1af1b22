use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gcp_auth::TokenProvider;
use url::Url;

use crate::error::{DatasetError, Result};
use crate::source::Source;

/// The public endpoint of Google Cloud Storage.
const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// OAuth scope required to read objects.
const READ_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";

/// Upper bound for downloading the whole object.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A single object in [Google Cloud Storage].
///
/// Authentication uses Application Default Credentials. When an explicit endpoint is given, for
/// instance an emulator, requests are sent unauthenticated.
///
/// [Google Cloud Storage]: https://cloud.google.com/storage
pub struct Gcs {
    client: reqwest::Client,
    token_provider: Option<Arc<dyn TokenProvider>>,
    endpoint: Url,
    timeout: Duration,
    bucket: String,
    object: String,
}

impl Gcs {
    /// Creates a source for `object` in `bucket`, resolving default credentials.
    pub async fn new(bucket: &str, object: &str) -> Result<Self> {
        let token_provider = gcp_auth::provider().await?;
        let mut gcs = Self::with_endpoint(DEFAULT_ENDPOINT, bucket, object)?;
        gcs.token_provider = Some(token_provider);
        Ok(gcs)
    }

    /// Creates a source against a custom endpoint without authentication.
    pub fn with_endpoint(endpoint: &str, bucket: &str, object: &str) -> Result<Self> {
        let invalid = |source| DatasetError::InvalidEndpoint {
            endpoint: endpoint.into(),
            source,
        };
        let endpoint = Url::parse(endpoint).map_err(invalid)?;
        if endpoint.cannot_be_a_base() {
            return Err(invalid(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            token_provider: None,
            endpoint,
            timeout: DEFAULT_TIMEOUT,
            bucket: bucket.into(),
            object: object.into(),
        })
    }

    /// Bounds the time to download the object. Defaults to five minutes.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bucket and object are appended as single, percent-encoded path segments.
    fn object_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&self.bucket)
                .push(&self.object);
        }
        url
    }
}

impl fmt::Debug for Gcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gcs")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Source for Gcs {
    fn name(&self) -> &'static str {
        "gcs"
    }

    #[tracing::instrument(level = "debug", skip_all, fields(bucket = %self.bucket, object = %self.object))]
    async fn fetch(&self) -> Result<Bytes> {
        let url = self.object_url();

        let mut builder = self.client.get(url.clone()).timeout(self.timeout);
        if let Some(provider) = &self.token_provider {
            let token = provider.token(&[READ_SCOPE]).await?;
            builder = builder.bearer_auth(token.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::Status {
                url: url.into(),
                status,
            });
        }

        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use loadgen_test::target::TestTarget;

    use super::*;

    #[tokio::test]
    async fn fetches_object_from_endpoint() {
        loadgen_test::tracing::init();
        let server = TestTarget::builder()
            .object("datasets/data.jsonl", "{\"a\":1}\n{\"a\":2}\n")
            .start()
            .await;

        let gcs = Gcs::with_endpoint(&server.url("/"), "datasets", "data.jsonl").unwrap();
        let data = gcs.fetch().await.unwrap();

        assert_eq!(data.as_ref(), b"{\"a\":1}\n{\"a\":2}\n");
    }

    #[tokio::test]
    async fn missing_object_is_an_error() {
        let server = TestTarget::builder().start().await;

        let gcs = Gcs::with_endpoint(&server.url("/"), "datasets", "missing.jsonl").unwrap();
        let err = gcs.fetch().await.unwrap_err();

        let DatasetError::Status { url, status } = err else {
            panic!("expected status error, got {err:?}");
        };
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
        assert!(url.ends_with("/datasets/missing.jsonl"));
    }

    #[tokio::test]
    async fn object_names_are_percent_encoded() {
        let server = TestTarget::builder()
            .object("my bucket/daily data#1?.jsonl", "{\"a\":1}\n")
            .start()
            .await;

        let gcs =
            Gcs::with_endpoint(&server.url("/"), "my bucket", "daily data#1?.jsonl").unwrap();
        assert!(
            gcs.object_url()
                .as_str()
                .ends_with("/my%20bucket/daily%20data%231%3F.jsonl")
        );

        let data = gcs.fetch().await.unwrap();
        assert_eq!(data.as_ref(), b"{\"a\":1}\n");
    }

    #[test]
    fn endpoint_path_is_kept() {
        let gcs =
            Gcs::with_endpoint("http://localhost:4443/storage/", "bucket", "a/b.jsonl").unwrap();
        assert_eq!(
            gcs.object_url().as_str(),
            "http://localhost:4443/storage/bucket/a%2Fb.jsonl"
        );
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let err = Gcs::with_endpoint("not a url", "bucket", "data.jsonl").unwrap_err();
        assert!(matches!(err, DatasetError::InvalidEndpoint { .. }), "{err:?}");

        let err =
            Gcs::with_endpoint("mailto:storage@example.com", "bucket", "data.jsonl").unwrap_err();
        assert!(matches!(err, DatasetError::InvalidEndpoint { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn stalled_download_times_out() {
        // accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let gcs = Gcs::with_endpoint(&format!("http://{addr}"), "bucket", "data.jsonl")
            .unwrap()
            .timeout(Duration::from_millis(200));
        let err = gcs.fetch().await.unwrap_err();

        let DatasetError::Request(error) = err else {
            panic!("expected request error, got {err:?}");
        };
        assert!(error.is_timeout());
    }
}
