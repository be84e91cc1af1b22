//! Sending batches to the target endpoints.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use reqwest::StatusCode;
use reqwest::header::{CONNECTION, HeaderValue};
use serde_json::value::RawValue;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config;

/// The result of a single POST.
///
/// None of these are errors to the caller: a failed attempt is logged and the worker moves on.
#[derive(Debug)]
pub enum PostOutcome {
    /// The target answered with a 2xx status and the body was drained.
    Success,
    /// The target answered with a non-2xx status.
    Status(StatusCode),
    /// The request could not be sent, or timed out.
    Transport(reqwest::Error),
    /// The response body could not be read.
    Body(reqwest::Error),
    /// Shutdown was requested while the request was in flight.
    Cancelled,
}

impl PostOutcome {
    /// Returns `true` for [`PostOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Status(_) => "status",
            Self::Transport(_) => "transport",
            Self::Body(_) => "body",
            Self::Cancelled => "cancelled",
        }
    }

    fn log(&self, endpoint: &Url) {
        match self {
            Self::Success => {}
            Self::Status(status) => {
                tracing::warn!(%endpoint, status = status.as_u16(), "failed status code");
            }
            Self::Transport(error) => {
                tracing::warn!(
                    %endpoint,
                    error = error as &dyn std::error::Error,
                    "failed to post data"
                );
            }
            Self::Body(error) => {
                tracing::warn!(
                    %endpoint,
                    error = error as &dyn std::error::Error,
                    "failed to read response"
                );
            }
            Self::Cancelled => tracing::debug!(%endpoint, "request aborted by shutdown"),
        }
    }
}

/// HTTP client for the target endpoints.
///
/// Every request opens a fresh connection: idle connections are never pooled and each request
/// carries `Connection: close`. Concurrent requests to one host are capped by a semaphore per
/// host.
pub struct TargetClient {
    client: reqwest::Client,
    host_limits: HashMap<String, Arc<Semaphore>>,
}

impl TargetClient {
    /// Creates a client for `endpoints`.
    pub fn new(endpoints: &[Url], config: &config::Request) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(0)
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()?;

        let mut host_limits = HashMap::new();
        for endpoint in endpoints {
            host_limits
                .entry(host_key(endpoint))
                .or_insert_with(|| Arc::new(Semaphore::new(config.max_connections_per_host)));
        }

        Ok(Self {
            client,
            host_limits,
        })
    }

    /// Posts `batch` as a JSON array to `endpoint`.
    ///
    /// The request is abandoned as soon as `cancel` fires. Failures are logged, never retried.
    pub async fn post(
        &self,
        endpoint: &Url,
        batch: &[&RawValue],
        cancel: &CancellationToken,
    ) -> PostOutcome {
        let start = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => PostOutcome::Cancelled,
            outcome = self.exchange(endpoint, batch) => outcome,
        };

        outcome.log(endpoint);
        merni::distribution!(
            "request.latency"@s: start.elapsed(),
            "outcome" => outcome.as_str()
        );
        if !outcome.is_success() {
            merni::counter!("requests.failed": 1, "outcome" => outcome.as_str());
        }

        outcome
    }

    async fn exchange(&self, endpoint: &Url, batch: &[&RawValue]) -> PostOutcome {
        let _permit = match self.host_limits.get(&host_key(endpoint)) {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };

        let request = self
            .client
            .post(endpoint.clone())
            .header(CONNECTION, HeaderValue::from_static("close"))
            .json(batch);

        let mut response = match request.send().await {
            Ok(response) => response,
            Err(error) => return PostOutcome::Transport(error),
        };

        // drain the body before the connection is released
        let status = response.status();
        loop {
            match response.chunk().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(error) => return PostOutcome::Body(error),
            }
        }

        if status.is_success() {
            PostOutcome::Success
        } else {
            PostOutcome::Status(status)
        }
    }
}

impl fmt::Debug for TargetClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetClient")
            .field("hosts", &self.host_limits.keys())
            .finish_non_exhaustive()
    }
}

fn host_key(url: &Url) -> String {
    format!(
        "{}:{}",
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use loadgen_dataset::RecordSet;
    use loadgen_test::target::TestTarget;

    use super::*;

    fn client(endpoints: &[Url]) -> TargetClient {
        let config = config::Request {
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        TargetClient::new(endpoints, &config).unwrap()
    }

    fn batch(records: &RecordSet) -> Vec<&RawValue> {
        records.as_slice().iter().map(|record| &**record).collect()
    }

    #[tokio::test]
    async fn posts_batch_as_json_array() {
        loadgen_test::tracing::init();
        let target = TestTarget::builder().start().await;
        let endpoint = Url::parse(&target.url("/ingest/table_a")).unwrap();
        let records = RecordSet::parse_jsonl(b"{\"a\":1}\n[true]\n\"x\"\n").unwrap();

        let outcome = client(&[endpoint.clone()])
            .post(&endpoint, &batch(&records), &CancellationToken::new())
            .await;

        assert!(outcome.is_success(), "{outcome:?}");
        let received = target.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].path, "ingest/table_a");
        assert_eq!(
            received[0].batch,
            [
                serde_json::json!({"a": 1}),
                serde_json::json!([true]),
                serde_json::json!("x")
            ]
        );
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let target = TestTarget::builder().status(503).start().await;
        let endpoint = Url::parse(&target.url("/ingest")).unwrap();
        let records = RecordSet::parse_jsonl(b"1\n").unwrap();

        let outcome = client(&[endpoint.clone()])
            .post(&endpoint, &batch(&records), &CancellationToken::new())
            .await;

        assert!(
            matches!(outcome, PostOutcome::Status(StatusCode::SERVICE_UNAVAILABLE)),
            "{outcome:?}"
        );
        assert_eq!(target.requests(), 1);
    }

    #[tokio::test]
    async fn unreachable_target_is_a_transport_error() {
        // bind and drop to find a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = Url::parse(&format!("http://127.0.0.1:{port}/ingest")).unwrap();

        let outcome = client(&[endpoint.clone()])
            .post(&endpoint, &[], &CancellationToken::new())
            .await;

        assert!(matches!(outcome, PostOutcome::Transport(_)), "{outcome:?}");
    }

    #[tokio::test]
    async fn slow_request_times_out() {
        let target = TestTarget::builder()
            .delay(Duration::from_secs(30))
            .start()
            .await;
        let endpoint = Url::parse(&target.url("/ingest")).unwrap();
        let config = config::Request {
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let client = TargetClient::new(&[endpoint.clone()], &config).unwrap();

        let outcome = client
            .post(&endpoint, &[], &CancellationToken::new())
            .await;

        let PostOutcome::Transport(error) = outcome else {
            panic!("expected transport error, got {outcome:?}");
        };
        assert!(error.is_timeout());
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_request() {
        let target = TestTarget::builder()
            .delay(Duration::from_secs(30))
            .start()
            .await;
        let endpoint = Url::parse(&target.url("/ingest")).unwrap();
        let client = client(&[endpoint.clone()]);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            })
        };

        let start = Instant::now();
        let outcome = client.post(&endpoint, &[], &cancel).await;

        assert!(matches!(outcome, PostOutcome::Cancelled), "{outcome:?}");
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn limits_are_per_host() {
        let endpoints = [
            Url::parse("http://ingest.local/a").unwrap(),
            Url::parse("http://ingest.local/b").unwrap(),
            Url::parse("http://ingest.local:8080/c").unwrap(),
            Url::parse("https://ingest.local/d").unwrap(),
        ];

        let client = client(&endpoints);

        let mut hosts: Vec<_> = client.host_limits.keys().cloned().collect();
        hosts.sort();
        assert_eq!(
            hosts,
            ["ingest.local:443", "ingest.local:80", "ingest.local:8080"]
        );
    }
}
