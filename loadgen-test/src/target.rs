//! Exposes an in-process HTTP target for use in integration tests.
//!
//! The target accepts JSON array batches on any path via `POST` and records them, and serves
//! static objects via `GET`, which stands in for object storage.
//!
//! ```
//! use loadgen_test::target::TestTarget;
//!
//! #[tokio::main]
//! async fn main() {
//!    let target = TestTarget::builder().start().await;
//!    let url = target.url("/ingest/table_a");
//!    // point the load generator at the URL...
//! }
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::Value;

/// A batch received by the [`TestTarget`], together with the path it was posted to.
#[derive(Clone, Debug, PartialEq)]
pub struct Received {
    /// The request path, without the leading slash.
    pub path: String,
    /// The decoded JSON array.
    pub batch: Vec<Value>,
}

#[derive(Debug)]
struct Shared {
    status: StatusCode,
    delay: Duration,
    objects: HashMap<String, Bytes>,
    requests: AtomicUsize,
    received: Mutex<Vec<Received>>,
}

/// Builder for a [`TestTarget`].
#[derive(Debug)]
pub struct TestTargetBuilder {
    status: StatusCode,
    delay: Duration,
    objects: HashMap<String, Bytes>,
}

impl TestTargetBuilder {
    /// The status code returned for every `POST`. Defaults to `200 OK`.
    pub fn status(mut self, status: u16) -> Self {
        self.status = StatusCode::from_u16(status).unwrap();
        self
    }

    /// Delays every `POST` response by the given duration.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Serves `contents` on `GET /{path}`.
    pub fn object(mut self, path: &str, contents: impl Into<Bytes>) -> Self {
        self.objects
            .insert(path.trim_start_matches('/').into(), contents.into());
        self
    }

    /// Binds to a random port on localhost and starts serving.
    pub async fn start(self) -> TestTarget {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let shared = Arc::new(Shared {
            status: self.status,
            delay: self.delay,
            objects: self.objects,
            requests: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/{*path}", post(ingest).get(object))
            .with_state(Arc::clone(&shared));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        TestTarget {
            handle,
            socket,
            shared,
        }
    }
}

/// An in-process HTTP target listening on a random port on localhost.
#[derive(Debug)]
pub struct TestTarget {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    shared: Arc<Shared>,
}

impl TestTarget {
    /// Returns a builder for a new target.
    pub fn builder() -> TestTargetBuilder {
        TestTargetBuilder {
            status: StatusCode::OK,
            delay: Duration::ZERO,
            objects: HashMap::new(),
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Number of `POST` requests that reached the target, including unparsable ones.
    pub fn requests(&self) -> usize {
        self.shared.requests.load(Ordering::Relaxed)
    }

    /// All batches received so far.
    pub fn received(&self) -> Vec<Received> {
        self.shared.received.lock().unwrap().clone()
    }

    /// Waits until at least `count` requests arrived, or `timeout` elapsed.
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.requests() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl Drop for TestTarget {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn ingest(
    State(shared): State<Arc<Shared>>,
    Path(path): Path<String>,
    body: Bytes,
) -> StatusCode {
    shared.requests.fetch_add(1, Ordering::Relaxed);
    if !shared.delay.is_zero() {
        tokio::time::sleep(shared.delay).await;
    }

    let Ok(Json(batch)) = Json::<Vec<Value>>::from_bytes(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    shared
        .received
        .lock()
        .unwrap()
        .push(Received { path, batch });

    shared.status
}

async fn object(
    State(shared): State<Arc<Shared>>,
    Path(path): Path<String>,
) -> Result<Bytes, StatusCode> {
    shared
        .objects
        .get(&path)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}
