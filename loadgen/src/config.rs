//! Configuration for the load generator.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. The `NUM_WORKERS` environment variable (worker count only)
//! 2. Environment variables (prefixed with `LG__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `LG__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `LG__WORKERS=20` sets the number of concurrent workers
//! - `LG__DATASET__TYPE=filesystem` sets the dataset location type
//! - `LG__DATASET__PATH=/data/data.jsonl` sets the dataset file
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! workers: 20
//!
//! dataset:
//!   type: filesystem
//!   path: /data/data.jsonl
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "LG__";

/// Plain environment variable overriding [`Config::workers`].
const WORKERS_ENV: &str = "NUM_WORKERS";

/// Base URL of the default ingestion endpoints.
const DEFAULT_ENDPOINT_BASE: &str =
    "http://http-service.default.svc.cluster.local/snowpipe/insert/BENTHOS_DB/PUBLIC";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Errors detected while validating a [`Config`].
///
/// All of these are fatal at startup, before any worker is spawned.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Fewer than two endpoints are configured.
    #[error("at least 2 endpoints are required (one primary, one or more secondary), got {0}")]
    TooFewEndpoints(usize),

    /// An endpoint is not a valid URL.
    #[error("invalid endpoint `{endpoint}`: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    /// An endpoint uses a scheme other than `http` or `https`.
    #[error("endpoint `{0}` must use http or https")]
    UnsupportedScheme(String),

    /// The worker count is zero.
    #[error("worker count must be greater than zero")]
    NoWorkers,

    /// The batch size range is empty or starts at zero.
    #[error("invalid batch size range {min}..={max}")]
    InvalidBatchSize { min: usize, max: usize },

    /// The primary endpoint weight is not a probability.
    #[error("primary endpoint weight must be within [0, 1], got {0}")]
    InvalidPrimaryWeight(f64),

    /// The report interval is zero.
    #[error("report interval must be greater than zero")]
    ZeroReportInterval,

    /// The per-host connection limit is zero.
    #[error("max connections per host must be greater than zero")]
    NoConnections,
}

/// Location of the newline-delimited JSON dataset.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
///
/// Used in: [`Config::dataset`]
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Dataset {
    /// [Google Cloud Storage] object (type `"gcs"`).
    ///
    /// Authentication uses Application Default Credentials (ADC), which can be provided via the
    /// `GOOGLE_APPLICATION_CREDENTIALS` environment variable or GCE/GKE metadata service.
    ///
    /// [Google Cloud Storage]: https://cloud.google.com/storage
    ///
    /// # Example
    ///
    /// ```yaml
    /// dataset:
    ///   type: gcs
    ///   bucket: my-bucket
    ///   object: data.jsonl
    /// ```
    Gcs {
        /// Optional custom GCS endpoint URL.
        ///
        /// Useful for testing with emulators. Requests to a custom endpoint are not
        /// authenticated.
        ///
        /// # Environment Variables
        ///
        /// - `LG__DATASET__ENDPOINT=http://localhost:4443`
        #[serde(default)]
        endpoint: Option<String>,

        /// GCS bucket name.
        ///
        /// # Environment Variables
        ///
        /// - `LG__DATASET__BUCKET=my-bucket`
        bucket: String,

        /// Object name within the bucket.
        ///
        /// # Environment Variables
        ///
        /// - `LG__DATASET__OBJECT=data.jsonl`
        object: String,
    },

    /// Local file (type `"filesystem"`).
    ///
    /// Suitable for development and tests.
    ///
    /// # Environment Variables
    ///
    /// - `LG__DATASET__TYPE=filesystem`
    /// - `LG__DATASET__PATH=/path/to/data.jsonl`
    FileSystem {
        /// Path of the dataset file.
        path: PathBuf,
    },
}

/// Bounds of the number of records sent per request, inclusive on both ends.
///
/// Used in: [`Config::batch_size`]
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BatchSize {
    /// Smallest batch. Defaults to `5`.
    pub min: usize,
    /// Largest batch. Defaults to `10`.
    pub max: usize,
}

impl Default for BatchSize {
    fn default() -> Self {
        Self { min: 5, max: 10 }
    }
}

/// Settings of the outgoing HTTP requests.
///
/// Used in: [`Config::request`]
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Request {
    /// Total timeout of a single request, including draining the response.
    ///
    /// # Default
    ///
    /// `10s`
    ///
    /// # Environment Variable
    ///
    /// `LG__REQUEST__TIMEOUT`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum number of concurrent connections to a single host.
    ///
    /// Connections are never reused, so this bounds the number of requests in flight per host.
    ///
    /// # Default
    ///
    /// `100`
    ///
    /// # Environment Variable
    ///
    /// `LG__REQUEST__MAX_CONNECTIONS_PER_HOST`
    pub max_connections_per_host: usize,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_connections_per_host: 100,
        }
    }
}

/// Shutdown behavior.
///
/// Used in: [`Config::shutdown`]
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Shutdown {
    /// How long to wait for workers after shutdown was requested before aborting them.
    ///
    /// # Default
    ///
    /// `None` (wait until every worker has exited on its own)
    ///
    /// # Environment Variable
    ///
    /// `LG__SHUTDOWN__DRAIN_TIMEOUT`
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Option<Duration>,
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the runtime.
    ///
    /// Workers are async tasks multiplexed onto these threads; this does not need to match
    /// [`Config::workers`].
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `LG__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// [Sentry](https://sentry.io/) error tracking configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Environment Variable
    ///
    /// `LG__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name for this deployment.
    ///
    /// # Environment Variable
    ///
    /// `LG__SENTRY__ENVIRONMENT`
    pub environment: Option<Cow<'static, str>>,

    /// Server name or identifier, usually the pod name.
    ///
    /// # Environment Variable
    ///
    /// `LG__SENTRY__SERVER_NAME`
    pub server_name: Option<Cow<'static, str>>,

    /// Error event sample rate. Defaults to `1.0`.
    pub sample_rate: f32,

    /// Performance trace sample rate. Defaults to `0.01`.
    pub traces_sample_rate: f32,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            server_name: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z INFO loadgen::throughput: QPS: 1234.50/s
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable takes precedence if set.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `LG__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`].
    ///
    /// # Environment Variable
    ///
    /// `LG__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Metrics configuration.
///
/// Configures submission of internal metrics to Datadog.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// Datadog API key for metrics.
    ///
    /// # Default
    ///
    /// `None` (Datadog metrics disabled)
    ///
    /// # Environment Variable
    ///
    /// `LG__METRICS__DATADOG_KEY`
    pub datadog_key: Option<SecretBox<ConfigSecret>>,

    /// Global tags applied to all metrics.
    ///
    /// # Environment Variables
    ///
    /// Each tag is set individually:
    /// - `LG__METRICS__TAGS__FOO=foo`
    pub tags: BTreeMap<String, String>,
}

/// Main configuration struct for the load generator.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of concurrent workers issuing requests.
    ///
    /// # Default
    ///
    /// `10`
    ///
    /// # Environment Variables
    ///
    /// `NUM_WORKERS` or `LG__WORKERS`. `NUM_WORKERS` wins if it holds a positive integer and is
    /// ignored otherwise.
    pub workers: usize,

    /// Target endpoints. The first one is the primary endpoint.
    ///
    /// # Default
    ///
    /// Ten ingestion endpoints, `TABLE_A` through `TABLE_J`.
    pub endpoints: Vec<String>,

    /// Probability of sending a request to the primary endpoint.
    ///
    /// The remaining requests are spread uniformly over the other endpoints.
    ///
    /// # Default
    ///
    /// `0.8`
    pub primary_weight: f64,

    /// Number of records per request.
    pub batch_size: BatchSize,

    /// Interval of the throughput report.
    ///
    /// # Default
    ///
    /// `30s`
    ///
    /// # Environment Variable
    ///
    /// `LG__REPORT_INTERVAL`
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Seed for the workers' random number generators.
    ///
    /// Worker `n` is seeded with `seed + n`. When unset, every worker is seeded randomly.
    pub seed: Option<u64>,

    /// Location of the dataset.
    pub dataset: Dataset,

    /// Outgoing request settings.
    pub request: Request,

    /// Shutdown settings.
    pub shutdown: Shutdown,

    /// Async runtime settings.
    pub runtime: Runtime,

    /// Logging settings.
    pub logging: Logging,

    /// Sentry settings.
    pub sentry: Sentry,

    /// Metrics settings.
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 10,
            endpoints: ('A'..='J')
                .map(|table| format!("{DEFAULT_ENDPOINT_BASE}/TABLE_{table}"))
                .collect(),
            primary_weight: 0.8,
            batch_size: BatchSize::default(),
            report_interval: Duration::from_secs(30),
            seed: None,

            dataset: Dataset::Gcs {
                endpoint: None,
                bucket: "rp-byoc-tyler-k8s-serving".into(),
                object: "data.jsonl".into(),
            },

            request: Request::default(),
            shutdown: Shutdown::default(),
            runtime: Runtime::default(),
            logging: Logging::default(),
            sentry: Sentry::default(),
            metrics: Metrics::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `LG__`)
    /// 4. `NUM_WORKERS`
    ///
    /// This does not validate the result, see [`Config::validate`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let mut config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        if let Some(workers) = workers_from_env() {
            config.workers = workers;
        }

        Ok(config)
    }

    /// Checks all invariants the load generator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        self.endpoint_urls()?;

        if !(0.0..=1.0).contains(&self.primary_weight) {
            return Err(ConfigError::InvalidPrimaryWeight(self.primary_weight));
        }

        let BatchSize { min, max } = self.batch_size;
        if min == 0 || min > max {
            return Err(ConfigError::InvalidBatchSize { min, max });
        }

        if self.report_interval.is_zero() {
            return Err(ConfigError::ZeroReportInterval);
        }

        if self.request.max_connections_per_host == 0 {
            return Err(ConfigError::NoConnections);
        }

        Ok(())
    }

    /// Parses the configured endpoints.
    pub fn endpoint_urls(&self) -> Result<Vec<Url>, ConfigError> {
        if self.endpoints.len() < 2 {
            return Err(ConfigError::TooFewEndpoints(self.endpoints.len()));
        }

        self.endpoints
            .iter()
            .map(|endpoint| {
                let url = Url::parse(endpoint).map_err(|source| ConfigError::InvalidEndpoint {
                    endpoint: endpoint.clone(),
                    source,
                })?;
                match url.scheme() {
                    "http" | "https" => Ok(url),
                    _ => Err(ConfigError::UnsupportedScheme(endpoint.clone())),
                }
            })
            .collect()
    }
}

/// Reads the worker count from `NUM_WORKERS`, ignoring unset, unparsable and zero values.
fn workers_from_env() -> Option<usize> {
    let value = env::var(WORKERS_ENV).ok()?;
    value.trim().parse().ok().filter(|workers| *workers > 0)
}
