//! A synthetic load generator for ingestion services.
//!
//! The load generator loads a batch of JSON records from object storage once at startup, see
//! [`loadgen_dataset`], and then continuously posts randomized batches of those records to a
//! fixed set of endpoints from a pool of concurrent workers.
//!
//! - The [`Sampler`](sampler::Sampler) draws 5 to 10 distinct records per request.
//! - The [`EndpointSelector`](endpoints::EndpointSelector) sends 80% of the requests to the
//!   primary endpoint and spreads the rest evenly over the others.
//! - The [`Dispatcher`](dispatcher::Dispatcher) runs the workers and a reporter logging the
//!   attempted requests per second.
//! - [`shutdown`] turns termination signals into a cancellation observed by all workers.
//!
//! Failed requests are logged and dropped. Nothing is retried.
#![warn(missing_debug_implementations)]

pub mod app;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod endpoints;
pub mod http;
pub mod observability;
pub mod sampler;
pub mod shutdown;
pub mod throughput;
