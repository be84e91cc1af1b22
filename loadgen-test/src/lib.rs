//! Test utilities for the load generator.
//!
//! This crate provides utilities to facilitate testing of the load generator and its dataset
//! loader. See the modules for all available utilities.

pub mod target;
pub mod tracing;
