//! The load generator binary. See [`loadgen`] for an overview.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    loadgen::cli::execute()
}
