#![forbid(unsafe_code)]

//! Shared pieces of the two `tube-catalog` binaries: `catalog_sync` fills a
//! spreadsheet-backed list of long-form channel videos, and `sampler` picks
//! a random handful of them to download.

pub mod catalog;
pub mod channels;
pub mod config;
pub mod discovery;
pub mod error;
pub mod platform;
pub mod resolver;
pub mod sampler;
pub mod security;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use error::CatalogError;

/// Installs the fmt subscriber used by both binaries. `RUST_LOG` overrides
/// the default `info` level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
