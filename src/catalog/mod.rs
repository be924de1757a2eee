#![forbid(unsafe_code)]

//! The persistent `(channel, url)` list shared by both entry points.
//!
//! The catalog is append-only from this crate's point of view: there is no
//! update or delete path. Duplicate checks happen in the caller before
//! [`CatalogStore::append_row`] is invoked.

mod auth;
mod memory;
mod sheets;

pub use auth::{ServiceAccountKey, TokenSource};
pub use memory::MemoryCatalog;
pub use sheets::{SHEETS_API_BASE, SheetsCatalog};

use anyhow::Result;
use std::collections::HashSet;

/// Header row seeded into a freshly created worksheet.
pub const HEADER: [&str; 2] = ["Channel", "URL"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub channel_label: String,
    pub url: String,
}

impl CatalogRow {
    pub fn new(channel_label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            channel_label: channel_label.into(),
            url: url.into(),
        }
    }
}

/// Backing store for the catalog. Every call is a blocking remote round trip.
pub trait CatalogStore: Send + Sync {
    /// All data rows in storage order, header excluded.
    fn list_rows(&self) -> Result<Vec<CatalogRow>>;

    /// Appends a single row at the end of the catalog.
    fn append_row(&self, row: &CatalogRow) -> Result<()>;
}

/// Every URL in the catalog regardless of channel. Dedup is global: a URL
/// claimed by one channel is never appended for another.
pub fn known_urls(rows: &[CatalogRow]) -> HashSet<String> {
    rows.iter().map(|row| row.url.clone()).collect()
}

/// URLs recorded for one channel label, in storage order.
pub fn urls_for_channel(rows: &[CatalogRow], channel_label: &str) -> Vec<String> {
    rows.iter()
        .filter(|row| row.channel_label == channel_label)
        .map(|row| row.url.clone())
        .collect()
}
