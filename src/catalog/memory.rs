use super::{CatalogRow, CatalogStore};
use anyhow::{Result, bail};
use parking_lot::Mutex;

/// In-process catalog. Backs tests and local experiments without touching
/// the spreadsheet.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    rows: Mutex<Vec<CatalogRow>>,
    reject_appends_for: Mutex<Option<String>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<CatalogRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    /// Makes every append of `url` fail, to simulate a rejected remote write.
    pub fn reject_appends_for(&self, url: impl Into<String>) {
        *self.reject_appends_for.lock() = Some(url.into());
    }

    pub fn snapshot(&self) -> Vec<CatalogRow> {
        self.rows.lock().clone()
    }
}

impl CatalogStore for MemoryCatalog {
    fn list_rows(&self) -> Result<Vec<CatalogRow>> {
        Ok(self.snapshot())
    }

    fn append_row(&self, row: &CatalogRow) -> Result<()> {
        if self.reject_appends_for.lock().as_deref() == Some(row.url.as_str()) {
            bail!("append rejected for {}", row.url);
        }
        self.rows.lock().push(row.clone());
        Ok(())
    }
}
