#![forbid(unsafe_code)]

//! The interactive half: draw a random handful of a channel's known URLs and
//! download them one after another.

use crate::catalog::{CatalogRow, CatalogStore, urls_for_channel};
use crate::error::CatalogError;
use crate::platform::{VideoPlatform, is_web_url};
use anyhow::{Context, Result};
use rand::Rng;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SAMPLE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct Sample {
    pub channel: String,
    pub urls: Vec<String>,
    /// Number of URLs the channel actually has when that is fewer than
    /// requested.
    pub shortfall: Option<usize>,
}

impl Sample {
    /// User-facing notice for a short sample.
    pub fn warning(&self) -> Option<String> {
        match self.shortfall {
            Some(0) => Some(format!("No videos are stored for {} yet.", self.channel)),
            Some(available) => Some(format!(
                "{} only has {available} stored videos; showing all of them.",
                self.channel
            )),
            None => None,
        }
    }
}

/// Picks `size` URLs for `channel_label` uniformly at random without
/// replacement. Fewer than `size` known URLs returns all of them and flags
/// the shortfall.
pub fn sample_rows<R: Rng + ?Sized>(
    rows: &[CatalogRow],
    channel_label: &str,
    size: usize,
    rng: &mut R,
) -> Sample {
    let urls = urls_for_channel(rows, channel_label);
    if urls.len() < size {
        let available = urls.len();
        return Sample {
            channel: channel_label.to_string(),
            urls,
            shortfall: Some(available),
        };
    }

    let picked = rand::seq::index::sample(rng, urls.len(), size)
        .into_iter()
        .map(|index| urls[index].clone())
        .collect();
    Sample {
        channel: channel_label.to_string(),
        urls: picked,
        shortfall: None,
    }
}

/// Loads the current catalog and samples [`SAMPLE_SIZE`] URLs for one channel.
pub fn sample_channel<R: Rng + ?Sized>(
    store: &dyn CatalogStore,
    channel_label: &str,
    rng: &mut R,
) -> Result<Sample> {
    let rows = store.list_rows().context("loading catalog rows")?;
    let sample = sample_rows(&rows, channel_label, SAMPLE_SIZE, rng);
    if let Some(warning) = sample.warning() {
        warn!("{warning}");
    }
    Ok(sample)
}

/// Creates the download folder if needed and returns its absolute path.
pub fn prepare_download_dir(path: &Path) -> Result<PathBuf> {
    fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))?;
    path.canonicalize()
        .with_context(|| format!("resolving {}", path.display()))
}

/// Receives per-item progress from [`download_all`]. Indices are 1-based.
pub trait DownloadProgress {
    fn item_started(&mut self, index: usize, total: usize, url: &str);
    fn item_failed(&mut self, index: usize, url: &str, error: &CatalogError);
    fn item_finished(&mut self, completed: usize, total: usize);
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDownload {
    pub index: usize,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub total: usize,
    /// Items attempted, successful or not.
    pub completed: usize,
    pub failures: Vec<FailedDownload>,
}

impl DownloadReport {
    pub fn succeeded(&self) -> usize {
        self.completed - self.failures.len()
    }
}

/// Downloads `urls` in order into `target_folder`. A failed item is reported
/// and the batch moves on; blank entries are ignored. Entries that are not
/// `http(s)://` URLs fail without reaching the platform.
pub fn download_all(
    platform: &dyn VideoPlatform,
    urls: &[String],
    target_folder: &Path,
    progress: &mut dyn DownloadProgress,
) -> DownloadReport {
    let urls: Vec<&str> = urls
        .iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .collect();
    let mut report = DownloadReport {
        total: urls.len(),
        ..DownloadReport::default()
    };

    for (offset, url) in urls.iter().enumerate() {
        let index = offset + 1;
        info!("Downloading ({index}/{}): {url}", report.total);
        progress.item_started(index, report.total, url);

        let result = if is_web_url(url) {
            platform.download(url, target_folder)
        } else {
            Err(CatalogError::DownloadFailure {
                url: url.to_string(),
                reason: "not an http(s) URL".to_string(),
            })
        };
        if let Err(err) = result {
            warn!("{err}");
            progress.item_failed(index, url, &err);
            report.failures.push(FailedDownload {
                index,
                url: url.to_string(),
                error: err.to_string(),
            });
        }

        report.completed += 1;
        progress.item_finished(report.completed, report.total);
    }

    info!(
        "Download batch finished: {} of {} succeeded",
        report.succeeded(),
        report.total
    );
    report
}
