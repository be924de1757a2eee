#![forbid(unsafe_code)]

//! Video platform access: channel listings, per-video metadata, and
//! downloads. The production implementation shells out to `yt-dlp`.

use crate::error::CatalogError;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Best mp4 video + m4a audio, falling back to the best muxed mp4.
pub const DOWNLOAD_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/mp4";
/// Output file name relative to the target folder.
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// True for an absolute `http(s)://` URL with a host and no whitespace.
/// Anything else must never reach yt-dlp's command line.
pub fn is_web_url(candidate: &str) -> bool {
    let rest = candidate
        .strip_prefix("https://")
        .or_else(|| candidate.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            !rest.is_empty()
                && !rest.starts_with('/')
                && !candidate.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Uploads tab of a channel, which excludes Shorts and live streams.
pub fn channel_videos_url(channel_id: &str) -> String {
    format!("https://www.youtube.com/channel/{channel_id}/videos")
}

pub trait VideoPlatform: Send + Sync {
    /// Video ids in listing order, without fetching per-video detail.
    fn list_channel_videos(&self, channel_id: &str) -> Result<Vec<String>, CatalogError>;

    /// Duration in whole seconds, `None` when the platform reports none
    /// (upcoming premieres, some live archives).
    fn fetch_duration(&self, url: &str) -> Result<Option<u64>, CatalogError>;

    /// Downloads one video into `target_folder` using [`DOWNLOAD_FORMAT`] and
    /// [`OUTPUT_TEMPLATE`].
    fn download(&self, url: &str, target_folder: &Path) -> Result<(), CatalogError>;
}

/// Only the fields of `--dump-single-json` we read.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    duration: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.program)
    }

    /// Runs `<program> --version` to fail loudly before any work starts.
    pub fn ensure_available(&self) -> Result<()> {
        let status = self
            .command()
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => bail!(
                "{} is installed but returned a failure status",
                self.program.display()
            ),
            Err(err) => bail!(
                "{} is not installed or not in PATH: {}",
                self.program.display(),
                err
            ),
        }
    }

    fn list_ids(&self, list_url: &str) -> Result<Vec<String>> {
        let output = self
            .command()
            .arg("--flat-playlist")
            .arg("--get-id")
            .arg("--no-warnings")
            .arg("--")
            .arg(list_url)
            .output()
            .with_context(|| format!("retrieving playlist from {list_url}"))?;

        if !output.status.success() {
            bail!("{}", failure_reason(&output));
        }

        let content = String::from_utf8_lossy(&output.stdout);
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn video_info(&self, url: &str) -> Result<VideoInfo> {
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--")
            .arg(url)
            .output()
            .with_context(|| format!("fetching metadata for {url}"))?;

        if !output.status.success() {
            bail!("{}", failure_reason(&output));
        }

        serde_json::from_slice(&output.stdout).context("deserializing metadata JSON")
    }

    fn download_to(&self, url: &str, target_folder: &Path) -> Result<()> {
        let template = target_folder.join(OUTPUT_TEMPLATE);
        let output = self
            .command()
            .arg("--format")
            .arg(DOWNLOAD_FORMAT)
            .arg("--output")
            .arg(&template)
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("--no-warnings")
            .arg("--")
            .arg(url)
            .output()
            .with_context(|| format!("running {}", self.program.display()))?;

        if !output.status.success() {
            bail!("{}", failure_reason(&output));
        }
        Ok(())
    }
}

impl VideoPlatform for YtDlp {
    fn list_channel_videos(&self, channel_id: &str) -> Result<Vec<String>, CatalogError> {
        let list_url = channel_videos_url(channel_id);
        debug!("listing {list_url}");
        self.list_ids(&list_url)
            .map_err(|err| CatalogError::EnumerationFailure {
                channel: channel_id.to_string(),
                reason: format!("{err:#}"),
            })
    }

    fn fetch_duration(&self, url: &str) -> Result<Option<u64>, CatalogError> {
        self.video_info(url)
            .map(|info| info.duration.map(|secs| secs.max(0.0) as u64))
            .map_err(|err| CatalogError::DetailFetchFailure {
                url: url.to_string(),
                reason: format!("{err:#}"),
            })
    }

    fn download(&self, url: &str, target_folder: &Path) -> Result<(), CatalogError> {
        self.download_to(url, target_folder)
            .map_err(|err| CatalogError::DownloadFailure {
                url: url.to_string(),
                reason: format!("{err:#}"),
            })
    }
}

/// Last non-empty stderr line (yt-dlp puts its `ERROR:` summary there), or
/// the exit status when stderr is empty.
fn failure_reason(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("exited with status {}", output.status))
}
