#![forbid(unsafe_code)]

//! Failure taxonomy shared by the sync job and the sampler.
//!
//! Only [`CatalogError::Config`] is allowed to end a run. Every other variant
//! is scoped to one channel or one video and is logged, reported, and skipped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Missing or unusable credentials/identifiers. Fatal to the entry point.
    #[error("configuration error: {0}")]
    Config(String),

    /// A handle could not be mapped to a channel id. The channel is skipped.
    #[error("no channel id found for {0}")]
    ResolutionMiss(String),

    /// The channel's video listing could not be retrieved.
    #[error("could not list videos for channel {channel}: {reason}")]
    EnumerationFailure { channel: String, reason: String },

    /// A single video's metadata could not be retrieved.
    #[error("could not fetch details for {url}: {reason}")]
    DetailFetchFailure { url: String, reason: String },

    /// A single video could not be downloaded.
    #[error("download failed for {url}: {reason}")]
    DownloadFailure { url: String, reason: String },
}

impl CatalogError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True for the only class of failure that terminates a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
