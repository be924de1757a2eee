#![forbid(unsafe_code)]

//! Finds new, sufficiently long videos on one channel.
//!
//! Entries are walked in listing order. Each one either becomes an accepted
//! URL or a skip with a reason; nothing here aborts the run except a failed
//! channel listing, which yields an empty result for that channel only.

use crate::error::CatalogError;
use crate::platform::{VideoPlatform, watch_url};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MIN_DURATION_SECS: u64 = 600;
pub const DEFAULT_MAX_RESULTS: usize = 50;
/// Pause between remote calls to stay within the platform's informal limits.
pub const DEFAULT_CALL_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct DiscoveryLimits {
    pub min_duration_secs: u64,
    pub max_results: usize,
    pub call_delay: Duration,
}

impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
            max_results: DEFAULT_MAX_RESULTS,
            call_delay: DEFAULT_CALL_DELAY,
        }
    }
}

#[derive(Debug)]
pub enum SkipReason {
    AlreadyKnown,
    Unavailable(CatalogError),
    TooShort { duration_secs: u64 },
    NoDuration,
}

#[derive(Debug)]
pub enum EntryOutcome {
    Accepted(String),
    Skipped { url: String, reason: SkipReason },
}

/// Everything one discovery pass produced for a channel.
#[derive(Debug, Default)]
pub struct DiscoveryResult {
    /// Accepted URLs in listing order.
    pub urls: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    /// Set when the channel listing itself failed.
    pub failure: Option<CatalogError>,
}

impl DiscoveryResult {
    fn push(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Accepted(url) => self.urls.push(url),
            EntryOutcome::Skipped { url, reason } => self.skipped.push((url, reason)),
        }
    }
}

/// Lists `channel_id` and returns up to `limits.max_results` URLs that are
/// not in `existing_urls` and run at least `limits.min_duration_secs`.
///
/// Accepted URLs are inserted into `existing_urls` as they are found, so the
/// same set can be threaded through several channels.
pub fn discover(
    platform: &dyn VideoPlatform,
    channel_id: &str,
    existing_urls: &mut HashSet<String>,
    limits: &DiscoveryLimits,
) -> DiscoveryResult {
    let mut result = DiscoveryResult::default();
    if limits.max_results == 0 {
        return result;
    }

    let ids = match platform.list_channel_videos(channel_id) {
        Ok(ids) => ids,
        Err(err) => {
            warn!("{err}");
            result.failure = Some(err);
            return result;
        }
    };

    for id in ids {
        let outcome = evaluate_entry(platform, &id, existing_urls, limits);
        let fetched = !matches!(
            outcome,
            EntryOutcome::Skipped {
                reason: SkipReason::AlreadyKnown | SkipReason::Unavailable(_),
                ..
            }
        );
        if let EntryOutcome::Accepted(url) = &outcome {
            existing_urls.insert(url.clone());
        }
        result.push(outcome);

        if result.urls.len() >= limits.max_results {
            break;
        }
        if fetched && !limits.call_delay.is_zero() {
            thread::sleep(limits.call_delay);
        }
    }

    info!(
        "Fetched {} videos over {} minutes from channel {}",
        result.urls.len(),
        limits.min_duration_secs / 60,
        channel_id
    );
    result
}

fn evaluate_entry(
    platform: &dyn VideoPlatform,
    video_id: &str,
    existing_urls: &HashSet<String>,
    limits: &DiscoveryLimits,
) -> EntryOutcome {
    let url = watch_url(video_id);
    if existing_urls.contains(&url) {
        debug!("Skipping already saved video: {url}");
        return EntryOutcome::Skipped {
            url,
            reason: SkipReason::AlreadyKnown,
        };
    }

    let duration_secs = match platform.fetch_duration(&url) {
        Ok(Some(duration_secs)) => duration_secs,
        Ok(None) => {
            debug!("Skipping video without a duration: {url}");
            return EntryOutcome::Skipped {
                url,
                reason: SkipReason::NoDuration,
            };
        }
        Err(err) => {
            warn!("Skipping unavailable video: {err}");
            return EntryOutcome::Skipped {
                url,
                reason: SkipReason::Unavailable(err),
            };
        }
    };

    if duration_secs >= limits.min_duration_secs {
        EntryOutcome::Accepted(url)
    } else {
        EntryOutcome::Skipped {
            url,
            reason: SkipReason::TooShort { duration_secs },
        }
    }
}
