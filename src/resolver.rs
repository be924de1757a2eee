#![forbid(unsafe_code)]

//! Handle → channel id lookup through the YouTube Data API.

use serde::Deserialize;
use tracing::{debug, warn};

pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

const SITE_PREFIXES: [&str; 6] = [
    "https://www.youtube.com/",
    "https://youtube.com/",
    "https://m.youtube.com/",
    "http://www.youtube.com/",
    "http://youtube.com/",
    "http://m.youtube.com/",
];

/// Maps a handle or username to a stable channel id. A miss is a normal
/// outcome and comes back as `None`.
pub trait ChannelLookup: Send + Sync {
    fn resolve(&self, handle: &str) -> Option<String>;
}

pub struct YouTubeDataApi {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Deserialize)]
struct ChannelItem {
    id: String,
}

impl YouTubeDataApi {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_agent(ureq::Agent::new(), YOUTUBE_API_BASE, api_key)
    }

    pub fn with_agent(agent: ureq::Agent, api_base: &str, api_key: impl Into<String>) -> Self {
        Self {
            agent,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

impl ChannelLookup for YouTubeDataApi {
    fn resolve(&self, handle: &str) -> Option<String> {
        let identifier = strip_site_prefix(handle);
        if identifier.is_empty() {
            return None;
        }
        // `@name` handles and legacy usernames are looked up through
        // different query parameters.
        let param = if identifier.starts_with('@') {
            "forHandle"
        } else {
            "forUsername"
        };

        let response = self
            .agent
            .get(&format!("{}/channels", self.api_base))
            .query("key", &self.api_key)
            .query(param, identifier)
            .query("part", "id")
            .call();

        match response {
            Ok(response) => match response.into_json::<ChannelListResponse>() {
                Ok(list) => list.items.into_iter().next().map(|item| item.id),
                Err(err) => {
                    warn!("could not decode channel lookup for {identifier}: {err}");
                    None
                }
            },
            Err(ureq::Error::Status(code, _)) => {
                debug!("channel lookup for {identifier} returned HTTP {code}");
                None
            }
            Err(err) => {
                warn!("channel lookup for {identifier} failed: {err}");
                None
            }
        }
    }
}

/// Removes a leading channel-site URL and any trailing path/query, leaving
/// `@handle` or a bare username.
pub fn strip_site_prefix(handle: &str) -> &str {
    let trimmed = handle.trim();
    let rest = SITE_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed);
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    rest.split('/').next().unwrap_or(rest).trim()
}
