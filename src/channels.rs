#![forbid(unsafe_code)]

//! The static channel table: which channels the sync job crawls and which
//! labels the sampler offers.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Table compiled into both binaries; `--channels <path>` replaces it.
pub const DEFAULT_CHANNELS: &str = include_str!("../channels.toml");

/// Where a channel's videos come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSource {
    /// Opaque platform id such as `UC56gTxNs4f9xZ7Pa2i5xNzg`.
    Id(String),
    /// Human-readable handle (`@name`, optionally as a full channel URL)
    /// that has to be resolved before use.
    Handle(String),
}

impl ChannelSource {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.contains('@') {
            Self::Handle(trimmed.to_string())
        } else {
            Self::Id(trimmed.to_string())
        }
    }

    pub fn is_handle(&self) -> bool {
        matches!(self, Self::Handle(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub label: String,
    pub source: ChannelSource,
}

impl ChannelConfig {
    pub fn new(label: impl Into<String>, source: &str) -> Self {
        Self {
            label: label.into(),
            source: ChannelSource::parse(source),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelTable {
    pub channels: Vec<ChannelConfig>,
    /// Labels offered by the sampler dropdown. May include channels that are
    /// no longer crawled but still have rows in the catalog.
    pub sampler_labels: Vec<String>,
}

#[derive(Deserialize)]
struct RawTable {
    #[serde(default)]
    sampler_labels: Option<Vec<String>>,
    #[serde(default, rename = "channel")]
    channels: Vec<RawChannel>,
}

#[derive(Deserialize)]
struct RawChannel {
    label: String,
    source: String,
}

impl ChannelTable {
    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_CHANNELS).context("parsing built-in channel table")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Uses `path` when given, otherwise the built-in table.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let table: RawTable = toml::from_str(raw)?;

        let mut seen = HashSet::new();
        let mut channels = Vec::with_capacity(table.channels.len());
        for entry in table.channels {
            let label = entry.label.trim();
            if label.is_empty() {
                bail!("channel entry with an empty label");
            }
            if entry.source.trim().is_empty() {
                bail!("channel {label} has an empty source");
            }
            if !seen.insert(label.to_string()) {
                bail!("channel {label} is listed more than once");
            }
            channels.push(ChannelConfig::new(label, &entry.source));
        }

        let sampler_labels = match table.sampler_labels {
            Some(labels) => labels
                .into_iter()
                .map(|label| label.trim().to_string())
                .filter(|label| !label.is_empty())
                .collect(),
            None => channels.iter().map(|channel| channel.label.clone()).collect(),
        };

        Ok(Self {
            channels,
            sampler_labels,
        })
    }

    /// True when at least one channel needs the lookup endpoint.
    pub fn needs_resolution(&self) -> bool {
        self.channels.iter().any(|channel| channel.source.is_handle())
    }
}
