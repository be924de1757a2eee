#![forbid(unsafe_code)]

//! The batch half: crawl every configured channel and append new videos to
//! the catalog.

use crate::catalog::{CatalogRow, CatalogStore, known_urls};
use crate::channels::{ChannelConfig, ChannelSource};
use crate::discovery::{DiscoveryLimits, discover};
use crate::error::CatalogError;
use crate::platform::VideoPlatform;
use crate::resolver::ChannelLookup;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::thread;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub limits: DiscoveryLimits,
    /// Discover and report, but never write to the catalog.
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum ChannelOutcome {
    /// Resolution or listing failed; nothing was attempted for this channel.
    Skipped(CatalogError),
    Synced {
        channel_id: String,
        discovered: usize,
        appended: usize,
        append_failures: usize,
    },
}

#[derive(Debug)]
pub struct ChannelReport {
    pub label: String,
    pub outcome: ChannelOutcome,
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub channels: Vec<ChannelReport>,
}

impl SyncSummary {
    pub fn total_discovered(&self) -> usize {
        self.synced().map(|(discovered, _)| discovered).sum()
    }

    pub fn total_appended(&self) -> usize {
        self.synced().map(|(_, appended)| appended).sum()
    }

    fn synced(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.channels.iter().filter_map(|report| match report.outcome {
            ChannelOutcome::Synced {
                discovered,
                appended,
                ..
            } => Some((discovered, appended)),
            ChannelOutcome::Skipped(_) => None,
        })
    }
}

/// One invocation of the sync job. The set of known URLs lives only for the
/// duration of [`SyncJob::run`].
pub struct SyncJob<'a> {
    store: &'a dyn CatalogStore,
    resolver: &'a dyn ChannelLookup,
    platform: &'a dyn VideoPlatform,
    options: SyncOptions,
}

impl<'a> SyncJob<'a> {
    pub fn new(
        store: &'a dyn CatalogStore,
        resolver: &'a dyn ChannelLookup,
        platform: &'a dyn VideoPlatform,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            resolver,
            platform,
            options,
        }
    }

    /// Processes `channels` in order. Only a failure to read the catalog up
    /// front is returned as an error; per-channel problems end up in the
    /// summary.
    pub fn run(&self, channels: &[ChannelConfig]) -> Result<SyncSummary> {
        let rows = self.store.list_rows().context("loading catalog rows")?;
        // One set for the whole run: a URL accepted for one channel is never
        // accepted again for another.
        let mut existing = known_urls(&rows);
        info!("catalog holds {} known URLs", existing.len());

        let mut summary = SyncSummary::default();
        for channel in channels {
            let outcome = self.sync_channel(channel, &mut existing);
            summary.channels.push(ChannelReport {
                label: channel.label.clone(),
                outcome,
            });
        }
        Ok(summary)
    }

    fn sync_channel(
        &self,
        channel: &ChannelConfig,
        existing: &mut HashSet<String>,
    ) -> ChannelOutcome {
        let channel_id = match self.channel_id_for(channel) {
            Ok(channel_id) => channel_id,
            Err(err) => {
                warn!("Skipping {}: {err}", channel.label);
                return ChannelOutcome::Skipped(err);
            }
        };

        let discovery = discover(self.platform, &channel_id, existing, &self.options.limits);
        if let Some(err) = discovery.failure {
            return ChannelOutcome::Skipped(err);
        }

        let discovered = discovery.urls.len();
        let (appended, append_failures) = self.append_all(&channel.label, &discovery.urls);
        if self.options.dry_run {
            info!(
                "[dry run] {discovered} new videos found for {}",
                channel.label
            );
        } else {
            info!(
                "Added {appended} new videos to the catalog for {}",
                channel.label
            );
        }

        ChannelOutcome::Synced {
            channel_id,
            discovered,
            appended,
            append_failures,
        }
    }

    fn channel_id_for(&self, channel: &ChannelConfig) -> Result<String, CatalogError> {
        match &channel.source {
            ChannelSource::Id(id) => Ok(id.clone()),
            ChannelSource::Handle(handle) => self
                .resolver
                .resolve(handle)
                .ok_or_else(|| CatalogError::ResolutionMiss(handle.clone())),
        }
    }

    /// Returns `(appended, failed)`. A rejected write is logged and the
    /// remaining URLs are still attempted.
    fn append_all(&self, label: &str, urls: &[String]) -> (usize, usize) {
        let mut appended = 0;
        let mut failed = 0;
        for url in urls {
            if self.options.dry_run {
                info!("[dry run] would append {label} {url}");
                continue;
            }
            match self.store.append_row(&CatalogRow::new(label, url.as_str())) {
                Ok(()) => appended += 1,
                Err(err) => {
                    warn!("failed to append {url} for {label}: {err:#}");
                    failed += 1;
                }
            }
            let delay = self.options.limits.call_delay;
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
        (appended, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::discovery::tests::{FakePlatform, no_delay};
    use crate::platform::watch_url;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeResolver {
        handles: HashMap<String, String>,
    }

    impl ChannelLookup for FakeResolver {
        fn resolve(&self, handle: &str) -> Option<String> {
            let key = crate::resolver::strip_site_prefix(handle);
            self.handles.get(key).cloned()
        }
    }

    fn options() -> SyncOptions {
        SyncOptions {
            limits: no_delay(),
            dry_run: false,
        }
    }

    #[test]
    fn appends_only_new_long_videos() {
        let store = MemoryCatalog::with_rows(vec![CatalogRow::new("A", watch_url("u2"))]);
        let platform = FakePlatform::default().channel(
            "UCa",
            &[("u1", Some(8 * 60)), ("u2", Some(8 * 60)), ("u3", Some(12 * 60))],
        );
        let resolver = FakeResolver::default();
        let job = SyncJob::new(&store, &resolver, &platform, options());

        let summary = job.run(&[ChannelConfig::new("A", "UCa")]).unwrap();

        assert_eq!(summary.total_appended(), 1);
        assert_eq!(
            store.snapshot(),
            vec![
                CatalogRow::new("A", watch_url("u2")),
                CatalogRow::new("A", watch_url("u3")),
            ]
        );
    }

    #[test]
    fn second_run_adds_nothing() {
        let store = MemoryCatalog::new();
        let platform = FakePlatform::default()
            .channel("UCa", &[("a1", Some(900)), ("a2", Some(100))])
            .channel("UCb", &[("b1", Some(1200))]);
        let resolver = FakeResolver::default();
        let channels = [ChannelConfig::new("A", "UCa"), ChannelConfig::new("B", "UCb")];

        let first = SyncJob::new(&store, &resolver, &platform, options())
            .run(&channels)
            .unwrap();
        assert_eq!(first.total_appended(), 2);

        let second = SyncJob::new(&store, &resolver, &platform, options())
            .run(&channels)
            .unwrap();
        assert_eq!(second.total_appended(), 0);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn unresolvable_handle_skips_channel_and_continues() {
        let store = MemoryCatalog::new();
        let platform = FakePlatform::default().channel("UCb", &[("b1", Some(700))]);
        let resolver = FakeResolver::default();
        let job = SyncJob::new(&store, &resolver, &platform, options());

        let summary = job
            .run(&[ChannelConfig::new("Nobody", "@nouser"), ChannelConfig::new("B", "UCb")])
            .unwrap();

        assert!(matches!(
            &summary.channels[0].outcome,
            ChannelOutcome::Skipped(CatalogError::ResolutionMiss(handle)) if handle == "@nouser"
        ));
        assert_eq!(store.snapshot(), vec![CatalogRow::new("B", watch_url("b1"))]);
    }

    #[test]
    fn handles_are_resolved_before_discovery() {
        let store = MemoryCatalog::new();
        let platform = FakePlatform::default().channel("UCresolved", &[("v", Some(700))]);
        let resolver = FakeResolver {
            handles: HashMap::from([("@teeniepingTV".to_string(), "UCresolved".to_string())]),
        };
        let job = SyncJob::new(&store, &resolver, &platform, options());

        let summary = job
            .run(&[ChannelConfig::new(
                "티니핑TV",
                "https://www.youtube.com/@teeniepingTV",
            )])
            .unwrap();

        match &summary.channels[0].outcome {
            ChannelOutcome::Synced { channel_id, appended, .. } => {
                assert_eq!(channel_id, "UCresolved");
                assert_eq!(*appended, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn url_claimed_by_one_channel_is_not_added_for_another() {
        let store = MemoryCatalog::new();
        let platform = FakePlatform::default()
            .channel("UCa", &[("shared", Some(900))])
            .channel("UCb", &[("shared", Some(900)), ("own", Some(900))]);
        let resolver = FakeResolver::default();
        let job = SyncJob::new(&store, &resolver, &platform, options());

        job.run(&[ChannelConfig::new("A", "UCa"), ChannelConfig::new("B", "UCb")])
            .unwrap();

        assert_eq!(
            store.snapshot(),
            vec![
                CatalogRow::new("A", watch_url("shared")),
                CatalogRow::new("B", watch_url("own")),
            ]
        );
    }

    #[test]
    fn enumeration_failure_skips_only_that_channel() {
        let store = MemoryCatalog::new();
        let platform = FakePlatform::default().channel("UCb", &[("b1", Some(900))]);
        let resolver = FakeResolver::default();
        let job = SyncJob::new(&store, &resolver, &platform, options());

        let summary = job
            .run(&[ChannelConfig::new("Gone", "UCgone"), ChannelConfig::new("B", "UCb")])
            .unwrap();

        assert!(matches!(
            summary.channels[0].outcome,
            ChannelOutcome::Skipped(CatalogError::EnumerationFailure { .. })
        ));
        assert_eq!(summary.total_appended(), 1);
    }

    #[test]
    fn rejected_append_does_not_stop_the_channel() {
        let store = MemoryCatalog::new();
        store.reject_appends_for(watch_url("v1"));
        let platform =
            FakePlatform::default().channel("UCa", &[("v1", Some(900)), ("v2", Some(900))]);
        let resolver = FakeResolver::default();
        let job = SyncJob::new(&store, &resolver, &platform, options());

        let summary = job.run(&[ChannelConfig::new("A", "UCa")]).unwrap();

        match &summary.channels[0].outcome {
            ChannelOutcome::Synced {
                discovered,
                appended,
                append_failures,
                ..
            } => {
                assert_eq!((*discovered, *appended, *append_failures), (2, 1, 1));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.snapshot(), vec![CatalogRow::new("A", watch_url("v2"))]);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let store = MemoryCatalog::new();
        let platform = FakePlatform::default().channel("UCa", &[("v1", Some(900))]);
        let resolver = FakeResolver::default();
        let job = SyncJob::new(
            &store,
            &resolver,
            &platform,
            SyncOptions {
                limits: no_delay(),
                dry_run: true,
            },
        );

        let summary = job.run(&[ChannelConfig::new("A", "UCa")]).unwrap();

        assert_eq!(summary.total_discovered(), 1);
        assert_eq!(summary.total_appended(), 0);
        assert!(store.snapshot().is_empty());
    }
}
