#![forbid(unsafe_code)]

//! Batch job that crawls every configured channel and appends new long-form
//! videos to the catalog worksheet. Meant to be run by hand or from cron.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tube_catalog::{
    catalog::SheetsCatalog,
    channels::ChannelTable,
    config::{SettingsOverrides, resolve_settings},
    discovery::{DEFAULT_MAX_RESULTS, DEFAULT_MIN_DURATION_SECS, DiscoveryLimits},
    init_tracing,
    platform::YtDlp,
    resolver::YouTubeDataApi,
    security::{check_credentials_file, ensure_not_root},
    sync::{ChannelOutcome, SyncJob, SyncOptions, SyncSummary},
};

#[derive(Debug, Parser)]
#[command(name = "catalog_sync", about = "Append newly published long-form videos to the catalog")]
struct SyncArgs {
    /// dotenv file holding SHEET_ID, SHEET_NAME, SERVICE_ACCOUNT_FILE and YOUTUBE_API_KEY
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Channel table to crawl instead of the built-in one
    #[arg(long, value_name = "PATH")]
    channels: Option<PathBuf>,

    /// Discover and report without writing to the catalog
    #[arg(long)]
    dry_run: bool,

    /// Minimum video length in seconds
    #[arg(long, default_value_t = DEFAULT_MIN_DURATION_SECS)]
    min_duration: u64,

    /// Maximum number of new videos accepted per channel
    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS)]
    max_results: usize,

    /// Pause between remote calls, in milliseconds
    #[arg(long, default_value_t = 100)]
    delay_ms: u64,
}

impl SyncArgs {
    fn options(&self) -> SyncOptions {
        SyncOptions {
            limits: DiscoveryLimits {
                min_duration_secs: self.min_duration,
                max_results: self.max_results,
                call_delay: Duration::from_millis(self.delay_ms),
            },
            dry_run: self.dry_run,
        }
    }
}

fn main() -> Result<()> {
    let args = SyncArgs::parse();
    init_tracing();
    ensure_not_root("catalog_sync")?;

    let settings = resolve_settings(SettingsOverrides {
        env_path: args.env_file.clone(),
        ..SettingsOverrides::default()
    })?;
    let table = ChannelTable::load_or_builtin(args.channels.as_deref())?;

    let ytdlp = YtDlp::new(&settings.yt_dlp_path);
    ytdlp.ensure_available()?;

    // The lookup key is only needed when a channel is configured by handle.
    let api_key = if table.needs_resolution() {
        settings.require_youtube_api_key()?.to_string()
    } else {
        String::new()
    };
    let resolver = YouTubeDataApi::new(api_key);

    let target = settings.sheet_target()?;
    check_credentials_file(target.service_account_file);
    let catalog = SheetsCatalog::open_or_create(&target).context("opening catalog worksheet")?;

    println!("===================================");
    println!("Catalog sync");
    println!("===================================");
    println!("Worksheet: {}", catalog.sheet_name());
    println!("Channels: {}", table.channels.len());
    if args.dry_run {
        println!("Dry run: nothing will be written");
    }
    println!();

    let job = SyncJob::new(&catalog, &resolver, &ytdlp, args.options());
    let summary = job.run(&table.channels)?;

    print_summary(&summary, args.dry_run);
    Ok(())
}

fn print_summary(summary: &SyncSummary, dry_run: bool) {
    println!();
    println!("Summary:");
    for report in &summary.channels {
        match &report.outcome {
            ChannelOutcome::Skipped(err) => {
                println!("  - {}: skipped ({err})", report.label);
            }
            ChannelOutcome::Synced {
                channel_id,
                discovered,
                appended,
                append_failures,
            } => {
                let mut line = format!(
                    "  - {} [{channel_id}]: {discovered} new, {appended} appended",
                    report.label
                );
                if *append_failures > 0 {
                    line.push_str(&format!(", {append_failures} failed to append"));
                }
                println!("{line}");
            }
        }
    }
    println!();
    if dry_run {
        println!(
            "Dry run complete: {} new videos found.",
            summary.total_discovered()
        );
    } else {
        println!(
            "Sync complete: {} new videos added.",
            summary.total_appended()
        );
    }
}
