#![warn(clippy::all)]

mod api;
mod cli;
mod config;
mod crawl;
mod download;
mod retry;
mod shutdown;
mod state;
#[cfg(test)]
mod test_support;
mod types;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use futures_util::stream::{self, StreamExt};
use tracing_subscriber::EnvFilter;

use api::{ApiClient, FeedApi};
use cli::Command;
use crawl::{CrawlContext, CreatorSummary};
use download::MediaSaver;
use state::{MediaRecord, SqliteStateDb, StateDb};

/// Open the state database for a read-only command, or explain why not.
async fn open_existing_db(db_path: &str) -> anyhow::Result<Option<SqliteStateDb>> {
    let path = config::expand_tilde(db_path);
    if !path.exists() {
        println!("No state database found at {}", path.display());
        println!("Run a sync first to create the database.");
        return Ok(None);
    }
    Ok(Some(SqliteStateDb::open(&path).await?))
}

async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let Some(db) = open_existing_db(&args.state.db_path).await? else {
        return Ok(());
    };
    let summary = db.get_summary(args.runs).await?;

    println!("State Database: {}", db.path().display());
    println!();
    println!("Media:");
    println!("  Known:      {}", summary.total_media);
    println!("  Downloaded: {}", summary.downloaded_media);
    println!("Posts seen:   {}", summary.total_posts);

    if !summary.recent_runs.is_empty() {
        println!();
        println!("Recent runs:");
        for run in &summary.recent_runs {
            let started = run
                .started_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "  {} {:<10} {:<20} downloaded={} duplicates={} failed={} [{}]",
                started,
                run.feed_kind,
                run.creator,
                run.downloaded,
                run.duplicates,
                run.failed,
                run.outcome.as_deref().unwrap_or("running")
            );
        }
    }

    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct VerifyReport {
    verified: usize,
    missing: Vec<String>,
    corrupted: Vec<String>,
}

impl VerifyReport {
    fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.corrupted.is_empty()
    }
}

async fn verify_records(records: &[MediaRecord], checksums: bool) -> VerifyReport {
    let mut report = VerifyReport::default();
    for record in records {
        let Some(path) = record.local_filename.as_deref() else {
            println!("NO PATH: {} - no local file recorded", record.id);
            report.missing.push(record.id.clone());
            continue;
        };
        if !path.exists() {
            println!("MISSING: {} ({})", path.display(), record.id);
            report.missing.push(record.id.clone());
            continue;
        }
        if checksums && !checksum_matches(path, record.content_hash.as_deref()).await {
            println!("CORRUPTED: {} ({})", path.display(), record.id);
            report.corrupted.push(record.id.clone());
            continue;
        }
        report.verified += 1;
    }
    report
}

async fn checksum_matches(path: &Path, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    match download::file::hash_file(path).await {
        Ok(actual) => actual.eq_ignore_ascii_case(expected),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Cannot hash file: {}", e);
            false
        }
    }
}

async fn run_verify(args: cli::VerifyArgs) -> anyhow::Result<()> {
    let Some(db) = open_existing_db(&args.state.db_path).await? else {
        return Ok(());
    };
    let records = db.downloaded_media().await?;

    println!("Verifying {} downloaded files...", records.len());
    println!();
    let report = verify_records(&records, args.checksums).await;

    println!();
    println!("Results:");
    println!("  Verified:  {}", report.verified);
    println!("  Missing:   {}", report.missing.len());
    if args.checksums {
        println!("  Corrupted: {}", report.corrupted.len());
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = config::Config::from_args(args)?;
    tracing::info!(
        creators = config.creators.len(),
        concurrency = config.concurrent_creators,
        "Starting feedgrab"
    );
    tracing::debug!(?config, "Loaded configuration");

    let store: Arc<dyn StateDb> = Arc::new(SqliteStateDb::open(&config.db_path).await?);
    let api: Arc<dyn FeedApi> = Arc::new(ApiClient::new(
        &config.api_base_url,
        &config.token,
        &config.user_agent,
    )?);
    let cancel = shutdown::install_signal_handler()?;

    let ctx = CrawlContext {
        api: api.clone(),
        store: store.clone(),
        saver: MediaSaver::new(api, store, config.download_config()),
        config: config.crawl_config(),
        cancel,
    };
    let ctx = &ctx;

    let mut results = stream::iter(config.creators.iter())
        .map(|name| async move { (name, crawl::sync_creator(ctx, name).await) })
        .buffer_unordered(usize::from(config.concurrent_creators));

    let mut totals = CreatorSummary::default();
    let mut failed: Vec<String> = Vec::new();
    let mut fatal = None;
    while let Some((name, result)) = results.next().await {
        match result {
            Ok(summary) => {
                tracing::info!(
                    creator = %name,
                    feeds = summary.feeds,
                    downloaded = summary.downloaded,
                    duplicates = summary.duplicates,
                    failed = summary.failed,
                    "Creator done"
                );
                totals.merge(&summary);
            }
            Err(e) => {
                tracing::error!(creator = %name, "Sync failed: {}", e);
                failed.push(name.clone());
                if e.stops_process() && fatal.is_none() {
                    tracing::error!("Stopping the remaining creators");
                    ctx.cancel.cancel();
                    fatal = Some(e);
                } else {
                    crawl::acknowledge(ctx.config.interactive).await;
                }
            }
        }
    }

    println!();
    println!("Downloaded: {}", totals.downloaded);
    println!("Duplicates: {}", totals.duplicates);
    println!("Failed:     {}", totals.failed);

    if let Some(e) = fatal {
        return Err(e.into());
    }
    if ctx.cancel.is_cancelled() {
        tracing::info!("Stopped before all creators were synced");
    }
    if !failed.is_empty() {
        anyhow::bail!("{} creator(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.effective_command() {
        Command::Sync(args) => run_sync(args).await,
        Command::Status(args) => run_status(args).await,
        Command::Verify(args) => run_verify(args).await,
    }
}
