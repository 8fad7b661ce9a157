use clap::{Args, Parser, Subcommand};

use crate::types::{DownloadMode, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "feedgrab",
    version,
    about = "Incrementally download media from creator feeds",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Sync options, used when no subcommand is given
    #[command(flatten)]
    pub sync: SyncArgs,

    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

impl Cli {
    /// The subcommand to run; a bare invocation means `sync`.
    pub fn effective_command(self) -> Command {
        self.command.unwrap_or(Command::Sync(self.sync))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl the configured creators and download new media (default)
    Sync(SyncArgs),

    /// Show state database totals and recent sync runs
    Status(StatusArgs),

    /// Check that downloaded files still exist on disk
    Verify(VerifyArgs),
}

/// Location of the state database.
#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// Path of the SQLite state database
    #[arg(long, env = "FEEDGRAB_DB", default_value = "~/.feedgrab/state.db")]
    pub db_path: String,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// Number of recent sync runs to list
    #[arg(long, default_value_t = 10)]
    pub runs: usize,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// Also re-hash every file and compare with the stored content hash
    #[arg(long)]
    pub checksums: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Creator username to sync (repeatable)
    #[arg(short = 'c', long = "creator")]
    pub creators: Vec<String>,

    /// Local directory for downloads
    #[arg(short = 'd', long, default_value = "~/feedgrab")]
    pub directory: String,

    #[command(flatten)]
    pub state: StateArgs,

    /// API authorization token.
    /// WARNING: passing via --token is visible in process listings.
    /// Prefer the FEEDGRAB_TOKEN environment variable instead.
    #[arg(long, env = "FEEDGRAB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Base URL of the feed API
    #[arg(long, env = "FEEDGRAB_API_URL")]
    pub api_base_url: Option<String>,

    /// User-Agent header sent with every request
    #[arg(long, default_value = concat!("feedgrab/", env!("CARGO_PKG_VERSION")))]
    pub user_agent: String,

    /// Which feeds of each creator to walk
    #[arg(long, value_enum, default_value = "normal")]
    pub download_mode: DownloadMode,

    /// Also download preview media
    #[arg(long)]
    pub previews: bool,

    /// Wait for Enter after an error before moving on
    #[arg(long)]
    pub interactive: bool,

    /// Disable progress spinners
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Number of creators synced at the same time
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrent_creators: u16,

    /// Stop a feed once too many already-downloaded items are seen
    #[arg(long)]
    pub use_duplicate_threshold: bool,

    /// Base duplicate threshold
    #[arg(long, default_value_t = 50)]
    pub duplicate_threshold: u64,

    /// Effective thresholds below this never trip
    #[arg(long, default_value_t = 50)]
    pub duplicate_threshold_floor: u64,

    /// Timeline threshold as a percentage of the creator's known media
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u64).range(0..=100))]
    pub timeline_threshold_percent: u64,

    /// Wall threshold as a percentage of each page's media
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u64).range(0..=100))]
    pub wall_threshold_percent: u64,

    /// Stop a feed at the first page whose posts are all known
    #[arg(long)]
    pub use_pagination_duplication: bool,

    /// Pause after a fully known page (seconds)
    #[arg(long, default_value_t = 5)]
    pub duplicate_page_cooldown_seconds: u64,

    /// Extra attempts at a cursor that returned an empty or failed page
    #[arg(long, default_value_t = 1)]
    pub timeline_retries: u32,

    /// Wait between attempts at an empty page (seconds)
    #[arg(long, default_value_t = 60)]
    pub timeline_delay_seconds: u64,

    /// Max retries for a single file download
    #[arg(long, default_value_t = 10)]
    pub api_max_retries: u32,

    /// Minimum pause between feed pages (milliseconds)
    #[arg(long, default_value_t = 400)]
    pub page_delay_min_ms: u64,

    /// Maximum pause between feed pages (milliseconds)
    #[arg(long, default_value_t = 1200)]
    pub page_delay_max_ms: u64,

    /// Log each completed download at info level
    #[arg(long)]
    pub show_downloads: bool,

    /// Log each skipped duplicate at info level
    #[arg(long)]
    pub show_skipped_downloads: bool,
}
