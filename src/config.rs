use std::path::PathBuf;
use std::time::Duration;

use crate::cli::SyncArgs;
use crate::crawl::breaker::ThresholdConfig;
use crate::crawl::{CrawlConfig, MEDIA_BATCH_SIZE};
use crate::download::DownloadConfig;
use crate::retry::{RateLimitPolicy, RetryConfig};
use crate::types::DownloadMode;

/// Validated sync configuration.
pub struct Config {
    pub creators: Vec<String>,
    pub directory: PathBuf,
    pub db_path: PathBuf,
    pub token: String,
    pub api_base_url: String,
    pub user_agent: String,

    pub duplicate_page_cooldown: Duration,
    pub timeline_delay: Duration,
    pub page_delay_min: Duration,
    pub page_delay_max: Duration,

    pub threshold: ThresholdConfig,
    pub timeline_retries: u32,
    pub api_max_retries: u32,
    pub concurrent_creators: u16,

    pub download_mode: DownloadMode,

    pub use_pagination_duplication: bool,
    pub include_previews: bool,
    pub interactive: bool,
    pub no_progress_bar: bool,
    pub show_downloads: bool,
    pub show_skipped_downloads: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("creators", &self.creators)
            .field("directory", &self.directory)
            .field("db_path", &self.db_path)
            .field("token", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("download_mode", &self.download_mode)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Expand a leading `~/` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_args(args: SyncArgs) -> anyhow::Result<Self> {
        let creators: Vec<String> = args
            .creators
            .iter()
            .map(|c| c.trim().trim_start_matches('@').to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if creators.is_empty() {
            anyhow::bail!("No creators given; pass at least one --creator");
        }

        let token = match args.token {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => anyhow::bail!("An API token is required (--token or FEEDGRAB_TOKEN)"),
        };
        let Some(api_base_url) = args.api_base_url.filter(|u| !u.trim().is_empty()) else {
            anyhow::bail!("An API base URL is required (--api-base-url or FEEDGRAB_API_URL)");
        };
        url::Url::parse(&api_base_url)
            .map_err(|e| anyhow::anyhow!("Invalid API base URL '{}': {}", api_base_url, e))?;

        if args.page_delay_min_ms > args.page_delay_max_ms {
            anyhow::bail!(
                "--page-delay-min-ms ({}) must not exceed --page-delay-max-ms ({})",
                args.page_delay_min_ms,
                args.page_delay_max_ms
            );
        }

        Ok(Self {
            creators,
            directory: expand_tilde(&args.directory),
            db_path: expand_tilde(&args.state.db_path),
            token,
            api_base_url,
            user_agent: args.user_agent,
            duplicate_page_cooldown: Duration::from_secs(args.duplicate_page_cooldown_seconds),
            timeline_delay: Duration::from_secs(args.timeline_delay_seconds),
            page_delay_min: Duration::from_millis(args.page_delay_min_ms),
            page_delay_max: Duration::from_millis(args.page_delay_max_ms),
            threshold: ThresholdConfig {
                enabled: args.use_duplicate_threshold,
                base: args.duplicate_threshold,
                floor: args.duplicate_threshold_floor,
                timeline_percent: args.timeline_threshold_percent,
                wall_percent: args.wall_threshold_percent,
            },
            timeline_retries: args.timeline_retries,
            api_max_retries: args.api_max_retries,
            concurrent_creators: args.concurrent_creators,
            download_mode: args.download_mode,
            use_pagination_duplication: args.use_pagination_duplication,
            include_previews: args.previews,
            interactive: args.interactive,
            no_progress_bar: args.no_progress_bar,
            show_downloads: args.show_downloads,
            show_skipped_downloads: args.show_skipped_downloads,
        })
    }

    pub fn rate_limit(&self) -> RateLimitPolicy {
        RateLimitPolicy::default()
    }

    /// File transfers back off on the same 30 s → 300 s curve as rate limits.
    pub fn retry(&self) -> RetryConfig {
        let policy = self.rate_limit();
        RetryConfig {
            max_retries: self.api_max_retries,
            base_delay_secs: policy.base_delay_secs,
            max_delay_secs: policy.max_delay_secs,
        }
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            directory: self.directory.clone(),
            retry: self.retry(),
            rate_limit: self.rate_limit(),
            show_downloads: self.show_downloads,
            show_skipped_downloads: self.show_skipped_downloads,
        }
    }

    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            download_mode: self.download_mode,
            threshold: self.threshold,
            use_pagination_duplication: self.use_pagination_duplication,
            duplicate_page_cooldown: self.duplicate_page_cooldown,
            timeline_retries: self.timeline_retries,
            timeline_delay: self.timeline_delay,
            page_delay_min: self.page_delay_min,
            page_delay_max: self.page_delay_max,
            rate_limit: self.rate_limit(),
            media_batch_size: MEDIA_BATCH_SIZE,
            include_previews: self.include_previews,
            interactive: self.interactive,
            show_progress: !self.no_progress_bar,
        }
    }
}
