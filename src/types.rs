/// Traversal variant of a feed. Determines termination rules and how the
/// duplicate threshold is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Timeline,
    Wall,
    Messages,
    Collection,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Timeline => "timeline",
            FeedKind::Wall => "wall",
            FeedKind::Messages => "messages",
            FeedKind::Collection => "collection",
        }
    }

    /// Whether tripping the duplicate breaker means "stop paginating" rather
    /// than a hard stop for the creator.
    pub fn supports_resumption(&self) -> bool {
        matches!(self, FeedKind::Timeline | FeedKind::Wall)
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which feeds of a creator a sync walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DownloadMode {
    /// Timeline, then every wall.
    Normal,
    Timeline,
    Walls,
}

impl DownloadMode {
    pub fn includes_timeline(&self) -> bool {
        matches!(self, DownloadMode::Normal | DownloadMode::Timeline)
    }

    pub fn includes_walls(&self) -> bool {
        matches!(self, DownloadMode::Normal | DownloadMode::Walls)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
