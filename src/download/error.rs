use std::fmt;

/// Structured error type for download operations.
///
/// Categorized variants instead of a single string so the glue layer
/// can decide what to tell the user and what to escalate.
#[derive(Debug)]
pub enum DownloadError {
    /// yt-dlp specific failures (binary not found, bad exit code, unsupported link)
    YtDlp(String),
    /// Expected audio file not found after extraction
    FileNotFound(String),
    /// Probe or download timed out
    Timeout(String),
    /// Video is longer than the configured duration ceiling
    TooLong { video: String, duration_secs: u32, limit_secs: u32 },
    /// Extracted file exceeds what a bot may upload to Telegram
    TooLarge { video: String, size_bytes: u64, limit_bytes: u64 },
    /// Process execution failure (spawn, wait)
    Process(String),
    /// Failed to deliver the file via the Telegram API
    SendFailed(String),
    /// Catch-all for uncategorized errors
    Other(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::YtDlp(msg) => write!(f, "{}", msg),
            DownloadError::FileNotFound(msg) => write!(f, "{}", msg),
            DownloadError::Timeout(msg) => write!(f, "{}", msg),
            DownloadError::TooLong {
                video,
                duration_secs,
                limit_secs,
            } => write!(
                f,
                "{} is {} seconds long, over the {} second limit",
                video, duration_secs, limit_secs
            ),
            DownloadError::TooLarge {
                video,
                size_bytes,
                limit_bytes,
            } => write!(
                f,
                "{} produced a {:.1} MB file, over the {:.1} MB limit",
                video,
                *size_bytes as f64 / (1024.0 * 1024.0),
                *limit_bytes as f64 / (1024.0 * 1024.0)
            ),
            DownloadError::Process(msg) => write!(f, "{}", msg),
            DownloadError::SendFailed(msg) => write!(f, "{}", msg),
            DownloadError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    /// Returns subcategory for logs
    pub fn subcategory(&self) -> &'static str {
        match self {
            DownloadError::YtDlp(_) => "ytdlp",
            DownloadError::FileNotFound(_) => "file_not_found",
            DownloadError::Timeout(_) => "timeout",
            DownloadError::TooLong { .. } => "too_long",
            DownloadError::TooLarge { .. } => "too_large",
            DownloadError::Process(_) => "process",
            DownloadError::SendFailed(_) => "send_failed",
            DownloadError::Other(_) => "other",
        }
    }
}

impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        DownloadError::Other(s)
    }
}

impl From<&str> for DownloadError {
    fn from(s: &str) -> Self {
        DownloadError::Other(s.to_string())
    }
}
