use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Configuration constants for the bot

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Path to the users/authorization SQLite database
pub static USERS_DB_PATH: Lazy<String> =
    Lazy::new(|| env::var("TONIKA_USERS_DB").unwrap_or_else(|_| "tonika_users.sqlite".to_string()));

/// Path to the audio cache SQLite database
pub static AUDIO_DB_PATH: Lazy<String> =
    Lazy::new(|| env::var("TONIKA_AUDIO_DB").unwrap_or_else(|_| "tonika_audio.sqlite".to_string()));

/// Directory where yt-dlp writes extracted audio files
pub static AUDIO_OUTPUT_DIR: Lazy<String> =
    Lazy::new(|| env::var("TONIKA_OUTPUT_DIR").unwrap_or_else(|_| "output_dir".to_string()));

/// Log file path
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("TONIKA_LOG_FILE").unwrap_or_else(|_| "tonika.log".to_string()));

/// Handle of the root account. Required: the bootstrap check refuses to
/// start without it, so this goes through a function rather than a Lazy
/// that would bake in an empty default.
pub fn root_handle() -> Option<String> {
    env::var("TONIKA_ROOT")
        .ok()
        .map(|h| h.trim_start_matches('@').to_string())
        .filter(|h| !h.is_empty())
}

/// How many repeated access requests a blocked user may make before
/// being auto-classified as banned
pub static BAN_THRESHOLD: Lazy<i64> = Lazy::new(|| {
    env::var("TONIKA_BAN_THRESHOLD")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(5)
});

/// Audio extraction configuration
pub mod audio {
    /// Preferred audio codec passed to yt-dlp's FFmpegExtractAudio postprocessor
    pub const PREFERRED_CODEC: &str = "mp3";

    /// Target quality for extracted audio (yt-dlp --audio-quality)
    pub const QUALITY: &str = "192";

    /// Videos longer than this are rejected before download (seconds)
    pub const MAX_DURATION_SECS: u32 = 30 * 60;

    /// Telegram bots cannot upload files larger than 50 MB; keep a margin
    pub const MAX_FILE_SIZE_BYTES: u64 = 49 * 1024 * 1024;
}

/// Download configuration
pub mod download {
    use super::Duration;

    /// Timeout for yt-dlp probe commands (in seconds)
    pub const PROBE_TIMEOUT_SECS: u64 = 30;

    /// Timeout for the full download + extraction (in seconds)
    pub const FETCH_TIMEOUT_SECS: u64 = 10 * 60;

    /// yt-dlp socket timeout flag value (in seconds)
    pub const SOCKET_TIMEOUT_SECS: u64 = 10;

    /// Retries passed to yt-dlp
    pub const RETRIES: u32 = 10;

    pub fn probe_timeout() -> Duration {
        Duration::from_secs(PROBE_TIMEOUT_SECS)
    }

    pub fn fetch_timeout() -> Duration {
        Duration::from_secs(FETCH_TIMEOUT_SECS)
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Timeout for outbound HTTP requests (Telegram API, catalog lookups)
    pub const TIMEOUT_SECS: u64 = 60;

    pub fn timeout() -> Duration {
        Duration::from_secs(TIMEOUT_SECS)
    }
}
