//! Download management: yt-dlp probing and audio extraction

pub mod error;
pub mod ytdlp;

// Re-exports for convenience
pub use error::DownloadError;
pub use ytdlp::{ExtractedAudio, VideoInfo, download_audio, probe};
