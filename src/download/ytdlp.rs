//! yt-dlp invocation: probing link information and extracting audio.
//!
//! yt-dlp is an external binary and stays one; everything here shells
//! out with a timeout and parses its JSON output.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use url::Url;

use crate::core::config;
use crate::download::error::DownloadError;

const YOUTUBE_WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// One playable entry as reported by `yt-dlp --dump-json`. A playlist
/// link yields several of these, a plain video exactly one.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub playlist_index: Option<u64>,
}

impl VideoInfo {
    pub fn watch_url(&self) -> String {
        format!("{}{}", YOUTUBE_WATCH_URL, self.id)
    }

    pub fn duration_secs(&self) -> Option<u32> {
        self.duration.map(|d| d.round() as u32)
    }

    /// Reject videos over the configured duration ceiling before any
    /// bytes are fetched.
    pub fn check_duration(&self) -> Result<(), DownloadError> {
        let limit = config::audio::MAX_DURATION_SECS;
        match self.duration_secs() {
            Some(duration) if duration > limit => Err(DownloadError::TooLong {
                video: self.title.clone(),
                duration_secs: duration,
                limit_secs: limit,
            }),
            _ => Ok(()),
        }
    }
}

/// The extracted audio on disk, ready to upload.
#[derive(Debug)]
pub struct ExtractedAudio {
    pub path: PathBuf,
    pub file_size: u64,
}

/// Parse the line-per-entry JSON that `--dump-json` emits.
pub fn parse_probe_output(stdout: &str) -> Result<Vec<VideoInfo>, DownloadError> {
    let mut entries = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let info: VideoInfo = serde_json::from_str(line)
            .map_err(|e| DownloadError::YtDlp(format!("unparseable yt-dlp output: {}", e)))?;
        entries.push(info);
    }
    if entries.is_empty() {
        return Err(DownloadError::YtDlp("yt-dlp returned no entries".to_string()));
    }
    Ok(entries)
}

/// Ask yt-dlp what is behind a link without downloading anything.
pub async fn probe(url: &Url) -> Result<Vec<VideoInfo>, DownloadError> {
    let socket_timeout = config::download::SOCKET_TIMEOUT_SECS.to_string();
    let output = timeout(
        config::download::probe_timeout(),
        Command::new(&*config::YTDL_BIN)
            .args([
                "--dump-json",
                "--no-warnings",
                "--socket-timeout",
                socket_timeout.as_str(),
                url.as_str(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output(),
    )
    .await
    .map_err(|_| DownloadError::Timeout(format!("probing {} timed out", url)))?
    .map_err(|e| DownloadError::Process(format!("failed to run yt-dlp: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DownloadError::YtDlp(format!(
            "yt-dlp probe failed for {}: {}",
            url,
            stderr.trim()
        )));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Download one video and extract its audio track into the output
/// directory as `<video id>.mp3`.
///
/// Nothing is written to the cache here: a failed extraction leaves no
/// partial state behind except a temp file yt-dlp cleans itself.
pub async fn download_audio(info: &VideoInfo) -> Result<ExtractedAudio, DownloadError> {
    let output_dir = &*config::AUDIO_OUTPUT_DIR;
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| DownloadError::Process(format!("cannot create output dir {}: {}", output_dir, e)))?;

    let out_template = format!("{}/%(id)s.%(ext)s", output_dir);
    let retries = config::download::RETRIES.to_string();
    let socket_timeout = config::download::SOCKET_TIMEOUT_SECS.to_string();
    let watch_url = info.watch_url();
    log::info!("Starting download: {} ({})", info.title, watch_url);

    let output = timeout(
        config::download::fetch_timeout(),
        Command::new(&*config::YTDL_BIN)
            .args([
                "-o",
                out_template.as_str(),
                "--no-playlist",
                "--extract-audio",
                "--audio-format",
                config::audio::PREFERRED_CODEC,
                "--audio-quality",
                config::audio::QUALITY,
                "--add-metadata",
                "--embed-thumbnail",
                "--retries",
                retries.as_str(),
                "--socket-timeout",
                socket_timeout.as_str(),
                watch_url.as_str(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output(),
    )
    .await
    .map_err(|_| DownloadError::Timeout(format!("downloading {} timed out", info.title)))?
    .map_err(|e| DownloadError::Process(format!("failed to run yt-dlp: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DownloadError::YtDlp(format!(
            "failed downloading {}: {}",
            info.title,
            stderr.trim()
        )));
    }

    let path = audio_output_path(output_dir, &info.id);
    let file_size = tokio::fs::metadata(&path)
        .await
        .map_err(|_| DownloadError::FileNotFound(format!("expected audio file missing: {}", path.display())))?
        .len();

    if file_size > config::audio::MAX_FILE_SIZE_BYTES {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(DownloadError::TooLarge {
            video: info.title.clone(),
            size_bytes: file_size,
            limit_bytes: config::audio::MAX_FILE_SIZE_BYTES,
        });
    }

    Ok(ExtractedAudio { path, file_size })
}

fn audio_output_path(output_dir: &str, video_id: &str) -> PathBuf {
    Path::new(output_dir).join(format!("{}.{}", video_id, config::audio::PREFERRED_CODEC))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_one_json_object_per_line() {
        let stdout = concat!(
            r#"{"id":"abc123","title":"First","duration":200.4,"playlist_index":1}"#,
            "\n",
            r#"{"id":"def456","title":"Second","duration":100.0,"playlist_index":2}"#,
            "\n",
        );
        let entries = parse_probe_output(stdout).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "abc123");
        assert_eq!(entries[0].duration_secs(), Some(200));
        assert_eq!(entries[1].playlist_index, Some(2));
    }

    #[test]
    fn tolerates_missing_optional_fields() {
        let entries = parse_probe_output(r#"{"id":"x","title":"No duration"}"#).unwrap();
        assert_eq!(entries[0].duration_secs(), None);
        assert_eq!(entries[0].playlist_index, None);
        entries[0].check_duration().unwrap();
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(parse_probe_output("\n\n").is_err());
    }

    #[test]
    fn duration_ceiling_is_enforced() {
        let info = VideoInfo {
            id: "x".into(),
            title: "Ten hour loop".into(),
            duration: Some(36_000.0),
            playlist_index: None,
        };
        assert!(matches!(info.check_duration(), Err(DownloadError::TooLong { .. })));
    }

    #[test]
    fn watch_url_rebuilds_the_canonical_link() {
        let info = VideoInfo {
            id: "dQw4w9WgXcQ".into(),
            title: "t".into(),
            duration: None,
            playlist_index: None,
        };
        assert_eq!(info.watch_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }
}
