//! Track metadata: the shape attached to cached audio, the title
//! cleanup heuristics, and the narrow seam for external catalog
//! lookups.

use async_trait::async_trait;
use lazy_regex::regex;

use crate::core::error::AppResult;

/// Words that video titles carry but track names don't.
const NOISE_WORDS: &[&str] = &["ft", "feat", "Official", "Music", "Video", "Lyrics", "HD", "HQ"];

/// Metadata describing one track, as attached to a cache entry.
///
/// `title` is the only required field; everything else is best-effort
/// enrichment from the catalog provider or the title heuristics.
#[derive(Debug, Clone, Default)]
pub struct TrackMetadata {
    pub title: String,
    pub author: Option<String>,
    pub album: Option<String>,
    pub track_number: i64,
    pub release_date: Option<String>,
    pub file_size: Option<i64>,
    pub duration: Option<i64>,
}

impl TrackMetadata {
    /// "Author - Title (year), Album" for progress messages and captions
    pub fn display_name(&self) -> String {
        let mut text = String::new();
        if let Some(author) = &self.author {
            text.push_str(author);
            text.push_str(" - ");
        }
        text.push_str(&self.title);
        if let Some(date) = &self.release_date {
            if let Some(year) = date.get(..4) {
                text.push_str(&format!(" ({})", year));
            }
        }
        if let Some(album) = &self.album {
            text.push_str(", ");
            text.push_str(album);
        }
        text
    }
}

/// Strip the noise a YouTube title carries around the actual track
/// name: parenthesised/bracketed suffixes and stop-words like
/// "Official Video".
pub fn clean_title(original: &str) -> String {
    let no_parens = regex!(r"\(.*?\)").replace_all(original, "");
    let no_brackets = regex!(r"\[.*?\]").replace_all(&no_parens, "");

    let mut cleaned = no_brackets.to_string();
    for word in NOISE_WORDS {
        // Whole words only, so "Left" survives "ft"
        let pattern = regex::Regex::new(&format!(r"(?i)\b{}\b\.?", regex::escape(word)));
        if let Ok(re) = pattern {
            cleaned = re.replace_all(&cleaned, "").to_string();
        }
    }

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Best-effort metadata from the title alone. Video titles are very
/// often "Artist - Track"; when that shape holds we split it, otherwise
/// the cleaned title is all we have.
pub fn metadata_from_title(original_title: &str) -> TrackMetadata {
    let cleaned = clean_title(original_title);
    let source = if cleaned.is_empty() { original_title } else { &cleaned };

    if let Some((author, title)) = source.split_once(" - ") {
        let author = author.trim();
        let title = title.trim();
        if !author.is_empty() && !title.is_empty() {
            return TrackMetadata {
                title: title.to_string(),
                author: Some(author.to_string()),
                ..Default::default()
            };
        }
    }

    TrackMetadata {
        title: source.trim().to_string(),
        ..Default::default()
    }
}

/// External music catalog, looked up after a download to enrich the
/// heuristic metadata. Implementations wrap a real catalog API; the
/// bot only depends on this trait.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Look a cleaned title up. `Ok(None)` means the catalog had no
    /// confident match; failures are reported but never block delivery.
    async fn lookup(&self, cleaned_title: &str) -> AppResult<Option<TrackMetadata>>;
}

/// Provider used when no catalog is configured: every lookup misses,
/// leaving the title heuristics as the source of metadata.
pub struct NoCatalog;

#[async_trait]
impl CatalogProvider for NoCatalog {
    async fn lookup(&self, _cleaned_title: &str) -> AppResult<Option<TrackMetadata>> {
        Ok(None)
    }
}

/// Merge a catalog result over the heuristic base: catalog fields win
/// where present, the base fills the gaps, and probe-time facts
/// (size/duration) are kept.
pub fn merge(base: TrackMetadata, catalog: Option<TrackMetadata>) -> TrackMetadata {
    let Some(catalog) = catalog else {
        return base;
    };
    TrackMetadata {
        title: if catalog.title.trim().is_empty() { base.title } else { catalog.title },
        author: catalog.author.or(base.author),
        album: catalog.album.or(base.album),
        track_number: if catalog.track_number != 0 {
            catalog.track_number
        } else {
            base.track_number
        },
        release_date: catalog.release_date.or(base.release_date),
        file_size: base.file_size,
        duration: base.duration,
    }
}
