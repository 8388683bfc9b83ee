use std::sync::Arc;

use dashmap::DashSet;
use rusqlite::{OptionalExtension, Row, params};

use crate::core::error::{AppError, AppResult};
use crate::metadata::TrackMetadata;
use crate::storage::db::{DbPool, get_connection};

/// A previously delivered video: YouTube id mapped to the Telegram file
/// id that can be re-sent without downloading anything.
#[derive(Debug, Clone)]
pub struct CachedAudio {
    pub youtube_id: String,
    pub telegram_file_id: String,
    pub download_count: i64,
}

/// Track metadata attached to a cache entry after the first delivery.
#[derive(Debug, Clone)]
pub struct CachedMetadata {
    pub title: String,
    pub author: Option<String>,
    pub album: Option<String>,
    pub track_number: i64,
    pub release_date: Option<String>,
    pub file_size: i64,
    pub duration: i64,
}

fn audio_from_row(row: &Row<'_>) -> rusqlite::Result<CachedAudio> {
    Ok(CachedAudio {
        youtube_id: row.get(0)?,
        telegram_file_id: row.get(1)?,
        download_count: row.get(2)?,
    })
}

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<CachedMetadata> {
    Ok(CachedMetadata {
        title: row.get(0)?,
        author: row.get(1)?,
        album: row.get(2)?,
        track_number: row.get(3)?,
        release_date: row.get(4)?,
        file_size: row.get(5)?,
        duration: row.get(6)?,
    })
}

/// Marks a video id as being fetched right now. Dropping the guard
/// clears the marker.
pub struct InFlightGuard {
    in_flight: Arc<DashSet<String>>,
    youtube_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.youtube_id);
    }
}

/// Content-addressed cache of delivered audio, keyed by YouTube video
/// id with the Telegram file id as a secondary address.
///
/// The primary key is the dedup guarantee: `insert` is an
/// insert-if-absent, so two racing fetches of the same video converge
/// on a single row and the first-written file id wins. The counter
/// increment is a popularity metric, approximate under races by
/// design.
#[derive(Clone)]
pub struct AudioCache {
    pool: Arc<DbPool>,
    in_flight: Arc<DashSet<String>>,
}

impl AudioCache {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self {
            pool,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    /// Look a video up by its YouTube id.
    ///
    /// Three shapes: `(None, None)` miss; `(Some, None)` content cached
    /// with metadata still pending (replay the file, backfill metadata,
    /// never re-fetch content); `(Some, Some)` full hit.
    pub fn lookup(&self, youtube_id: &str) -> AppResult<(Option<CachedAudio>, Option<CachedMetadata>)> {
        let conn = get_connection(&self.pool)?;
        let entry = conn
            .query_row(
                "SELECT youtube_id, telegram_file_id, download_count
                 FROM audio_cache WHERE youtube_id = ?1",
                params![youtube_id],
                audio_from_row,
            )
            .optional()?;

        let Some(entry) = entry else {
            return Ok((None, None));
        };

        let metadata = conn
            .query_row(
                "SELECT title, author, album, track_number, release_date, file_size, duration
                 FROM audio_metadata WHERE youtube_id = ?1",
                params![youtube_id],
                metadata_from_row,
            )
            .optional()?;

        Ok((Some(entry), metadata))
    }

    /// Find an entry by the Telegram file id it was delivered as.
    pub fn find_by_file_id(&self, telegram_file_id: &str) -> AppResult<Option<CachedAudio>> {
        let conn = get_connection(&self.pool)?;
        let entry = conn
            .query_row(
                "SELECT youtube_id, telegram_file_id, download_count
                 FROM audio_cache WHERE telegram_file_id = ?1
                 LIMIT 1",
                params![telegram_file_id],
                audio_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Bump the reuse counter for a replayed entry and return the new
    /// value. Never touches the file id.
    pub fn record_hit(&self, youtube_id: &str) -> AppResult<i64> {
        let conn = get_connection(&self.pool)?;
        conn.execute(
            "UPDATE audio_cache SET download_count = download_count + 1 WHERE youtube_id = ?1",
            params![youtube_id],
        )?;
        let count = conn.query_row(
            "SELECT download_count FROM audio_cache WHERE youtube_id = ?1",
            params![youtube_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Record a delivered video and its metadata.
    ///
    /// Idempotent composite: losing an insert race (or re-running after
    /// a metadata-less first pass) never duplicates the row, and
    /// metadata is only attached where it is missing. Fails with
    /// `IncompleteEntry` when the metadata has no title.
    pub fn insert(
        &self,
        youtube_id: &str,
        telegram_file_id: &str,
        metadata: &TrackMetadata,
    ) -> AppResult<CachedAudio> {
        if metadata.title.trim().is_empty() {
            return Err(AppError::IncompleteEntry(youtube_id.to_string()));
        }

        let conn = get_connection(&self.pool)?;
        conn.execute(
            "INSERT INTO audio_cache (youtube_id, telegram_file_id)
             VALUES (?1, ?2)
             ON CONFLICT(youtube_id) DO NOTHING",
            params![youtube_id, telegram_file_id],
        )?;
        conn.execute(
            "INSERT INTO audio_metadata
                 (youtube_id, title, author, album, track_number, release_date, file_size, duration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(youtube_id) DO NOTHING",
            params![
                youtube_id,
                metadata.title,
                metadata.author,
                metadata.album,
                metadata.track_number,
                metadata.release_date,
                metadata.file_size.unwrap_or(0),
                metadata.duration.unwrap_or(0)
            ],
        )?;

        let entry = conn.query_row(
            "SELECT youtube_id, telegram_file_id, download_count
             FROM audio_cache WHERE youtube_id = ?1",
            params![youtube_id],
            audio_from_row,
        )?;
        Ok(entry)
    }

    /// Claim the right to fetch a video. Returns `None` while another
    /// task holds the claim, so concurrent requests for the same video
    /// do exactly one download.
    pub fn begin_download(&self, youtube_id: &str) -> Option<InFlightGuard> {
        if !self.in_flight.insert(youtube_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            youtube_id: youtube_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_audio_migrations_for_test;
    use pretty_assertions::assert_eq;
    use r2d2_sqlite::SqliteConnectionManager;

    fn test_cache() -> AudioCache {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON"));
        let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        let mut conn = pool.get().unwrap();
        run_audio_migrations_for_test(&mut conn).unwrap();
        drop(conn);
        AudioCache::new(Arc::new(pool))
    }

    fn titled(title: &str) -> TrackMetadata {
        TrackMetadata {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn lookup_miss_then_insert_then_hit() {
        let cache = test_cache();
        assert!(matches!(cache.lookup("abc123").unwrap(), (None, None)));

        cache.insert("abc123", "file-xyz", &titled("Song")).unwrap();

        let (entry, metadata) = cache.lookup("abc123").unwrap();
        let entry = entry.unwrap();
        assert_eq!(entry.telegram_file_id, "file-xyz");
        assert_eq!(entry.download_count, 1);
        assert_eq!(metadata.unwrap().title, "Song");

        assert_eq!(cache.record_hit("abc123").unwrap(), 2);
    }

    #[test]
    fn double_insert_keeps_first_file_id() {
        let cache = test_cache();
        cache.insert("abc123", "file-first", &titled("Song")).unwrap();
        let second = cache.insert("abc123", "file-second", &titled("Song")).unwrap();

        assert_eq!(second.telegram_file_id, "file-first");

        let conn = get_connection(&cache.pool).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM audio_cache", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn insert_without_title_is_rejected() {
        let cache = test_cache();
        let err = cache.insert("abc123", "file-xyz", &titled("  ")).unwrap_err();
        assert!(matches!(err, AppError::IncompleteEntry(_)));
        // Nothing was written
        assert!(matches!(cache.lookup("abc123").unwrap(), (None, None)));
    }

    #[test]
    fn metadata_backfills_without_touching_the_entry() {
        let cache = test_cache();
        let conn = get_connection(&cache.pool).unwrap();
        // Simulate the transient state: content cached, metadata pending
        conn.execute(
            "INSERT INTO audio_cache (youtube_id, telegram_file_id, download_count) VALUES ('v1', 'f1', 3)",
            [],
        )
        .unwrap();
        drop(conn);

        let (entry, metadata) = cache.lookup("v1").unwrap();
        assert!(entry.is_some());
        assert!(metadata.is_none());

        let entry = cache.insert("v1", "f-other", &titled("Late title")).unwrap();
        assert_eq!(entry.telegram_file_id, "f1");
        assert_eq!(entry.download_count, 3);

        let (_, metadata) = cache.lookup("v1").unwrap();
        assert_eq!(metadata.unwrap().title, "Late title");
    }

    #[test]
    fn find_by_file_id_resolves_the_secondary_address() {
        let cache = test_cache();
        cache.insert("abc123", "file-xyz", &titled("Song")).unwrap();

        let entry = cache.find_by_file_id("file-xyz").unwrap().unwrap();
        assert_eq!(entry.youtube_id, "abc123");
        assert!(cache.find_by_file_id("missing").unwrap().is_none());
    }

    #[test]
    fn in_flight_guard_admits_one_fetch_at_a_time() {
        let cache = test_cache();
        let guard = cache.begin_download("abc123").unwrap();
        assert!(cache.begin_download("abc123").is_none());
        // A different video is unaffected
        assert!(cache.begin_download("other").is_some());

        drop(guard);
        assert!(cache.begin_download("abc123").is_some());
    }
}
