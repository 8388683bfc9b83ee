//! Database pools, migrations, and the audio dedup cache

pub mod audio_cache;
pub mod db;
pub mod migrations;

// Re-exports for convenience
pub use audio_cache::{AudioCache, CachedAudio, CachedMetadata};
pub use db::{DbConnection, DbPool, create_audio_pool, create_users_pool, get_connection};
