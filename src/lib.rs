//! tonika - Telegram bot that turns YouTube links into tagged mp3s
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging
//! - `auth`: identity resolution and the three-tier authorization model
//! - `storage`: database pools, migrations, and the audio dedup cache
//! - `download`: yt-dlp probing and audio extraction
//! - `metadata`: track metadata heuristics and the catalog seam
//! - `telegram`: bot integration and handlers

pub mod auth;
pub mod cli;
pub mod core;
pub mod download;
pub mod metadata;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use crate::core::{AppError, AppResult, config};
pub use crate::storage::{AudioCache, DbConnection, DbPool, create_audio_pool, create_users_pool, get_connection};
pub use crate::telegram::{HandlerDeps, create_bot, schema};
