use thiserror::Error;

use crate::download::DownloadError;

/// Centralized error types for the application
///
/// All errors in the application are converted to this enum for consistent error handling.
/// Uses `thiserror` for automatic error conversion and display formatting.
///
/// "Does not exist" is not an error anywhere in the stores: lookups
/// return `Option`. The variants here are contract violations,
/// conflicts, state corruption, and collaborator failures.
#[derive(Error, Debug)]
pub enum AppError {
    /// A lookup key was constructed with neither a numeric id nor a handle
    #[error("identity requires a numeric id or a handle")]
    IdentityRequired,

    /// Create/promote hit an entity that already exists (double
    /// promotion, racing create). Expected and recoverable: callers
    /// translate this into a friendly notice.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A cache insert was attempted without the required title
    #[error("cache entry for '{0}' is missing a title")]
    IncompleteEntry(String),

    /// The root account appears in some but not all of the three
    /// account tables. Fatal at startup; requires an operator decision.
    #[error("root account state is inconsistent: present in {count} of {expected} tables")]
    CorruptedRootState { count: usize, expected: usize },

    /// Root initialization ran but the re-check still failed, which
    /// points at a schema or uniqueness problem. Fatal.
    #[error("root initialization did not converge: present in {count} of {expected} tables")]
    RootInitializationFailed { count: usize, expected: usize },

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Download/yt-dlp errors
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// HTTP/Fetch errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// True for the startup-fatal state-corruption variants: the
    /// process must not serve traffic when one of these is returned.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::CorruptedRootState { .. } | AppError::RootInitializationFailed { .. }
        )
    }
}
