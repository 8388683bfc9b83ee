use std::sync::Arc;

use rusqlite::{OptionalExtension, Row, params};

use crate::auth::identity::{ContactProfile, IdentityKey};
use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::storage::db::{DbPool, get_connection};

/// A known Telegram identity with its access state.
///
/// `numeric_id` is None until the account has been seen with a real
/// Telegram id (accounts created by an admin from a bare handle start
/// that way). Once set it never changes.
#[derive(Debug, Clone)]
pub struct Account {
    /// Row id; the owning key for the admin/root extension tables
    pub id: i64,
    pub numeric_id: Option<i64>,
    pub handle: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub last_seen: String,
    pub blocked: bool,
    pub access_request_count: i64,
}

impl Account {
    pub fn is_authorized(&self) -> bool {
        !self.blocked
    }

    pub fn is_banned(&self, ban_threshold: i64) -> bool {
        self.blocked && self.access_request_count > ban_threshold
    }

    /// "[42] First Last @handle" for logs and operator messages
    pub fn describe(&self) -> String {
        let mut text = match self.numeric_id {
            Some(id) => format!("[{}] {}", id, self.first_name),
            None => self.first_name.clone(),
        };
        if !self.last_name.is_empty() {
            text.push(' ');
            text.push_str(&self.last_name);
        }
        if let Some(handle) = &self.handle {
            text.push_str(" @");
            text.push_str(handle);
        }
        text
    }
}

const ACCOUNT_COLUMNS: &str = "id, numeric_id, handle, first_name, last_name, last_seen, blocked, access_request_count";

// Directional matching: a numeric id only ever matches the column, and
// a handle matches only while the stored numeric id is still unlearned.
// NULL binds make the absent side of the key match nothing.
const MATCH_PREDICATE: &str = "(numeric_id = ?1 OR (numeric_id IS NULL AND handle = ?2))";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        numeric_id: row.get(1)?,
        handle: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        last_seen: row.get(5)?,
        blocked: row.get::<_, i64>(6)? != 0,
        access_request_count: row.get(7)?,
    })
}

fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Persistent store of known accounts.
///
/// Constructed once at startup and cloned into handlers (it only holds
/// an `Arc` to the pool); lookups return `Option` rather than erroring
/// on absence.
#[derive(Clone)]
pub struct AccountStore {
    pool: Arc<DbPool>,
    ban_threshold: i64,
}

impl AccountStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self::with_ban_threshold(pool, *config::BAN_THRESHOLD)
    }

    pub fn with_ban_threshold(pool: Arc<DbPool>, ban_threshold: i64) -> Self {
        Self { pool, ban_threshold }
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    pub fn ban_threshold(&self) -> i64 {
        self.ban_threshold
    }

    /// Resolve a key to its stored account, if any.
    pub fn find(&self, key: &IdentityKey) -> AppResult<Option<Account>> {
        let conn = get_connection(&self.pool)?;
        let sql = format!(
            "SELECT {} FROM accounts WHERE {} LIMIT 1",
            ACCOUNT_COLUMNS, MATCH_PREDICATE
        );
        let account = conn
            .query_row(&sql, params![key.numeric_id(), key.handle()], account_from_row)
            .optional()?;
        Ok(account)
    }

    pub fn exists(&self, key: &IdentityKey) -> AppResult<bool> {
        Ok(self.find(key)?.is_some())
    }

    /// Merge an observed contact into the stored account.
    ///
    /// The numeric id is pinned: it is only written while the stored
    /// value is still unlearned. Handle and display fields follow the
    /// freshest observation. `last_seen` refreshes on every persist.
    ///
    /// Returns `None` (no side effects) when the key resolves to
    /// nothing and `create_if_missing` is false.
    pub fn upsert_from_contact(
        &self,
        key: &IdentityKey,
        profile: &ContactProfile,
        create_if_missing: bool,
    ) -> AppResult<Option<Account>> {
        let Some(mut account) = self.find(key)? else {
            if !create_if_missing {
                return Ok(None);
            }
            return self.create(key, profile, false, 0).map(Some);
        };

        if account.numeric_id.is_none() {
            account.numeric_id = profile.numeric_id;
        }
        if let Some(handle) = &profile.handle {
            account.handle = Some(handle.trim_start_matches('@').to_string());
        }
        if let Some(first_name) = &profile.first_name {
            account.first_name = first_name.clone();
        }
        if let Some(last_name) = &profile.last_name {
            account.last_name = last_name.clone();
        }

        let conn = get_connection(&self.pool)?;
        conn.execute(
            "UPDATE accounts
             SET numeric_id = ?1, handle = ?2, first_name = ?3, last_name = ?4, last_seen = ?5
             WHERE id = ?6",
            params![
                account.numeric_id,
                account.handle,
                account.first_name,
                account.last_name,
                now_timestamp(),
                account.id
            ],
        )?;
        drop(conn);

        // Re-read so last_seen reflects what was persisted
        self.find_by_id(account.id)
    }

    /// Create a fresh account for a key that must not already resolve.
    ///
    /// Two concurrent creates for the same identity race on the UNIQUE
    /// constraints; the loser observes `AlreadyExists`.
    pub fn create(
        &self,
        key: &IdentityKey,
        profile: &ContactProfile,
        blocked: bool,
        access_request_count: i64,
    ) -> AppResult<Account> {
        if let Some(existing) = self.find(key)? {
            return Err(AppError::AlreadyExists(format!("account {}", existing.describe())));
        }

        let numeric_id = profile.numeric_id.or(key.numeric_id());
        let handle = profile
            .handle
            .as_deref()
            .map(|h| h.trim_start_matches('@').to_string())
            .or_else(|| key.handle().map(str::to_string));

        let conn = get_connection(&self.pool)?;
        let inserted = conn.execute(
            "INSERT INTO accounts (numeric_id, handle, first_name, last_name, last_seen, blocked, access_request_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                numeric_id,
                handle,
                profile.first_name.as_deref().unwrap_or(""),
                profile.last_name.as_deref().unwrap_or(""),
                now_timestamp(),
                blocked as i64,
                access_request_count
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::AlreadyExists(format!("account {}", key)));
            }
            Err(e) => return Err(e.into()),
        }
        let id = conn.last_insert_rowid();
        drop(conn);

        self.find_by_id(id)?
            .ok_or_else(|| AppError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Overwrite the blocked flag and request counter, refreshing
    /// last_seen. Used by the access-request flow transitions.
    pub fn set_standing(&self, account_id: i64, blocked: bool, access_request_count: i64) -> AppResult<()> {
        let conn = get_connection(&self.pool)?;
        conn.execute(
            "UPDATE accounts
             SET blocked = ?1, access_request_count = ?2, last_seen = ?3
             WHERE id = ?4",
            params![blocked as i64, access_request_count, now_timestamp(), account_id],
        )?;
        Ok(())
    }

    pub fn is_authorized(&self, account: &Account) -> bool {
        account.is_authorized()
    }

    pub fn is_banned(&self, account: &Account) -> bool {
        account.is_banned(self.ban_threshold)
    }

    fn find_by_id(&self, id: i64) -> AppResult<Option<Account>> {
        let conn = get_connection(&self.pool)?;
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        let account = conn.query_row(&sql, params![id], account_from_row).optional()?;
        Ok(account)
    }
}
