use rusqlite::params;

use crate::auth::accounts::AccountStore;
use crate::auth::hierarchy::AuthHierarchy;
use crate::auth::identity::{ContactProfile, IdentityKey};
use crate::core::error::{AppError, AppResult};
use crate::storage::db::get_connection;

/// Number of tables the root identity must appear in when the store is
/// initialized: accounts, admins, roots.
const ROOT_TIER_COUNT: usize = 3;

/// Classification of the root account's persisted state.
///
/// Pure diagnosis: remediation of a corrupted store is an operator
/// decision made through the CLI, never something the running bot does
/// on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootState {
    /// No trace of the root identity anywhere: a fresh database
    Fresh,
    /// Root present in all three tiers
    Initialized,
    /// Root present in some but not all tiers; the payload is how many
    Corrupted(usize),
}

/// Count how many of the three account tables contain the configured
/// root handle and classify the result.
pub fn diagnose(store: &AccountStore, root_handle: &str) -> AppResult<RootState> {
    let conn = get_connection(store.pool())?;

    let in_accounts: i64 = conn.query_row(
        "SELECT COUNT(*) FROM accounts WHERE handle = ?1",
        params![root_handle],
        |row| row.get(0),
    )?;
    let in_admins: i64 = conn.query_row(
        "SELECT COUNT(*) FROM admins a
         JOIN accounts u ON u.id = a.account_id
         WHERE u.handle = ?1",
        params![root_handle],
        |row| row.get(0),
    )?;
    let in_roots: i64 = conn.query_row(
        "SELECT COUNT(*) FROM roots r
         JOIN admins a ON a.account_id = r.admin_id
         JOIN accounts u ON u.id = a.account_id
         WHERE u.handle = ?1",
        params![root_handle],
        |row| row.get(0),
    )?;

    let total = (in_accounts + in_admins + in_roots) as usize;
    Ok(match total {
        0 => RootState::Fresh,
        ROOT_TIER_COUNT => RootState::Initialized,
        n => RootState::Corrupted(n),
    })
}

/// Make sure the root account exists in all three tiers before any
/// handler runs.
///
/// Fresh store: creates account + admin + root for the configured
/// handle and re-verifies; a failed re-check means a schema or
/// uniqueness problem and is fatal. Corrupted store: fatal, surfaced to
/// the operator (the `initdb --force` CLI path is the destructive
/// recovery). Idempotent on an initialized store.
pub fn ensure_root(hierarchy: &AuthHierarchy, root_handle: &str) -> AppResult<()> {
    match diagnose(hierarchy.accounts(), root_handle)? {
        RootState::Initialized => {
            log::info!("Welcome @{}", root_handle);
            Ok(())
        }
        RootState::Corrupted(count) => Err(AppError::CorruptedRootState {
            count,
            expected: ROOT_TIER_COUNT,
        }),
        RootState::Fresh => {
            let key = IdentityKey::from_handle(root_handle);
            let profile = ContactProfile {
                handle: Some(root_handle.to_string()),
                first_name: Some("Root".to_string()),
                last_name: Some("Root".to_string()),
                ..Default::default()
            };
            hierarchy.promote_to_admin(&key, &profile, None)?;
            hierarchy.promote_to_root(&key)?;

            match diagnose(hierarchy.accounts(), root_handle)? {
                RootState::Initialized => {
                    log::info!("Root @{} initialization completed", root_handle);
                    Ok(())
                }
                RootState::Fresh => Err(AppError::RootInitializationFailed {
                    count: 0,
                    expected: ROOT_TIER_COUNT,
                }),
                RootState::Corrupted(count) => Err(AppError::RootInitializationFailed {
                    count,
                    expected: ROOT_TIER_COUNT,
                }),
            }
        }
    }
}
