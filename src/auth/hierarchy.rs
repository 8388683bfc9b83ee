use std::sync::Arc;

use rusqlite::{OptionalExtension, params};

use crate::auth::accounts::{Account, AccountStore, is_unique_violation};
use crate::auth::identity::{ContactProfile, IdentityKey};
use crate::core::error::{AppError, AppResult};
use crate::storage::db::{DbPool, get_connection};

/// Admin privilege row, one-to-one with an account.
///
/// `notify_channel` is the private chat the bot uses to reach this
/// admin; learned lazily from the first private message, None until
/// then.
#[derive(Debug, Clone)]
pub struct AdminExtension {
    pub account_id: i64,
    pub notify_channel: Option<i64>,
}

/// Root privilege row, one-to-one with an admin row.
#[derive(Debug, Clone)]
pub struct RootExtension {
    pub admin_id: i64,
}

/// The three-tier privilege model: roots ⊂ admins ⊂ accounts.
///
/// Role checks are join queries that apply the account matching rule
/// transitively, so an admin added by bare handle is still recognized
/// before their numeric id is learned. The hierarchy itself is
/// decision-free about who may act on whom; callers gate demote/ban on
/// `is_root(target)`.
#[derive(Clone)]
pub struct AuthHierarchy {
    pool: Arc<DbPool>,
    accounts: AccountStore,
}

impl AuthHierarchy {
    pub fn new(accounts: AccountStore) -> Self {
        Self {
            pool: Arc::clone(accounts.pool()),
            accounts,
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn find_admin(&self, key: &IdentityKey) -> AppResult<Option<AdminExtension>> {
        let conn = get_connection(&self.pool)?;
        let admin = conn
            .query_row(
                "SELECT a.account_id, a.notify_channel
                 FROM admins a
                 JOIN accounts u ON u.id = a.account_id
                 WHERE u.numeric_id = ?1 OR (u.numeric_id IS NULL AND u.handle = ?2)
                 LIMIT 1",
                params![key.numeric_id(), key.handle()],
                |row| {
                    Ok(AdminExtension {
                        account_id: row.get(0)?,
                        notify_channel: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(admin)
    }

    pub fn is_admin(&self, key: &IdentityKey) -> AppResult<bool> {
        Ok(self.find_admin(key)?.is_some())
    }

    pub fn is_root(&self, key: &IdentityKey) -> AppResult<bool> {
        let conn = get_connection(&self.pool)?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT r.admin_id
                 FROM roots r
                 JOIN admins a ON a.account_id = r.admin_id
                 JOIN accounts u ON u.id = a.account_id
                 WHERE u.numeric_id = ?1 OR (u.numeric_id IS NULL AND u.handle = ?2)
                 LIMIT 1",
                params![key.numeric_id(), key.handle()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Promote an identity to admin.
    ///
    /// Ensures the underlying account exists (created unblocked if
    /// absent) and clears any pending-request state, the same way an
    /// explicit approval does. Fails with `AlreadyExists` when the key
    /// already resolves to an admin.
    pub fn promote_to_admin(
        &self,
        key: &IdentityKey,
        profile: &ContactProfile,
        notify_channel: Option<i64>,
    ) -> AppResult<AdminExtension> {
        if let Some(existing) = self.find_admin(key)? {
            return Err(AppError::AlreadyExists(format!(
                "admin (account id {})",
                existing.account_id
            )));
        }

        let account = match self.accounts.upsert_from_contact(key, profile, false)? {
            Some(account) => account,
            None => self.accounts.create(key, profile, false, 0)?,
        };
        self.accounts.set_standing(account.id, false, 0)?;

        let conn = get_connection(&self.pool)?;
        let inserted = conn.execute(
            "INSERT INTO admins (account_id, notify_channel) VALUES (?1, ?2)",
            params![account.id, notify_channel],
        );
        match inserted {
            Ok(_) => {}
            // A racing promotion loses on the primary key and observes
            // the same conflict a pre-checked double promotion does
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::AlreadyExists(format!("admin {}", account.describe())));
            }
            Err(e) => return Err(e.into()),
        }
        log::info!("Promoted {} to admin", account.describe());

        Ok(AdminExtension {
            account_id: account.id,
            notify_channel,
        })
    }

    /// Promote an existing admin to root. There is exactly one root per
    /// deployment; this is only called by the bootstrap path.
    pub fn promote_to_root(&self, key: &IdentityKey) -> AppResult<RootExtension> {
        if self.is_root(key)? {
            return Err(AppError::AlreadyExists(format!("root {}", key)));
        }
        let admin = self
            .find_admin(key)?
            .ok_or_else(|| AppError::Anyhow(anyhow::anyhow!("cannot promote {} to root: not an admin", key)))?;

        let conn = get_connection(&self.pool)?;
        let inserted = conn.execute("INSERT INTO roots (admin_id) VALUES (?1)", params![admin.account_id]);
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::AlreadyExists(format!("root {}", key)));
            }
            Err(e) => return Err(e.into()),
        }
        log::info!("Promoted admin (account id {}) to root", admin.account_id);

        Ok(RootExtension {
            admin_id: admin.account_id,
        })
    }

    /// Remove an admin row. The underlying account is untouched;
    /// callers have already verified the target is not root.
    pub fn demote_admin(&self, admin: &AdminExtension) -> AppResult<()> {
        let conn = get_connection(&self.pool)?;
        let deleted = conn.execute("DELETE FROM admins WHERE account_id = ?1", params![admin.account_id])?;
        log::info!(
            "Demoted admin (account id {}, {} row(s) deleted)",
            admin.account_id,
            deleted
        );
        Ok(())
    }

    /// Merge a fresh contact observation into an admin's account and
    /// remember the private chat to notify them in. No-op for
    /// non-admins: every private message goes through this.
    pub fn refresh_admin_contact(&self, profile: &ContactProfile, notify_channel: i64) -> AppResult<()> {
        let key = profile.key()?;
        let Some(admin) = self.find_admin(&key)? else {
            return Ok(());
        };

        self.accounts.upsert_from_contact(&key, profile, false)?;
        if admin.notify_channel != Some(notify_channel) {
            let conn = get_connection(&self.pool)?;
            conn.execute(
                "UPDATE admins SET notify_channel = ?1 WHERE account_id = ?2",
                params![notify_channel, admin.account_id],
            )?;
        }
        Ok(())
    }

    /// Chats of every root admin with a learned notify channel. Used
    /// for access requests and error escalation.
    pub fn root_notify_channels(&self) -> AppResult<Vec<i64>> {
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT a.notify_channel
             FROM admins a
             JOIN roots r ON r.admin_id = a.account_id
             WHERE a.notify_channel IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    /// Resolve the account behind a key, for callers that already went
    /// through a role check and need the row itself.
    pub fn find_account(&self, key: &IdentityKey) -> AppResult<Option<Account>> {
        self.accounts.find(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_accounts_migrations_for_test;
    use pretty_assertions::assert_eq;
    use r2d2_sqlite::SqliteConnectionManager;

    fn test_hierarchy() -> AuthHierarchy {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON"));
        let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        let mut conn = pool.get().unwrap();
        run_accounts_migrations_for_test(&mut conn).unwrap();
        drop(conn);
        AuthHierarchy::new(AccountStore::with_ban_threshold(Arc::new(pool), 5))
    }

    fn profile(numeric_id: Option<i64>, handle: Option<&str>) -> ContactProfile {
        ContactProfile {
            numeric_id,
            handle: handle.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn double_promotion_conflicts_and_leaves_one_row() {
        let hierarchy = test_hierarchy();
        let key = IdentityKey::from_numeric_id(42);

        hierarchy.promote_to_admin(&key, &profile(Some(42), None), Some(1001)).unwrap();
        let err = hierarchy
            .promote_to_admin(&key, &profile(Some(42), None), Some(1002))
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));

        let conn = get_connection(hierarchy.accounts().pool()).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM admins", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn hierarchy_containment() {
        let hierarchy = test_hierarchy();
        let key = IdentityKey::from_handle("boss");

        hierarchy.promote_to_admin(&key, &profile(None, Some("boss")), None).unwrap();
        hierarchy.promote_to_root(&key).unwrap();

        // root implies admin implies account
        assert!(hierarchy.is_root(&key).unwrap());
        assert!(hierarchy.is_admin(&key).unwrap());
        assert!(hierarchy.accounts().exists(&key).unwrap());

        // and a plain admin is not root
        let other = IdentityKey::from_numeric_id(7);
        hierarchy.promote_to_admin(&other, &profile(Some(7), None), None).unwrap();
        assert!(hierarchy.is_admin(&other).unwrap());
        assert!(!hierarchy.is_root(&other).unwrap());
    }

    #[test]
    fn admin_added_by_handle_is_found_before_id_is_learned() {
        let hierarchy = test_hierarchy();
        hierarchy
            .promote_to_admin(&IdentityKey::from_handle("helper"), &profile(None, Some("helper")), None)
            .unwrap();

        assert!(hierarchy.is_admin(&IdentityKey::from_handle("helper")).unwrap());

        // First real contact pins the id; afterwards the numeric key works
        hierarchy
            .accounts()
            .upsert_from_contact(
                &IdentityKey::from_handle("helper"),
                &profile(Some(555), Some("helper")),
                false,
            )
            .unwrap();
        assert!(hierarchy.is_admin(&IdentityKey::from_numeric_id(555)).unwrap());
    }

    #[test]
    fn promote_to_root_requires_admin() {
        let hierarchy = test_hierarchy();
        let key = IdentityKey::from_numeric_id(9);
        hierarchy.accounts().create(&key, &profile(Some(9), None), false, 0).unwrap();

        assert!(hierarchy.promote_to_root(&key).is_err());
    }

    #[test]
    fn demote_removes_extension_but_keeps_account() {
        let hierarchy = test_hierarchy();
        let key = IdentityKey::from_numeric_id(42);
        let admin = hierarchy.promote_to_admin(&key, &profile(Some(42), None), None).unwrap();

        hierarchy.demote_admin(&admin).unwrap();
        assert!(!hierarchy.is_admin(&key).unwrap());
        assert!(hierarchy.accounts().exists(&key).unwrap());
    }

    #[test]
    fn refresh_admin_contact_learns_notify_channel() {
        let hierarchy = test_hierarchy();
        let key = IdentityKey::from_numeric_id(42);
        hierarchy.promote_to_admin(&key, &profile(Some(42), None), None).unwrap();
        hierarchy.promote_to_root(&key).unwrap();
        assert!(hierarchy.root_notify_channels().unwrap().is_empty());

        hierarchy
            .refresh_admin_contact(&profile(Some(42), Some("boss")), 42)
            .unwrap();
        assert_eq!(hierarchy.root_notify_channels().unwrap(), vec![42]);

        // Non-admins pass through silently
        hierarchy
            .refresh_admin_contact(&profile(Some(1000), None), 1000)
            .unwrap();
        assert_eq!(hierarchy.root_notify_channels().unwrap(), vec![42]);
    }
}
