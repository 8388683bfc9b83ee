use crate::auth::accounts::{Account, AccountStore};
use crate::auth::hierarchy::AuthHierarchy;
use crate::auth::identity::{ContactProfile, IdentityKey};
use crate::core::error::AppResult;

/// A user's standing from the protocol's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    /// Never seen before
    Unknown,
    /// Requested access (or was denied) and may still retry
    Pending,
    /// May submit download requests
    Authorized,
    /// Crossed the request threshold; terminal until an operator steps in
    Banned,
}

/// The self-service access request state machine.
///
/// unknown → pending → {authorized | pending | banned}. Repeated
/// requests while blocked bump the counter, and crossing the threshold
/// bans without any root action: that auto-promotion is the abuse
/// throttle. Approvals and denials are root-only and arrive through the
/// callback flow in the telegram layer.
#[derive(Clone)]
pub struct AccessRequestFlow {
    hierarchy: AuthHierarchy,
}

impl AccessRequestFlow {
    pub fn new(hierarchy: AuthHierarchy) -> Self {
        Self { hierarchy }
    }

    pub fn hierarchy(&self) -> &AuthHierarchy {
        &self.hierarchy
    }

    fn accounts(&self) -> &AccountStore {
        self.hierarchy.accounts()
    }

    fn standing_of(&self, account: &Account) -> Standing {
        if self.accounts().is_banned(account) {
            Standing::Banned
        } else if account.is_authorized() {
            Standing::Authorized
        } else {
            Standing::Pending
        }
    }

    pub fn standing(&self, key: &IdentityKey) -> AppResult<Standing> {
        Ok(match self.accounts().find(key)? {
            Some(account) => self.standing_of(&account),
            None => Standing::Unknown,
        })
    }

    /// Register a self-service access request.
    ///
    /// First contact creates a blocked account with the counter at 1;
    /// repeated requests while blocked increment it and may tip the
    /// account into the banned state on their own. Requests from an
    /// already-authorized account are a no-op.
    pub fn record_request(&self, profile: &ContactProfile) -> AppResult<Standing> {
        let key = profile.key()?;
        let Some(account) = self.accounts().upsert_from_contact(&key, profile, false)? else {
            let account = self.accounts().create(&key, profile, true, 1)?;
            log::info!("Access requested by {}", account.describe());
            return Ok(self.standing_of(&account));
        };

        if account.is_authorized() {
            return Ok(Standing::Authorized);
        }

        let count = account.access_request_count + 1;
        self.accounts().set_standing(account.id, true, count)?;
        let standing = if count > self.accounts().ban_threshold() {
            log::warn!(
                "{} crossed the request threshold ({}) and is now banned",
                account.describe(),
                count
            );
            Standing::Banned
        } else {
            log::info!("Repeated access request by {} (count {})", account.describe(), count);
            Standing::Pending
        };
        Ok(standing)
    }

    /// Root approved the request as a plain user: unblock and reset the
    /// counter. An admin approved *down* to plain user loses the admin
    /// row.
    pub fn approve_user(&self, key: &IdentityKey) -> AppResult<Option<Account>> {
        let Some(account) = self.accounts().find(key)? else {
            return Ok(None);
        };

        if let Some(admin) = self.hierarchy.find_admin(key)? {
            self.hierarchy.demote_admin(&admin)?;
        }
        self.accounts().set_standing(account.id, false, 0)?;
        log::info!("Access approved for {}", account.describe());
        self.accounts().find(key)
    }

    /// Root approved the request as an admin: unblock, reset, and
    /// create the admin row bound to the requester's chat.
    pub fn approve_admin(&self, key: &IdentityKey, notify_channel: i64) -> AppResult<Option<Account>> {
        let Some(account) = self.accounts().find(key)? else {
            return Ok(None);
        };

        let profile = ContactProfile::default();
        self.hierarchy.promote_to_admin(key, &profile, Some(notify_channel))?;
        // promote_to_admin already unblocked and reset the counter
        log::info!("Access approved as admin for {}", account.describe());
        self.accounts().find(key)
    }

    /// Root denied the request: the account stays blocked and keeps its
    /// counter, so it may still retry (and eventually self-ban).
    pub fn deny(&self, key: &IdentityKey) -> AppResult<Option<Account>> {
        let Some(account) = self.accounts().find(key)? else {
            return Ok(None);
        };

        if let Some(admin) = self.hierarchy.find_admin(key)? {
            self.hierarchy.demote_admin(&admin)?;
        }
        self.accounts()
            .set_standing(account.id, true, account.access_request_count)?;
        log::info!("Access denied for {}", account.describe());
        self.accounts().find(key)
    }

    /// Root banned the requester outright: force the counter past the
    /// threshold so the banned classification holds from now on.
    pub fn ban(&self, key: &IdentityKey) -> AppResult<Option<Account>> {
        let Some(account) = self.accounts().find(key)? else {
            return Ok(None);
        };

        if let Some(admin) = self.hierarchy.find_admin(key)? {
            self.hierarchy.demote_admin(&admin)?;
        }
        self.accounts()
            .set_standing(account.id, true, self.accounts().ban_threshold() + 1)?;
        log::info!("Banned {}", account.describe());
        self.accounts().find(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_accounts_migrations_for_test;
    use pretty_assertions::assert_eq;
    use r2d2_sqlite::SqliteConnectionManager;
    use std::sync::Arc;

    fn test_flow() -> AccessRequestFlow {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON"));
        let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        let mut conn = pool.get().unwrap();
        run_accounts_migrations_for_test(&mut conn).unwrap();
        drop(conn);
        AccessRequestFlow::new(AuthHierarchy::new(AccountStore::with_ban_threshold(
            Arc::new(pool),
            5,
        )))
    }

    fn profile(numeric_id: i64) -> ContactProfile {
        ContactProfile {
            numeric_id: Some(numeric_id),
            first_name: Some("Req".into()),
            ..Default::default()
        }
    }

    #[test]
    fn first_request_creates_blocked_account() {
        let flow = test_flow();
        let key = IdentityKey::from_numeric_id(42);
        assert_eq!(flow.standing(&key).unwrap(), Standing::Unknown);

        assert_eq!(flow.record_request(&profile(42)).unwrap(), Standing::Pending);
        let account = flow.hierarchy().accounts().find(&key).unwrap().unwrap();
        assert!(account.blocked);
        assert_eq!(account.access_request_count, 1);
    }

    #[test]
    fn six_requests_cross_the_threshold_without_root_action() {
        let flow = test_flow();
        let key = IdentityKey::from_numeric_id(42);

        for _ in 0..5 {
            let standing = flow.record_request(&profile(42)).unwrap();
            assert_eq!(standing, Standing::Pending);
        }
        // Sixth request: counter reaches 6 > threshold 5
        assert_eq!(flow.record_request(&profile(42)).unwrap(), Standing::Banned);
        assert_eq!(flow.standing(&key).unwrap(), Standing::Banned);
    }

    #[test]
    fn approval_as_admin_resets_state_and_creates_extension() {
        let flow = test_flow();
        let key = IdentityKey::from_numeric_id(42);
        flow.record_request(&profile(42)).unwrap();

        let account = flow.approve_admin(&key, 1001).unwrap().unwrap();
        assert!(!account.blocked);
        assert_eq!(account.access_request_count, 0);

        let admin = flow.hierarchy().find_admin(&key).unwrap().unwrap();
        assert_eq!(admin.notify_channel, Some(1001));
        assert!(flow.hierarchy().is_admin(&key).unwrap());
        assert!(!flow.hierarchy().is_root(&key).unwrap());
        assert_eq!(flow.standing(&key).unwrap(), Standing::Authorized);
    }

    #[test]
    fn deny_keeps_counter_ban_forces_it_past_threshold() {
        let flow = test_flow();
        let key = IdentityKey::from_numeric_id(7);
        flow.record_request(&profile(7)).unwrap();
        flow.record_request(&profile(7)).unwrap();

        let denied = flow.deny(&key).unwrap().unwrap();
        assert!(denied.blocked);
        assert_eq!(denied.access_request_count, 2);
        assert_eq!(flow.standing(&key).unwrap(), Standing::Pending);

        let banned = flow.ban(&key).unwrap().unwrap();
        assert_eq!(banned.access_request_count, 6);
        assert_eq!(flow.standing(&key).unwrap(), Standing::Banned);
    }

    #[test]
    fn approving_down_to_user_demotes_an_admin() {
        let flow = test_flow();
        let key = IdentityKey::from_numeric_id(42);
        flow.record_request(&profile(42)).unwrap();
        flow.approve_admin(&key, 1001).unwrap();
        assert!(flow.hierarchy().is_admin(&key).unwrap());

        flow.approve_user(&key).unwrap().unwrap();
        assert!(!flow.hierarchy().is_admin(&key).unwrap());
        assert_eq!(flow.standing(&key).unwrap(), Standing::Authorized);
    }

    #[test]
    fn operations_on_unknown_targets_return_none() {
        let flow = test_flow();
        let key = IdentityKey::from_numeric_id(404);
        assert!(flow.approve_user(&key).unwrap().is_none());
        assert!(flow.deny(&key).unwrap().is_none());
        assert!(flow.ban(&key).unwrap().is_none());
    }
}
