//! Integration tests for the authorization stack over a real
//! file-backed database: bootstrap, access requests, and the
//! promotion/demotion paths.
//!
//! Run with: cargo test --test auth_flow_test

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use tonika::AppError;
use tonika::auth::{
    AccessRequestFlow, AccountStore, AuthHierarchy, ContactProfile, IdentityKey, Standing,
    bootstrap::{self, RootState},
};
use tonika::storage::{create_users_pool, get_connection};

struct TestStack {
    // Keeps the database directory alive for the duration of the test
    _dir: TempDir,
    accounts: AccountStore,
    hierarchy: AuthHierarchy,
    flow: AccessRequestFlow,
}

fn stack() -> TestStack {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("users.sqlite");
    let pool = Arc::new(create_users_pool(db_path.to_str().unwrap()).unwrap());

    let accounts = AccountStore::with_ban_threshold(pool, 5);
    let hierarchy = AuthHierarchy::new(accounts.clone());
    let flow = AccessRequestFlow::new(hierarchy.clone());
    TestStack {
        _dir: dir,
        accounts,
        hierarchy,
        flow,
    }
}

fn profile(numeric_id: Option<i64>, handle: Option<&str>) -> ContactProfile {
    ContactProfile {
        numeric_id,
        handle: handle.map(str::to_string),
        first_name: Some("Test".into()),
        last_name: None,
    }
}

#[test]
fn bootstrap_initializes_and_stays_idempotent() {
    let stack = stack();

    assert_eq!(bootstrap::diagnose(&stack.accounts, "rootuser").unwrap(), RootState::Fresh);

    bootstrap::ensure_root(&stack.hierarchy, "rootuser").unwrap();
    assert_eq!(
        bootstrap::diagnose(&stack.accounts, "rootuser").unwrap(),
        RootState::Initialized
    );

    // Second run must not duplicate anything
    bootstrap::ensure_root(&stack.hierarchy, "rootuser").unwrap();
    let conn = get_connection(stack.accounts.pool()).unwrap();
    let accounts: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0)).unwrap();
    let admins: i64 = conn.query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0)).unwrap();
    let roots: i64 = conn.query_row("SELECT COUNT(*) FROM roots", [], |r| r.get(0)).unwrap();
    assert_eq!((accounts, admins, roots), (1, 1, 1));
}

#[test]
fn bootstrap_flags_a_half_initialized_store_as_corrupted() {
    let stack = stack();
    bootstrap::ensure_root(&stack.hierarchy, "rootuser").unwrap();

    // Simulate a crashed initialization by removing the roots row
    let conn = get_connection(stack.accounts.pool()).unwrap();
    conn.execute("DELETE FROM roots", []).unwrap();
    drop(conn);

    assert_eq!(
        bootstrap::diagnose(&stack.accounts, "rootuser").unwrap(),
        RootState::Corrupted(2)
    );
    let err = bootstrap::ensure_root(&stack.hierarchy, "rootuser").unwrap_err();
    assert!(err.is_fatal());
}

/// The full access-request scenario: a stranger with numeric id 42
/// requests access and the root approves them as an admin bound to
/// notify channel 1001.
#[test]
fn request_then_admin_approval_scenario() {
    let stack = stack();
    bootstrap::ensure_root(&stack.hierarchy, "rootuser").unwrap();

    let key = IdentityKey::from_numeric_id(42);
    assert_eq!(stack.flow.standing(&key).unwrap(), Standing::Unknown);

    stack.flow.record_request(&profile(Some(42), None)).unwrap();
    let account = stack.accounts.find(&key).unwrap().unwrap();
    assert!(account.blocked);
    assert_eq!(account.access_request_count, 1);

    stack.flow.approve_admin(&key, 1001).unwrap().unwrap();

    let account = stack.accounts.find(&key).unwrap().unwrap();
    assert!(!account.blocked);
    assert_eq!(account.access_request_count, 0);

    let admin = stack.hierarchy.find_admin(&key).unwrap().unwrap();
    assert_eq!(admin.account_id, account.id);
    assert_eq!(admin.notify_channel, Some(1001));

    assert!(stack.hierarchy.is_admin(&key).unwrap());
    assert!(!stack.hierarchy.is_root(&key).unwrap());
    assert_eq!(stack.flow.standing(&key).unwrap(), Standing::Authorized);
}

#[test]
fn repeated_requests_self_ban_without_root_action() {
    let stack = stack();
    let key = IdentityKey::from_numeric_id(7);

    // threshold is 5: five requests stay pending, the sixth bans
    for expected_count in 1..=5 {
        assert_eq!(stack.flow.record_request(&profile(Some(7), None)).unwrap(), Standing::Pending);
        let account = stack.accounts.find(&key).unwrap().unwrap();
        assert_eq!(account.access_request_count, expected_count);
    }
    assert_eq!(stack.flow.record_request(&profile(Some(7), None)).unwrap(), Standing::Banned);

    let account = stack.accounts.find(&key).unwrap().unwrap();
    assert!(account.is_banned(5));
}

/// An admin adds a user by handle before Telegram ever showed us their
/// numeric id; the id is pinned on first contact and a handle change
/// afterwards cannot rebind the account.
#[test]
fn handle_first_account_pins_its_numeric_id() {
    let stack = stack();
    let handle_key = IdentityKey::from_handle("newcomer");

    stack
        .accounts
        .create(&handle_key, &profile(None, Some("newcomer")), false, 0)
        .unwrap();

    // First real contact: numeric id gets learned
    let merged = stack
        .accounts
        .upsert_from_contact(&handle_key, &profile(Some(4242), Some("newcomer")), false)
        .unwrap()
        .unwrap();
    assert_eq!(merged.numeric_id, Some(4242));

    // Someone else grabs the old handle: their key must not resolve to
    // the pinned account
    let squatter = IdentityKey::from_handle("newcomer");
    assert!(stack.accounts.find(&squatter).unwrap().is_none());

    // The numeric key keeps working, and a fresh handle observation
    // follows the account
    let renamed = stack
        .accounts
        .upsert_from_contact(&IdentityKey::from_numeric_id(4242), &profile(Some(4242), Some("renamed")), false)
        .unwrap()
        .unwrap();
    assert_eq!(renamed.handle.as_deref(), Some("renamed"));
}

#[test]
fn double_promotion_is_reported_not_duplicated() {
    let stack = stack();
    let key = IdentityKey::from_numeric_id(55);

    stack.hierarchy.promote_to_admin(&key, &profile(Some(55), None), None).unwrap();
    let err = stack
        .hierarchy
        .promote_to_admin(&key, &profile(Some(55), None), None)
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyExists(_)));

    let conn = get_connection(stack.accounts.pool()).unwrap();
    let admins: i64 = conn.query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0)).unwrap();
    assert_eq!(admins, 1);
}

#[test]
fn deny_then_ban_escalation() {
    let stack = stack();
    let key = IdentityKey::from_numeric_id(9);

    stack.flow.record_request(&profile(Some(9), None)).unwrap();
    stack.flow.deny(&key).unwrap().unwrap();
    assert_eq!(stack.flow.standing(&key).unwrap(), Standing::Pending);

    stack.flow.ban(&key).unwrap().unwrap();
    assert_eq!(stack.flow.standing(&key).unwrap(), Standing::Banned);

    // Manual intervention: approval clears the banned state
    stack.flow.approve_user(&key).unwrap().unwrap();
    assert_eq!(stack.flow.standing(&key).unwrap(), Standing::Authorized);
}

#[test]
fn root_notify_channels_follow_the_admin_rows() {
    let stack = stack();
    bootstrap::ensure_root(&stack.hierarchy, "rootuser").unwrap();
    assert!(stack.hierarchy.root_notify_channels().unwrap().is_empty());

    // Root opens a private chat for the first time
    stack
        .hierarchy
        .refresh_admin_contact(&profile(Some(100), Some("rootuser")), 100)
        .unwrap();
    assert_eq!(stack.hierarchy.root_notify_channels().unwrap(), vec![100]);

    // A plain admin's channel is not a root channel
    let admin_key = IdentityKey::from_numeric_id(200);
    stack
        .hierarchy
        .promote_to_admin(&admin_key, &profile(Some(200), None), Some(200))
        .unwrap();
    assert_eq!(stack.hierarchy.root_notify_channels().unwrap(), vec![100]);
}
