use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

// The two stores are independent databases with independent schema
// histories, so each gets its own embedded migration set.
mod accounts_embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations/accounts");
}

mod audio_embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations/audio");
}

static MIGRATION_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn run_accounts_migrations(conn: &mut Connection) -> Result<()> {
    run_guarded(conn, |c| {
        accounts_embedded::migrations::runner()
            .run(c)
            .map(|_| ())
            .context("apply accounts migrations")
    })
}

pub fn run_audio_migrations(conn: &mut Connection) -> Result<()> {
    run_guarded(conn, |c| {
        audio_embedded::migrations::runner()
            .run(c)
            .map(|_| ())
            .context("apply audio migrations")
    })
}

/// Serialize migrations per-process and take an exclusive SQLite lock
/// to avoid concurrent runners interleaving on multi-instance startups.
fn run_guarded(conn: &mut Connection, apply: impl FnOnce(&mut Connection) -> Result<()>) -> Result<()> {
    let mutex = MIGRATION_LOCK.get_or_init(|| Mutex::new(()));
    // Recover from a poisoned lock: migrations are idempotent
    let _guard = match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Migration lock was poisoned, recovering...");
            poisoned.into_inner()
        }
    };

    conn.busy_timeout(Duration::from_secs(30))
        .context("set SQLite busy timeout")?;
    conn.execute_batch("BEGIN IMMEDIATE")
        .context("acquire migration lock")?;

    if let Err(err) = apply(&mut *conn) {
        let _ = conn.execute_batch("ROLLBACK");
        return Err(err);
    }

    conn.execute_batch("COMMIT").context("commit migrations")?;
    Ok(())
}

/// Run migrations for tests without the outer transaction wrapper
/// (refinery uses its own transactions internally)
#[doc(hidden)]
pub fn run_accounts_migrations_for_test(conn: &mut Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(30))
        .context("set SQLite busy timeout")?;

    accounts_embedded::migrations::runner()
        .run(conn)
        .map(|_| ())
        .context("apply accounts migrations")
}

#[doc(hidden)]
pub fn run_audio_migrations_for_test(conn: &mut Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(30))
        .context("set SQLite busy timeout")?;

    audio_embedded::migrations::runner()
        .run(conn)
        .map(|_| ())
        .context("apply audio migrations")
}
