use std::sync::Arc;

use anyhow::{Context, Result, bail};
use dotenvy::dotenv;
use teloxide::prelude::*;

use tonika::auth::{AccessRequestFlow, AccountStore, AuthHierarchy, bootstrap};
use tonika::cli::{Cli, Commands};
use tonika::core::{config, init_logger};
use tonika::metadata::NoCatalog;
use tonika::storage::{AudioCache, create_audio_pool, create_users_pool};
use tonika::telegram::{HandlerDeps, create_bot, schema, setup_bot_commands};

/// Main entry point for the Telegram bot
///
/// Parses CLI arguments and dispatches to the appropriate subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Catch panics from inside the dispatcher so one poisoned update
    // cannot take the process down silently
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    init_logger(&config::LOG_FILE_PATH)?;

    // Load environment variables from .env if present
    let _ = dotenv();

    match cli.command {
        Some(Commands::Run) | None => run_bot().await,
        Some(Commands::Initdb { force }) => run_initdb(force),
        Some(Commands::Diagnose) => run_diagnose(),
    }
}

fn required_root_handle() -> Result<String> {
    match config::root_handle() {
        Some(handle) => Ok(handle),
        None => bail!("TONIKA_ROOT is not set; the bot cannot start without a root handle"),
    }
}

/// Build the store stack over freshly opened pools.
fn build_deps() -> Result<HandlerDeps> {
    let users_pool = Arc::new(create_users_pool(&config::USERS_DB_PATH).context("open users database")?);
    let audio_pool = Arc::new(create_audio_pool(&config::AUDIO_DB_PATH).context("open audio database")?);

    let accounts = AccountStore::new(users_pool);
    let hierarchy = AuthHierarchy::new(accounts.clone());
    let access_flow = AccessRequestFlow::new(hierarchy.clone());
    let audio_cache = AudioCache::new(audio_pool);

    Ok(HandlerDeps::new(
        accounts,
        hierarchy,
        access_flow,
        audio_cache,
        Arc::new(NoCatalog),
    ))
}

async fn run_bot() -> Result<()> {
    let root_handle = required_root_handle()?;
    let deps = build_deps()?;

    // The root invariant must hold before the first update is handled.
    // A corrupted store is fatal here: recovery is `tonika initdb
    // --force`, an explicit operator decision.
    bootstrap::ensure_root(&deps.hierarchy, &root_handle).context("root bootstrap check")?;

    let bot = create_bot()?;
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    log::info!("Starting dispatcher");
    Dispatcher::builder(bot, schema(deps))
        .default_handler(|update| async move {
            log::debug!("Unhandled update: {:?}", update.id);
        })
        .error_handler(teloxide::error_handlers::LoggingErrorHandler::with_custom_text(
            "An error from the update listener",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn run_initdb(force: bool) -> Result<()> {
    let root_handle = required_root_handle()?;

    if force && std::path::Path::new(&*config::USERS_DB_PATH).exists() {
        log::warn!("--force: removing users database {}", &*config::USERS_DB_PATH);
        std::fs::remove_file(&*config::USERS_DB_PATH).context("remove users database")?;
    }

    let deps = build_deps()?;
    match bootstrap::ensure_root(&deps.hierarchy, &root_handle) {
        Ok(()) => {
            log::info!("Databases ready, root is @{}", root_handle);
            Ok(())
        }
        Err(e) if e.is_fatal() => {
            log::error!("{}", e);
            log::error!("Re-run with --force to drop the users database and recreate it");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn run_diagnose() -> Result<()> {
    let root_handle = required_root_handle()?;
    let deps = build_deps()?;

    match bootstrap::diagnose(&deps.accounts, &root_handle)? {
        bootstrap::RootState::Fresh => {
            log::info!("Fresh database: root @{} is not initialized yet (run `tonika initdb`)", root_handle);
            Ok(())
        }
        bootstrap::RootState::Initialized => {
            log::info!("Root @{} is initialized in all three tables", root_handle);
            Ok(())
        }
        bootstrap::RootState::Corrupted(count) => {
            log::error!(
                "Root @{} is present in {} of 3 tables; the store is corrupted (`tonika initdb --force` recreates it)",
                root_handle,
                count
            );
            bail!("corrupted root state")
        }
    }
}
