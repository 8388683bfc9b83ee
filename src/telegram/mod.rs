//! Telegram bot integration: dispatcher schema, commands, access
//! request flow, and progress reporting

pub mod access;
pub mod bot;
pub mod handlers;
pub mod progress;
pub mod types;

// Re-exports for convenience
pub use bot::{Command, create_bot, setup_bot_commands};
pub use handlers::schema;
pub use types::{HandlerDeps, HandlerError};
