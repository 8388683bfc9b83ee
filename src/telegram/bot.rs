//! Bot initialization and command definitions

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::core::config;

/// Repository link shown on the welcome keyboard
pub const REPO_URL: &str = "https://github.com/Jacke/tonika";

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "I can do the following:")]
pub enum Command {
    #[command(description = "show the welcome message and your Telegram ID")]
    Start,
    #[command(description = "list the commands available to you")]
    Help,
    #[command(description = "download a YouTube video as mp3. Example:\n/getmp3 https://www.youtube.com/watch?v=dQw4w9WgXcQ")]
    Getmp3(String),
    #[command(description = "authorize a user by Telegram ID or @handle (admins only)")]
    Adduser(String),
    #[command(description = "promote a user to admin by Telegram ID or @handle (root only)")]
    Addadmin(String),
}

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Failed to create bot (invalid URL, network issues, etc.)
pub fn create_bot() -> anyhow::Result<Bot> {
    // Check if local Bot API server is configured
    let bot = if let Ok(bot_api_url) = std::env::var("BOT_API_URL") {
        log::info!("Using custom Bot API URL: {}", bot_api_url);
        let url = url::Url::parse(&bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
        Bot::from_env_with_client(ClientBuilder::new().timeout(config::network::timeout()).build()?).set_api_url(url)
    } else {
        Bot::from_env_with_client(ClientBuilder::new().timeout(config::network::timeout()).build()?)
    };

    Ok(bot)
}

/// Sets up bot commands in Telegram UI
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::types::BotCommand;

    bot.set_my_commands(vec![
        BotCommand::new("start", "show the welcome message and your Telegram ID"),
        BotCommand::new("help", "list the commands available to you"),
        BotCommand::new("getmp3", "download a YouTube video as mp3"),
        BotCommand::new("adduser", "authorize a user (admins only)"),
        BotCommand::new("addadmin", "promote a user to admin (root only)"),
    ])
    .await?;

    Ok(())
}
