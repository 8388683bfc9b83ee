//! Self-service access requests and the root's decision buttons.
//!
//! A stranger pressing "Ask for access" fans the request out to every
//! root notify channel with four decision buttons. Decisions are
//! accepted only from the root, and never applied to the root account
//! itself.

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};

use crate::auth::{IdentityKey, Standing};
use crate::core::error::{AppError, AppResult};
use crate::telegram::bot::REPO_URL;
use crate::telegram::types::{HandlerDeps, contact_profile, describe_user};

pub const BANNED_TEXT: &str = "You have been banned because of too many access requests! 😑";

const CALLBACK_PREFIX: &str = "access";

pub fn start_text(user_id: u64) -> String {
    format!(
        "Welcome to tonika! ✌️\n\nYour Telegram ID is: {}\n\nAn admin can use this code to add your account \
         to the white list. 💪\nIf you don't know any admin who could do that for you, I'm sorry, but I \
         cannot give access to the entire world.. 😢",
        user_id
    )
}

// REPO_URL is a compile-time constant, the parse cannot fail at runtime
#[allow(clippy::unwrap_used)]
fn repo_button() -> InlineKeyboardButton {
    InlineKeyboardButton::url("GitHub", url::Url::parse(REPO_URL).unwrap())
}

pub fn repo_markup() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![repo_button()]])
}

/// Keyboard under the stranger's welcome message
pub fn request_markup(chat_id: ChatId, message_id: MessageId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback(
            "Ask for access",
            format!("{}:req:{}:{}", CALLBACK_PREFIX, chat_id.0, message_id.0),
        ),
        repo_button(),
    ]])
}

/// Keyboard under the request forwarded to the root
fn decision_markup(chat_id: ChatId, message_id: MessageId) -> InlineKeyboardMarkup {
    let data = |action: &str| format!("{}:{}:{}:{}", CALLBACK_PREFIX, action, chat_id.0, message_id.0);
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("Agree as user", data("user")),
            InlineKeyboardButton::callback("Agree as admin", data("admin")),
        ],
        vec![
            InlineKeyboardButton::callback("Deny", data("deny")),
            InlineKeyboardButton::callback("Ban!", data("ban")),
        ],
    ])
}

/// Send a line to every root notify channel. Delivery failures are
/// logged; escalation must never take a handler down.
pub async fn notify_roots(bot: &Bot, deps: &HandlerDeps, text: &str) {
    let channels = match deps.hierarchy.root_notify_channels() {
        Ok(channels) => channels,
        Err(e) => {
            log::error!("Failed to load root notify channels: {}", e);
            return;
        }
    };
    if channels.is_empty() {
        log::warn!("No root notify channel known yet; dropping message: {}", text);
    }
    for chat_id in channels {
        if let Err(e) = bot.send_message(ChatId(chat_id), text).await {
            log::error!("Failed to notify root chat {}: {}", chat_id, e);
        }
    }
}

fn parse_callback(data: &str) -> Option<(String, ChatId, MessageId)> {
    let mut parts = data.split(':');
    if parts.next()? != CALLBACK_PREFIX {
        return None;
    }
    let action = parts.next()?.to_string();
    let chat_id = ChatId(parts.next()?.parse().ok()?);
    let message_id = MessageId(parts.next()?.parse().ok()?);
    Some((action, chat_id, message_id))
}

pub fn is_access_callback(data: &str) -> bool {
    data.starts_with(CALLBACK_PREFIX)
}

/// Entry point for every `access:` callback query.
pub async fn handle_access_callback(bot: &Bot, q: &CallbackQuery, deps: &HandlerDeps) -> AppResult<()> {
    let Some((action, target_chat, target_message)) = q.data.as_deref().and_then(parse_callback) else {
        log::warn!("Unparseable access callback data: {:?}", q.data);
        return Ok(());
    };

    if action == "req" {
        handle_request(bot, q, deps, target_chat, target_message).await
    } else {
        handle_decision(bot, q, deps, &action, target_chat, target_message).await
    }
}

/// The stranger pressed "Ask for access" under their welcome message.
async fn handle_request(
    bot: &Bot,
    q: &CallbackQuery,
    deps: &HandlerDeps,
    chat_id: ChatId,
    message_id: MessageId,
) -> AppResult<()> {
    let profile = contact_profile(&q.from);

    if deps.access_flow.standing(&profile.key()?)? == Standing::Banned {
        bot.edit_message_text(chat_id, message_id, BANNED_TEXT)
            .reply_markup(repo_markup())
            .await?;
        bot.answer_callback_query(q.id.clone()).await?;
    } else {
        let request_text = format!(
            "The user:\n{}\nrequests access to tonika!",
            describe_user(&q.from)
        );
        let channels = deps.hierarchy.root_notify_channels()?;
        if channels.is_empty() {
            log::warn!("Access request from {} but no root notify channel is known", describe_user(&q.from));
        }
        for root_chat in channels {
            bot.send_message(ChatId(root_chat), request_text.clone())
                .reply_markup(decision_markup(chat_id, message_id))
                .await?;
        }

        let mut text = start_text(q.from.id.0);
        text.push_str("\n\nAccess requested ⌚");
        bot.edit_message_text(chat_id, message_id, text)
            .reply_markup(repo_markup())
            .await?;
        bot.answer_callback_query(q.id.clone()).text("Access requested").await?;
    }

    // Register (or re-count) the request after the user has been answered
    let standing = deps.access_flow.record_request(&profile)?;
    if standing == Standing::Banned {
        bot.edit_message_text(chat_id, message_id, BANNED_TEXT)
            .reply_markup(repo_markup())
            .await?;
    }
    Ok(())
}

/// The root pressed one of the four decision buttons.
///
/// Two gates before anything is applied: the acting user must be root,
/// and the target must not be (demoting or banning the root account is
/// rejected here, not inside the hierarchy).
async fn handle_decision(
    bot: &Bot,
    q: &CallbackQuery,
    deps: &HandlerDeps,
    action: &str,
    target_chat: ChatId,
    target_message: MessageId,
) -> AppResult<()> {
    let root_chat = q.message.as_ref().map(|m| m.chat().id);
    let acting_key = IdentityKey::new(i64::try_from(q.from.id.0).ok(), q.from.username.as_deref())?;

    if !deps.hierarchy.is_root(&acting_key)? {
        if let Some(chat) = root_chat {
            bot.send_message(chat, "This action is reserved for the root user").await?;
        }
        notify_roots(
            bot,
            deps,
            &format!(
                "[WARNING] The user:\n{}\ntried to send an access decision!\n\ncallback data: {:?}",
                describe_user(&q.from),
                q.data
            ),
        )
        .await;
        return Ok(());
    }

    // uid == cid for private chats, so the target chat is the target id
    let target_key = IdentityKey::from_numeric_id(target_chat.0);
    if deps.hierarchy.is_root(&target_key)? {
        if let Some(chat) = root_chat {
            bot.send_message(chat, "Refusing to change the root account").await?;
        }
        return Ok(());
    }

    let user_text = match action {
        "user" => format!("{}\n\nAccess granted! ✅", start_text(target_chat.0 as u64)),
        "admin" => format!("{}\n\nAccess granted as admin! 🎉", start_text(target_chat.0 as u64)),
        "deny" => format!("{}\n\nAccess denied 😕", start_text(target_chat.0 as u64)),
        "ban" => BANNED_TEXT.to_string(),
        other => {
            log::warn!("Unknown access action: {}", other);
            return Ok(());
        }
    };

    let applied = match action {
        "user" => deps.access_flow.approve_user(&target_key)?,
        "admin" => match deps.access_flow.approve_admin(&target_key, target_chat.0) {
            Ok(applied) => applied,
            // Approving an existing admin again is a notice, not a crash
            Err(AppError::AlreadyExists(what)) => {
                if let Some(chat) = root_chat {
                    bot.send_message(chat, format!("{}.. 😐", what)).await?;
                }
                bot.answer_callback_query(q.id.clone()).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        },
        "deny" => deps.access_flow.deny(&target_key)?,
        _ => deps.access_flow.ban(&target_key)?,
    };

    let Some(account) = applied else {
        if let Some(chat) = root_chat {
            bot.send_message(chat, "That account does not exist anymore.. 😐").await?;
        }
        return Ok(());
    };

    if let Err(e) = bot
        .edit_message_text(target_chat, target_message, user_text)
        .reply_markup(repo_markup())
        .await
    {
        // The welcome message may be gone or unchanged; the decision still stands
        log::debug!("Could not edit the requester's message: {}", e);
    }

    if let Some(chat) = root_chat {
        bot.send_message(chat, format!("Done! 👍 ({})", account.describe())).await?;
    }
    bot.answer_callback_query(q.id.clone()).await?;
    Ok(())
}
