//! Dispatcher schema and the command / link / callback handlers.
//!
//! Every endpoint wraps its real work in an error trap: a failing
//! request gets a friendly reply and an escalation to the root notify
//! channels, and the dispatcher keeps running.

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatKind, FileId, InputFile, User};
use url::Url;

use crate::auth::{ContactProfile, IdentityKey, Standing};
use crate::core::error::{AppError, AppResult};
use crate::download::{self, DownloadError, VideoInfo};
use crate::metadata::{self, TrackMetadata};
use crate::telegram::access::{
    self, BANNED_TEXT, handle_access_callback, notify_roots, repo_markup, request_markup, start_text,
};
use crate::telegram::bot::Command;
use crate::telegram::progress::{DeliveryStatus, ProgressMessage};
use crate::telegram::types::{HandlerDeps, HandlerError, contact_profile, describe_user, find_youtube_link, parse_identity_arg};

const AUDIO_CAPTION: &str = "Downloaded using @tonika_bot";

/// Creates the main dispatcher schema for the Telegram bot.
///
/// The same handler tree is used in production and in integration
/// tests.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_commands = deps.clone();
    let deps_links = deps.clone();
    let deps_callbacks = deps;

    dptree::entry()
        .branch(command_handler(deps_commands))
        .branch(link_handler(deps_links))
        .branch(callback_handler(deps_callbacks))
}

fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter_command::<Command>()
        .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                if let Err(e) = dispatch_command(&bot, &msg, cmd, &deps).await {
                    report_failure(&bot, &deps, &msg, &e).await;
                }
                Ok(())
            }
        })
}

/// Bare YouTube links sent in a private chat, without any command
fn link_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| {
            matches!(msg.chat.kind, ChatKind::Private(_))
                && msg.text().and_then(find_youtube_link).is_some()
        })
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                let link = msg.text().and_then(find_youtube_link).map(str::to_string);
                let result = match link {
                    Some(link) => handle_link_if_authorized(&bot, &msg, &deps, &link).await,
                    None => Ok(()),
                };
                if let Err(e) = result {
                    report_failure(&bot, &deps, &msg, &e).await;
                }
                Ok(())
            }
        })
}

fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query()
        .filter(|q: CallbackQuery| q.data.as_deref().is_some_and(access::is_access_callback))
        .endpoint(move |bot: Bot, q: CallbackQuery| {
            let deps = deps.clone();
            async move {
                if let Err(e) = handle_access_callback(&bot, &q, &deps).await {
                    log::error!("Access callback failed for {}: {}", describe_user(&q.from), e);
                    notify_roots(&bot, &deps, &format!("ACCESS CALLBACK ERROR\n{}", e)).await;
                }
                Ok(())
            }
        })
}

async fn dispatch_command(bot: &Bot, msg: &Message, cmd: Command, deps: &HandlerDeps) -> AppResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    refresh_admin_channel(deps, user, msg);

    match cmd {
        Command::Start => handle_start(bot, msg, user, deps).await,
        Command::Help => handle_help(bot, msg, user, deps).await,
        Command::Getmp3(arg) => {
            if !is_authorized(deps, user)? {
                return Ok(());
            }
            match find_youtube_link(&arg) {
                Some(link) => {
                    let link = link.to_string();
                    handle_youtube_link(bot, msg.chat.id, deps, &link).await
                }
                None => {
                    bot.send_message(msg.chat.id, "Sorry, that is not a valid YouTube link!").await?;
                    Ok(())
                }
            }
        }
        Command::Adduser(arg) => handle_add_user(bot, msg, user, deps, &arg).await,
        Command::Addadmin(arg) => handle_add_admin(bot, msg, user, deps, &arg).await,
    }
}

/// Every contact from an admin in a private chat refreshes their
/// account fields and notify channel.
fn refresh_admin_channel(deps: &HandlerDeps, user: &User, msg: &Message) {
    if matches!(msg.chat.kind, ChatKind::Private(_)) {
        if let Err(e) = deps.hierarchy.refresh_admin_contact(&contact_profile(user), msg.chat.id.0) {
            log::error!("Failed to refresh admin contact for {}: {}", describe_user(user), e);
        }
    }
}

fn user_key(user: &User) -> AppResult<IdentityKey> {
    IdentityKey::new(i64::try_from(user.id.0).ok(), user.username.as_deref())
}

fn is_authorized(deps: &HandlerDeps, user: &User) -> AppResult<bool> {
    Ok(deps.access_flow.standing(&user_key(user)?)? == Standing::Authorized)
}

async fn handle_start(bot: &Bot, msg: &Message, user: &User, deps: &HandlerDeps) -> AppResult<()> {
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        bot.send_message(msg.chat.id, "/start can only be used in private chats").await?;
        return Ok(());
    }
    log::info!("user start {}", describe_user(user));

    let profile = contact_profile(user);
    deps.accounts.upsert_from_contact(&profile.key()?, &profile, false)?;

    match deps.access_flow.standing(&profile.key()?)? {
        Standing::Banned => {
            bot.send_message(msg.chat.id, BANNED_TEXT)
                .reply_markup(repo_markup())
                .await?;
        }
        Standing::Authorized => {
            return Box::pin(handle_help(bot, msg, user, deps)).await;
        }
        Standing::Unknown | Standing::Pending => {
            let sent = bot.send_message(msg.chat.id, start_text(user.id.0)).await?;
            bot.edit_message_reply_markup(msg.chat.id, sent.id)
                .reply_markup(request_markup(msg.chat.id, sent.id))
                .await?;
        }
    }
    Ok(())
}

async fn handle_help(bot: &Bot, msg: &Message, user: &User, deps: &HandlerDeps) -> AppResult<()> {
    if !is_authorized(deps, user)? {
        return Ok(());
    }

    let mut help_text = String::from(
        "The following commands are available:\n\
         /help: list the commands available to you\n\
         /getmp3: download a YouTube video as mp3.\n\
         Example:\n/getmp3 https://www.youtube.com/watch?v=dQw4w9WgXcQ\n",
    );

    let key = user_key(user)?;
    if deps.hierarchy.is_admin(&key)? {
        help_text.push_str(
            "/adduser: authorize a user from a Telegram ID or handle.\n\
             Example:\n/adduser username or\n/adduser 12345678\n",
        );
        if deps.hierarchy.is_root(&key)? {
            help_text.push_str(
                "/addadmin: promote a user to admin from a Telegram ID or handle.\n\
                 Example:\n/addadmin username or\n/addadmin 12345678\n",
            );
        }
    }

    bot.send_message(msg.chat.id, help_text).await?;
    Ok(())
}

async fn handle_add_user(bot: &Bot, msg: &Message, user: &User, deps: &HandlerDeps, arg: &str) -> AppResult<()> {
    if !deps.hierarchy.is_admin(&user_key(user)?)? {
        bot.send_message(msg.chat.id, "This command can be used only by admin users").await?;
        return Ok(());
    }

    let key = match parse_identity_arg(arg) {
        Ok(key) => key,
        Err(reason) => {
            bot.send_message(msg.chat.id, reason).await?;
            return Ok(());
        }
    };

    let profile = ContactProfile {
        numeric_id: key.numeric_id(),
        handle: key.handle().map(str::to_string),
        ..Default::default()
    };
    match deps.accounts.create(&key, &profile, false, 0) {
        Ok(account) => {
            log::info!("{} authorized {}", describe_user(user), account.describe());
            bot.send_message(msg.chat.id, "Done! 👍").await?;
        }
        Err(AppError::AlreadyExists(what)) => {
            bot.send_message(msg.chat.id, format!("{}.. 😐", what)).await?;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn handle_add_admin(bot: &Bot, msg: &Message, user: &User, deps: &HandlerDeps, arg: &str) -> AppResult<()> {
    if !deps.hierarchy.is_root(&user_key(user)?)? {
        bot.send_message(msg.chat.id, "This command can be used only by the root user").await?;
        return Ok(());
    }

    let key = match parse_identity_arg(arg) {
        Ok(key) => key,
        Err(reason) => {
            bot.send_message(msg.chat.id, reason).await?;
            return Ok(());
        }
    };

    let profile = ContactProfile {
        numeric_id: key.numeric_id(),
        handle: key.handle().map(str::to_string),
        ..Default::default()
    };
    match deps.hierarchy.promote_to_admin(&key, &profile, None) {
        Ok(_) => {
            log::info!("{} promoted {} to admin", describe_user(user), key);
            bot.send_message(msg.chat.id, "Done! 👍").await?;
        }
        Err(AppError::AlreadyExists(what)) => {
            bot.send_message(msg.chat.id, format!("{}.. 😐", what)).await?;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn handle_link_if_authorized(bot: &Bot, msg: &Message, deps: &HandlerDeps, link: &str) -> AppResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    refresh_admin_channel(deps, user, msg);
    if !is_authorized(deps, user)? {
        return Ok(());
    }
    handle_youtube_link(bot, msg.chat.id, deps, link).await
}

/// The download pipeline: probe the link, then deliver every entry it
/// expands to (one for a plain video, several for a playlist).
pub async fn handle_youtube_link(bot: &Bot, chat_id: ChatId, deps: &HandlerDeps, link: &str) -> AppResult<()> {
    let url = parse_link(link)?;
    let mut progress = ProgressMessage::start(bot.clone(), chat_id).await?;
    progress.update(DeliveryStatus::FetchingInfo).await;

    let entries = match download::probe(&url).await {
        Ok(entries) => entries,
        Err(e) => {
            log::error!("[Probe Error] {}: {}", url, e);
            bot.send_message(chat_id, format!("Could not read that link: {}", e)).await?;
            return Ok(());
        }
    };

    progress
        .update(DeliveryStatus::InfoReady {
            playlist: entries.len() > 1,
        })
        .await;

    for entry in &entries {
        if let Err(e) = deliver_entry(bot, chat_id, deps, entry, &mut progress).await {
            // One bad playlist entry must not sink the rest
            log::error!("[Download Error] {} ({}): {}", entry.title, entry.id, e);
            bot.send_message(chat_id, e.to_string()).await?;
        }
    }

    progress.update(DeliveryStatus::Done).await;
    Ok(())
}

/// Links are accepted without a scheme ("youtu.be/..."), Url is not.
fn parse_link(link: &str) -> AppResult<Url> {
    if link.contains("://") {
        Ok(Url::parse(link)?)
    } else {
        Ok(Url::parse(&format!("https://{}", link))?)
    }
}

async fn deliver_entry(
    bot: &Bot,
    chat_id: ChatId,
    deps: &HandlerDeps,
    entry: &VideoInfo,
    progress: &mut ProgressMessage,
) -> Result<(), DownloadError> {
    progress.set_header(&entry.title, &entry.watch_url());

    let (cached, cached_metadata) = deps
        .audio_cache
        .lookup(&entry.id)
        .map_err(|e| DownloadError::Other(format!("cache lookup failed: {}", e)))?;

    if let Some(cached) = cached {
        return replay_cached(bot, chat_id, deps, entry, &cached, cached_metadata.is_none(), progress).await;
    }

    entry.check_duration()?;

    // Claim the fetch; somebody else holding it means the file will be
    // in the cache shortly, no point downloading it twice.
    let Some(_guard) = deps.audio_cache.begin_download(&entry.id) else {
        bot.send_message(
            chat_id,
            format!("{} is already being downloaded, try again in a moment", entry.title),
        )
        .await
        .map_err(|e| DownloadError::SendFailed(e.to_string()))?;
        return Ok(());
    };

    progress.update(DeliveryStatus::Downloading).await;
    let audio = download::download_audio(entry).await?;

    progress.update(DeliveryStatus::SearchingMetadata).await;
    let meta = enrich_metadata(deps, entry, audio.file_size).await;

    progress.update(DeliveryStatus::Uploading).await;
    let _ = bot.send_chat_action(chat_id, ChatAction::UploadDocument).await;
    let sent = bot
        .send_audio(chat_id, InputFile::file(audio.path.clone()))
        .caption(AUDIO_CAPTION)
        .title(meta.title.clone())
        .performer(meta.author.clone().unwrap_or_default())
        .await
        .map_err(|e| DownloadError::SendFailed(e.to_string()))?;

    // The local file has served its purpose once Telegram has it
    let _ = tokio::fs::remove_file(&audio.path).await;

    let Some(sent_audio) = sent.audio() else {
        return Err(DownloadError::SendFailed(
            "Telegram did not return an audio object".to_string(),
        ));
    };

    let meta = TrackMetadata {
        file_size: Some(i64::from(sent_audio.file.size)),
        duration: Some(i64::from(sent_audio.duration.seconds())),
        ..meta
    };
    deps.audio_cache
        .insert(&entry.id, &sent_audio.file.id.0, &meta)
        .map_err(|e| DownloadError::Other(format!("cache insert failed: {}", e)))?;

    Ok(())
}

/// Cache hit: resend the stored Telegram file and bump the counter. A
/// metadata-less entry gets its metadata backfilled, the content is
/// never fetched again.
async fn replay_cached(
    bot: &Bot,
    chat_id: ChatId,
    deps: &HandlerDeps,
    entry: &VideoInfo,
    cached: &crate::storage::CachedAudio,
    backfill_metadata: bool,
    progress: &mut ProgressMessage,
) -> Result<(), DownloadError> {
    progress
        .update(DeliveryStatus::AlreadyDownloaded {
            times: cached.download_count,
        })
        .await;

    bot.send_audio(chat_id, InputFile::file_id(FileId(cached.telegram_file_id.clone())))
        .caption(AUDIO_CAPTION)
        .await
        .map_err(|e| DownloadError::SendFailed(e.to_string()))?;

    deps.audio_cache
        .record_hit(&entry.id)
        .map_err(|e| DownloadError::Other(format!("cache hit update failed: {}", e)))?;

    if backfill_metadata {
        let meta = enrich_metadata(deps, entry, 0).await;
        if let Err(e) = deps.audio_cache.insert(&entry.id, &cached.telegram_file_id, &meta) {
            log::warn!("Metadata backfill failed for {}: {}", entry.id, e);
        }
    }
    Ok(())
}

/// Title heuristics first, then the catalog on top of them. A catalog
/// failure is logged and the heuristics stand alone.
async fn enrich_metadata(deps: &HandlerDeps, entry: &VideoInfo, file_size: u64) -> TrackMetadata {
    let mut base = metadata::metadata_from_title(&entry.title);
    base.duration = entry.duration_secs().map(i64::from);
    base.file_size = (file_size > 0).then_some(file_size as i64);

    let cleaned = metadata::clean_title(&entry.title);
    match deps.catalog.lookup(&cleaned).await {
        Ok(found) => metadata::merge(base, found),
        Err(e) => {
            log::warn!("Catalog lookup failed for '{}': {}", cleaned, e);
            base
        }
    }
}

/// Isolate a failed request: friendly reply to the chat, full error to
/// the root channels, never a crashed dispatcher.
async fn report_failure(bot: &Bot, deps: &HandlerDeps, msg: &Message, error: &AppError) {
    log::error!("Handler failed for chat {}: {}", msg.chat.id.0, error);

    let root_channels = deps.hierarchy.root_notify_channels().unwrap_or_default();
    if !root_channels.contains(&msg.chat.id.0) {
        let _ = bot
            .send_message(msg.chat.id, "Oooops! Something went wrong! 😓")
            .await;
    }
    notify_roots(
        bot,
        deps,
        &format!("HANDLER ERROR\nchat: {}\nerror: {}", msg.chat.id.0, error),
    )
    .await;
}
