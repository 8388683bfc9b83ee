//! Single-message progress reporting for a download request.
//!
//! The bot replies once and then edits that reply as the request moves
//! through its stages, the way long-running chat operations should look.

use teloxide::prelude::*;
use teloxide::types::MessageId;

/// Stages a request passes through, in the order a user sees them.
#[derive(Debug, Clone)]
pub enum DeliveryStatus {
    FetchingInfo,
    InfoReady { playlist: bool },
    AlreadyDownloaded { times: i64 },
    Downloading,
    SearchingMetadata,
    Uploading,
    Done,
}

impl DeliveryStatus {
    fn text(&self) -> String {
        match self {
            DeliveryStatus::FetchingInfo => "Getting video information...".to_string(),
            DeliveryStatus::InfoReady { playlist } => format!(
                "Information retrieved! Starting to download the {}...",
                if *playlist { "playlist" } else { "video" }
            ),
            DeliveryStatus::AlreadyDownloaded { times } => format!(
                "Audio found in the cache. Already downloaded {} {}",
                times,
                if *times == 1 { "time" } else { "times" }
            ),
            DeliveryStatus::Downloading => "Downloading and extracting audio...".to_string(),
            DeliveryStatus::SearchingMetadata => "Searching track metadata...".to_string(),
            DeliveryStatus::Uploading => "Uploading...".to_string(),
            DeliveryStatus::Done => "Done! ✅".to_string(),
        }
    }
}

/// Editor for the single progress reply of one request.
pub struct ProgressMessage {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
    /// Title + link header shown above the status once known
    header: Option<String>,
}

impl ProgressMessage {
    /// Send the initial reply and return its editor.
    pub async fn start(bot: Bot, chat_id: ChatId) -> Result<Self, teloxide::RequestError> {
        let message = bot.send_message(chat_id, "Managing your request...").await?;
        Ok(Self {
            bot,
            chat_id,
            message_id: message.id,
            header: None,
        })
    }

    /// Prefix every further status with the video title and link.
    pub fn set_header(&mut self, title: &str, url: &str) {
        self.header = Some(format!("{}\n{}\n\n", title, url));
    }

    /// Edit the progress message in place. Edit failures are logged and
    /// swallowed: progress text must never fail a download.
    pub async fn update(&self, status: DeliveryStatus) {
        let mut text = self.header.clone().unwrap_or_default();
        text.push_str(&status.text());

        if let Err(e) = self
            .bot
            .edit_message_text(self.chat_id, self.message_id, text)
            .await
        {
            log::debug!("Failed to edit progress message in chat {}: {}", self.chat_id.0, e);
        }
    }
}
