//! Handler types, dependencies, and identity parsing helpers

use std::sync::Arc;

use lazy_regex::regex;
use teloxide::types::User;

use crate::auth::{AccessRequestFlow, AccountStore, AuthHierarchy, ContactProfile, IdentityKey};
use crate::metadata::CatalogProvider;
use crate::storage::AudioCache;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub accounts: AccountStore,
    pub hierarchy: AuthHierarchy,
    pub access_flow: AccessRequestFlow,
    pub audio_cache: AudioCache,
    pub catalog: Arc<dyn CatalogProvider>,
}

impl HandlerDeps {
    pub fn new(
        accounts: AccountStore,
        hierarchy: AuthHierarchy,
        access_flow: AccessRequestFlow,
        audio_cache: AudioCache,
        catalog: Arc<dyn CatalogProvider>,
    ) -> Self {
        Self {
            accounts,
            hierarchy,
            access_flow,
            audio_cache,
            catalog,
        }
    }
}

/// What the Telegram user object tells us on every contact
pub fn contact_profile(user: &User) -> ContactProfile {
    ContactProfile {
        numeric_id: i64::try_from(user.id.0).ok(),
        handle: user.username.clone(),
        first_name: Some(user.first_name.clone()),
        last_name: user.last_name.clone(),
    }
}

/// "[42] First Last @handle" for logs and root notifications
pub fn describe_user(user: &User) -> String {
    let mut text = format!("[{}] {}", user.id.0, user.first_name);
    if let Some(last_name) = &user.last_name {
        text.push(' ');
        text.push_str(last_name);
    }
    if let Some(username) = &user.username {
        text.push_str(" @");
        text.push_str(username);
    }
    text
}

/// Parse the argument of /adduser and /addadmin: a numeric Telegram ID
/// or a handle with optional @ / # prefix.
///
/// Telegram handles are 5-32 characters of A-z, 0-9 and underscores.
pub fn parse_identity_arg(text: &str) -> Result<IdentityKey, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("Give me a Telegram ID or a @handle".to_string());
    }

    if let Some(digits) = text.split_whitespace().find(|part| part.chars().all(|c| c.is_ascii_digit())) {
        return digits
            .parse::<i64>()
            .map(IdentityKey::from_numeric_id)
            .map_err(|_| "That Telegram ID does not fit in an integer".to_string());
    }

    if let Some(captures) = regex!(r"^#?@?([A-Za-z0-9_]+)").captures(text) {
        let without_at = &captures[1];
        // https://core.telegram.org/method/account.checkUsername
        if without_at.len() < 5 || without_at.len() > 32 {
            return Err("Handle length must be 5-32 characters".to_string());
        }
        return Ok(IdentityKey::from_handle(without_at));
    }

    Err("Accepted: A-z (case-insensitive), 0-9 and underscores, 5-32 characters".to_string())
}

/// True when the text is a YouTube link we should try to download
pub fn find_youtube_link(text: &str) -> Option<&str> {
    regex!(r"^((http(s)?://)?)(www\.)?(m\.)?((youtube\.com/)|(youtu\.be/))\S+")
        .find(text.trim())
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn numeric_argument_becomes_a_numeric_key() {
        let key = parse_identity_arg("12345678").unwrap();
        assert_eq!(key.numeric_id(), Some(12345678));
        assert_eq!(key.handle(), None);
    }

    #[test]
    fn handle_argument_accepts_prefixes() {
        for arg in ["someone", "@someone", "#someone"] {
            let key = parse_identity_arg(arg).unwrap();
            assert_eq!(key.handle(), Some("someone"), "failed for {:?}", arg);
        }
    }

    #[test]
    fn short_handles_are_rejected() {
        assert!(parse_identity_arg("@abc").is_err());
        assert!(parse_identity_arg("").is_err());
    }

    #[test]
    fn youtube_links_are_detected() {
        assert!(find_youtube_link("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_some());
        assert!(find_youtube_link("youtu.be/NLqAF9hrVbY").is_some());
        assert!(find_youtube_link("m.youtube.com/watch?v=x").is_some());
        assert!(find_youtube_link("https://example.com/watch?v=x").is_none());
        assert!(find_youtube_link("just text").is_none());
    }
}
