use std::fmt;

use crate::core::error::{AppError, AppResult};

/// Lookup key for a Telegram identity: a numeric user id, a handle, or
/// both. At least one side must be present; the stores reject a key
/// with neither.
///
/// Numeric ids are authoritative once an account has learned one, so a
/// key carrying only a handle can never rebind to an account whose
/// numeric id is already known (see `AccountStore::find`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    numeric_id: Option<i64>,
    handle: Option<String>,
}

impl IdentityKey {
    /// Build a key from whatever the caller observed. Fails with
    /// `IdentityRequired` when both sides are absent.
    pub fn new(numeric_id: Option<i64>, handle: Option<&str>) -> AppResult<Self> {
        let handle = handle.map(normalize_handle).filter(|h| !h.is_empty());
        if numeric_id.is_none() && handle.is_none() {
            return Err(AppError::IdentityRequired);
        }
        Ok(Self { numeric_id, handle })
    }

    pub fn from_numeric_id(numeric_id: i64) -> Self {
        Self {
            numeric_id: Some(numeric_id),
            handle: None,
        }
    }

    pub fn from_handle(handle: &str) -> Self {
        Self {
            numeric_id: None,
            handle: Some(normalize_handle(handle)),
        }
    }

    pub fn numeric_id(&self) -> Option<i64> {
        self.numeric_id
    }

    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.numeric_id, self.handle.as_deref()) {
            (Some(id), Some(handle)) => write!(f, "[{}] @{}", id, handle),
            (Some(id), None) => write!(f, "[{}]", id),
            (None, Some(handle)) => write!(f, "@{}", handle),
            (None, None) => write!(f, "<empty>"),
        }
    }
}

/// Everything the messaging collaborator tells us about a user on
/// contact. All fields are best-effort observations; `None` means "not
/// observed this time", never "clear the stored value".
#[derive(Debug, Clone, Default)]
pub struct ContactProfile {
    pub numeric_id: Option<i64>,
    pub handle: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl ContactProfile {
    pub fn key(&self) -> AppResult<IdentityKey> {
        IdentityKey::new(self.numeric_id, self.handle.as_deref())
    }
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_string()
}
