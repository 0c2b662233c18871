use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Joins the two sorted participant identifiers inside a conversation key.
pub const KEY_SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationKeyError {
    #[error("participant identifier must not be empty")]
    EmptyParticipant,
    #[error("participant identifier `{0}` contains the reserved separator `{KEY_SEPARATOR}`")]
    ReservedSeparator(String),
    #[error("`{0}` is not a two-party conversation key")]
    Malformed(String),
}

/// Canonical partition key for the conversation between two users.
///
/// The key is a pure function of the unordered participant pair: the two
/// identifiers are ordered lexicographically and joined with
/// [`KEY_SEPARATOR`], so `derive(a, b) == derive(b, a)` and the value is
/// stable across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "64b1c2_64b1f9")]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Derives the key for an unordered pair of user identifiers.
    ///
    /// # Errors
    /// Returns [`ConversationKeyError`] when either identifier is blank or
    /// contains the separator.
    pub fn derive(a: &str, b: &str) -> Result<Self, ConversationKeyError> {
        let a = validate_participant(a)?;
        let b = validate_participant(b)?;
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self(format!("{low}{KEY_SEPARATOR}{high}")))
    }

    /// Parses a key received over the wire, enforcing the two-party shape.
    ///
    /// # Errors
    /// Returns [`ConversationKeyError::Malformed`] when the value does not
    /// split into two ordered, non-empty identifiers.
    pub fn parse(raw: &str) -> Result<Self, ConversationKeyError> {
        let mut parts = raw.split(KEY_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(low), Some(high), None)
                if is_canonical_participant(low) && is_canonical_participant(high) && low <= high =>
            {
                Ok(Self(raw.to_string()))
            }
            _ => Err(ConversationKeyError::Malformed(raw.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the two participants in canonical order.
    #[must_use]
    pub fn participants(&self) -> (&str, &str) {
        self.0
            .split_once(KEY_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }

    #[must_use]
    pub fn includes(&self, user_id: &str) -> bool {
        let (low, high) = self.participants();
        low == user_id || high == user_id
    }

    /// The other participant, if `user_id` is one of the two.
    #[must_use]
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        match self.participants() {
            (low, high) if low == user_id => Some(high),
            (low, high) if high == user_id => Some(low),
            _ => None,
        }
    }
}

/// Exactly what [`ConversationKey::derive`] would emit for one side.
fn is_canonical_participant(id: &str) -> bool {
    !id.is_empty() && id == id.trim()
}

fn validate_participant(id: &str) -> Result<&str, ConversationKeyError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ConversationKeyError::EmptyParticipant);
    }
    if id.contains(KEY_SEPARATOR) {
        return Err(ConversationKeyError::ReservedSeparator(id.to_string()));
    }
    Ok(id)
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConversationKey {
    type Error = ConversationKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConversationKey> for String {
    fn from(value: ConversationKey) -> Self {
        value.0
    }
}
