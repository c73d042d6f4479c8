// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! User and session identifiers.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::RelayError;

/// Maximum length of a user id path segment.
pub const MAX_USER_ID_LEN: usize = 64;

/// Validates a user id format: 1..=64 ASCII alphanumerics, `-` or `_`.
fn validate_user_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_USER_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Opaque, stable identity issued by the auth service.
///
/// Cheap to clone; used as a map key by the registry and the backlog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(Arc<str>);

impl UserId {
    /// Parses and validates a user id.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        if validate_user_id(raw) {
            Ok(UserId(Arc::from(raw)))
        } else {
            Err(RelayError::InvalidUserId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-generated identifier of one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(uuid::Uuid::new_v4())
    }

    /// Short label for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_ids() {
        for raw in ["u1", "42", "alice_smith", "a-b-c", "x".repeat(64).as_str()] {
            let id = UserId::parse(raw).unwrap();
            assert_eq!(id.as_str(), raw);
        }
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = UserId::parse("alice_1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice_1\"");
        assert_eq!(
            serde_json::json!({ "user_id": id }),
            serde_json::json!({ "user_id": "alice_1" })
        );
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(
            UserId::parse(""),
            Err(RelayError::InvalidUserId(String::new()))
        );
    }

    #[test]
    fn test_parse_rejects_too_long() {
        assert!(UserId::parse(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_characters() {
        for raw in ["u 1", "u/1", "ü", "u1?", "u1%20"] {
            assert!(UserId::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_user_id_equality_and_display() {
        let a = UserId::parse("u1").unwrap();
        let b = UserId::parse("u1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "u1");
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }
}
