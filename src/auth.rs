// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Caller authentication for new sessions.
//!
//! The auth service issues HS256 tokens whose `sub` claim is the user id.
//! With a shared secret configured, a socket may only be opened for the
//! identity in its token. Without one, the relay trusts the path identity.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::identity::UserId;

/// Token claims shared with the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// Verifies that the caller owns the identity a socket claims.
#[derive(Clone)]
pub enum Authenticator {
    /// Accept the claimed identity as-is.
    Trusting,
    /// Require an HS256 token whose subject equals the claimed identity.
    Token {
        key: DecodingKey,
        validation: Validation,
    },
}

impl Authenticator {
    /// Token verification when a secret is given, trusting mode otherwise.
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => Authenticator::Token {
                key: DecodingKey::from_secret(secret.as_bytes()),
                validation: Validation::new(Algorithm::HS256),
            },
            _ => Authenticator::Trusting,
        }
    }

    pub fn requires_token(&self) -> bool {
        matches!(self, Authenticator::Token { .. })
    }

    /// Returns the authenticated identity, which always equals `claimed` on success.
    pub fn authenticate(&self, claimed: &UserId, token: Option<&str>) -> Result<UserId, RelayError> {
        let (key, validation) = match self {
            Authenticator::Trusting => return Ok(claimed.clone()),
            Authenticator::Token { key, validation } => (key, validation),
        };

        let token =
            token.ok_or_else(|| RelayError::Unauthenticated("missing bearer token".into()))?;
        let data = decode::<Claims>(token, key, validation)
            .map_err(|e| RelayError::Unauthenticated(e.to_string()))?;
        let authenticated = UserId::parse(&data.claims.sub)
            .map_err(|_| RelayError::Unauthenticated("token subject is not a user id".into()))?;

        if &authenticated != claimed {
            return Err(RelayError::AuthMismatch {
                claimed: claimed.clone(),
                authenticated,
            });
        }
        Ok(authenticated)
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authenticator::Trusting => f.write_str("Authenticator::Trusting"),
            Authenticator::Token { .. } => f.write_str("Authenticator::Token"),
        }
    }
}

/// Mints a token the way the auth service does. Used by tests and tooling.
pub fn sign_token(secret: &str, user_id: &UserId, ttl: Duration) -> Result<String, RelayError> {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_add(ttl)
        .as_secs();
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| RelayError::Config(e.to_string()))
}
