//! Session tokens.
//!
//! A token is `base64url(decimal user id) ":" base64url(32 random bytes)`.
//! The server only ever stores the SHA-256 of the secret half; the pair
//! `(user id, secret hash)` is the token identity used to find and close
//! every session authenticated with one token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::ids::UserId;

pub const SECRET_LEN: usize = 32;

/// A decoded but not yet validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub user_id: UserId,
    pub secret: [u8; SECRET_LEN],
}

/// `(user id, sha256(secret))`, the key of the token-identity registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenIdentity {
    pub user_id: UserId,
    pub key_hash: [u8; 32],
}

impl ParsedToken {
    pub fn identity(&self) -> TokenIdentity {
        TokenIdentity {
            user_id: self.user_id,
            key_hash: hash_secret(&self.secret),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token must have exactly two segments")]
    Segments,
    #[error("invalid user id segment")]
    UserId,
    #[error("invalid secret segment")]
    Secret,
}

pub fn generate_secret() -> [u8; SECRET_LEN] {
    rand::rng().random()
}

pub fn hash_secret(secret: &[u8]) -> [u8; 32] {
    Sha256::digest(secret).into()
}

pub fn encode_token(user_id: UserId, secret: &[u8; SECRET_LEN]) -> String {
    format!(
        "{}:{}",
        URL_SAFE_NO_PAD.encode(user_id.to_string()),
        URL_SAFE_NO_PAD.encode(secret)
    )
}

pub fn decode_token(raw: &str) -> Result<ParsedToken, TokenError> {
    let mut segments = raw.split(':');
    let (Some(id_part), Some(secret_part), None) =
        (segments.next(), segments.next(), segments.next())
    else {
        return Err(TokenError::Segments);
    };

    let id_bytes = URL_SAFE_NO_PAD
        .decode(id_part)
        .map_err(|_| TokenError::UserId)?;
    let id_str = std::str::from_utf8(&id_bytes).map_err(|_| TokenError::UserId)?;
    let user_id = crate::ids::parse_id(id_str).ok_or(TokenError::UserId)?;

    let secret_bytes = URL_SAFE_NO_PAD
        .decode(secret_part)
        .map_err(|_| TokenError::Secret)?;
    let secret: [u8; SECRET_LEN] = secret_bytes
        .try_into()
        .map_err(|_| TokenError::Secret)?;

    Ok(ParsedToken { user_id, secret })
}
