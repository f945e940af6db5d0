//! Identity claims carried by the desktop client's refresh token.
//!
//! The token is never verified here. Only the payload segment is decoded to
//! learn the account's user id and expiry; the raw token stays opaque.

use autologin_core::{Error, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, Local};
use serde_json::Value;

/// Identity-provider prefix on the `sub` claim.
pub const SUBJECT_PREFIX: &str = "auth0|";

pub const UNKNOWN_USER_ID: &str = "unknown";
pub const EXPIRY_UNAVAILABLE: &str = "not available";

const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Claims decoded from a refresh token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub user_id: String,
    pub expires_at: DateTime<Local>,
}

impl TokenIdentity {
    pub fn expiry_display(&self) -> String {
        self.expires_at.format(EXPIRY_FORMAT).to_string()
    }
}

/// Pad a base64url segment with `=` up to a multiple of 4 characters.
pub fn pad_base64url(segment: &str) -> String {
    match segment.len() % 4 {
        0 => segment.to_string(),
        rem => format!("{}{}", segment, "=".repeat(4 - rem)),
    }
}

/// Decode the `sub` and `exp` claims of a JWT-style token.
pub fn decode_identity(token: &str) -> Result<TokenIdentity> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::Token("token has no payload segment".into()))?;

    let bytes = URL_SAFE
        .decode(pad_base64url(payload))
        .map_err(|e| Error::Token(format!("payload is not base64url: {}", e)))?;

    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Token(format!("payload is not JSON: {}", e)))?;

    let sub = claims
        .get("sub")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Token("missing claim: sub".into()))?;
    let user_id = sub.strip_prefix(SUBJECT_PREFIX).unwrap_or(sub).to_string();

    let exp = claims
        .get("exp")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .ok_or_else(|| Error::Token("missing claim: exp".into()))?;
    let expires_at = DateTime::from_timestamp(exp, 0)
        .ok_or_else(|| Error::Token(format!("exp out of range: {}", exp)))?
        .with_timezone(&Local);

    Ok(TokenIdentity {
        user_id,
        expires_at,
    })
}

#[cfg(test)]
pub(crate) fn make_token(claims: &Value) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}
