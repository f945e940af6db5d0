use autologin_core::{Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::token::{decode_identity, TokenIdentity, EXPIRY_UNAVAILABLE, UNKNOWN_USER_ID};

pub const EMAIL_KEY: &str = "cursorAuth/cachedEmail";
pub const REFRESH_TOKEN_KEY: &str = "cursorAuth/refreshToken";

/// The signed-in account as cached by the desktop client.
///
/// `user_id` and expiry are always derived from the refresh token when the
/// record is built; a token that fails to decode leaves them as sentinels.
#[derive(Debug, Clone)]
pub struct AccountSession {
    email: String,
    refresh_token: String,
    identity: Option<TokenIdentity>,
}

impl AccountSession {
    pub fn new(email: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        let email = email.into();
        let refresh_token = refresh_token.into();
        let identity = match decode_identity(&refresh_token) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "Could not decode refresh token claims");
                None
            }
        };
        Self {
            email,
            refresh_token,
            identity,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn identity(&self) -> Option<&TokenIdentity> {
        self.identity.as_ref()
    }

    pub fn user_id(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.user_id.as_str())
            .unwrap_or(UNKNOWN_USER_ID)
    }

    pub fn expiry(&self) -> String {
        self.identity
            .as_ref()
            .map(TokenIdentity::expiry_display)
            .unwrap_or_else(|| EXPIRY_UNAVAILABLE.to_string())
    }

    /// First `max_chars` characters of the token, for display.
    pub fn token_preview(&self, max_chars: usize) -> String {
        self.refresh_token.chars().take(max_chars).collect()
    }
}

/// Read-only view of the desktop client's `state.vscdb` key-value table.
pub struct CredentialStore {
    conn: Connection,
    db_path: PathBuf,
}

impl CredentialStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(Error::AccountUnavailable(format!(
                "state database not found at {}",
                db_path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::Storage(format!("Failed to open state db: {}", e)))?;

        Ok(Self {
            conn,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Look up one key. Blank values count as absent.
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value: Option<SqlValue> = self
            .conn
            .query_row(
                "SELECT value FROM ItemTable WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to query {}: {}", key, e)))?;

        let text = match value {
            Some(SqlValue::Text(s)) => Some(s),
            Some(SqlValue::Blob(bytes)) => String::from_utf8(bytes).ok(),
            _ => None,
        };
        Ok(text.filter(|s| !s.trim().is_empty()))
    }

    pub fn read_account(&self) -> Result<AccountSession> {
        let email = self.get_value(EMAIL_KEY).map_err(unavailable)?;
        let token = self.get_value(REFRESH_TOKEN_KEY).map_err(unavailable)?;

        match (email, token) {
            (Some(email), Some(token)) => {
                debug!(db = %self.db_path.display(), "Loaded cached account");
                Ok(AccountSession::new(email, token))
            }
            (email, token) => {
                let mut missing = Vec::new();
                if email.is_none() {
                    missing.push(EMAIL_KEY);
                }
                if token.is_none() {
                    missing.push(REFRESH_TOKEN_KEY);
                }
                Err(Error::AccountUnavailable(format!(
                    "missing {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

fn unavailable(e: Error) -> Error {
    match e {
        Error::AccountUnavailable(_) => e,
        other => Error::AccountUnavailable(other.to_string()),
    }
}

/// Open the store at `db_path` and read the cached account.
pub fn read_account(db_path: &Path) -> Result<AccountSession> {
    CredentialStore::open(db_path)
        .map_err(unavailable)?
        .read_account()
}
