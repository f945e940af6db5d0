use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Account data unavailable: {0}")]
    AccountUnavailable(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("CDP: {0}")]
    Cdp(String),

    #[error("Cookie rejected: {0}")]
    CookieRejected(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;
