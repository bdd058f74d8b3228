/// Core error type for the moderation bot.
///
/// Adapter crates should map their specific errors into this type so the core
/// can tell configuration mistakes from recoverable remote failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("bot start timed out after {0:?}")]
    StartupTimeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("telegram error: {0}")]
    Telegram(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
