use crate::secrets::SecretError;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the pipeline
/// can handle failures consistently (user-facing reply vs fatal startup error).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("security violation: {0}")]
    Security(String),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
