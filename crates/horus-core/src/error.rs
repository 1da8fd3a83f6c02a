//! Errors for packet decoding and configuration parsing.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("packet too short: {len} bytes, header needs {needed}")]
    Truncated { len: usize, needed: usize },

    #[error("unknown message kind: {0:#04x}")]
    UnknownKind(u8),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
