use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the configuration engine.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("nil reference: {0}")]
    NilReference(&'static str),

    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("invalid config for resource '{id}': {reason}")]
    InvalidResourceConfig { id: String, reason: String },

    #[error("observer already registered for owner '{owner}' on path '{path}'")]
    DuplicateConfigObserver { owner: String, path: String },

    #[error("resource '{0}' is reserved and cannot be removed")]
    ReservedResource(String),

    #[error("invalid path: '{0}'")]
    InvalidPath(String),

    #[error("required config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("failed to deserialize config: {0}")]
    DeserializeError(#[from] toml::de::Error),

    #[error("trigger error: {0}")]
    Trigger(String),
}

impl ConfigError {
    pub(crate) fn invalid_config(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResourceConfig {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
