//! Error types for the extension runtime.

use aptima_bridge::BridgeError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Extension not running: {0}")]
    UnknownExtension(String),

    #[error("Extension {0} did not start in time")]
    StartTimeout(String),

    #[error("Extension {0} stopped before reaching started")]
    StartFailed(String),

    #[error("App already started")]
    AlreadyStarted,

    #[error("Channel closed")]
    ChannelClosed,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
