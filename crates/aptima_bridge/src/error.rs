//! Error types for the extension bridge.

use crate::handle::Handle;
use crate::lifecycle::{LifecycleSignal, LifecycleState};

/// Errors surfaced by bridge operations.
///
/// Every variant is cloneable so the same failure can be handed to an async
/// handler and logged by the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Property not found: {0}")]
    PropertyNotFound(String),

    #[error("Property type mismatch at '{path}': expected {expected}, found {found}")]
    TypePropertyMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("No destination for message: {0}")]
    NoDestination(String),

    #[error("Environment has expired")]
    EnvironmentExpired,

    #[error("Buffer state error: {0}")]
    BufferState(String),

    #[error("Native call failed ({code}): {message}")]
    NativeCallFailure { code: i32, message: String },

    #[error("Handle not found: {0}")]
    HandleNotFound(Handle),

    #[error("Handle already released: {0}")]
    HandleAlreadyReleased(Handle),

    #[error("Handle {0} refers to an object of another type")]
    HandleTypeMismatch(Handle),

    #[error("Lifecycle signal {signal} rejected in state {from}")]
    InvalidLifecycleTransition {
        from: LifecycleState,
        signal: LifecycleSignal,
    },

    #[error("Extension is not started (state: {0})")]
    NotStarted(LifecycleState),

    #[error("Addon not found: {0}")]
    AddonNotFound(String),

    #[error("Addon already registered: {0}")]
    AddonAlreadyRegistered(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl BridgeError {
    /// Stable numeric code, suitable for carrying across the native boundary.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::InvalidArgument(_) => 1,
            BridgeError::PropertyNotFound(_) => 2,
            BridgeError::TypePropertyMismatch { .. } => 3,
            BridgeError::NoDestination(_) => 4,
            BridgeError::EnvironmentExpired => 5,
            BridgeError::BufferState(_) => 6,
            BridgeError::NativeCallFailure { code, .. } => *code,
            BridgeError::HandleNotFound(_) => 8,
            BridgeError::HandleAlreadyReleased(_) => 9,
            BridgeError::HandleTypeMismatch(_) => 10,
            BridgeError::InvalidLifecycleTransition { .. } => 11,
            BridgeError::NotStarted(_) => 12,
            BridgeError::AddonNotFound(_) => 13,
            BridgeError::AddonAlreadyRegistered(_) => 14,
            BridgeError::Json(_) => 15,
        }
    }

    /// Whether this error means the message could not be routed.
    pub fn is_no_destination(&self) -> bool {
        matches!(self, BridgeError::NoDestination(_))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json(err.to_string())
    }
}

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
