//! Animation error types

use thiserror::Error;

/// Errors rejected at the animation API boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnimationError {
    /// A spring parameter is out of range
    #[error("Invalid spring config: {field} = {value} ({reason})")]
    InvalidConfig {
        field: &'static str,
        value: f32,
        reason: &'static str,
    },

    /// A target or jump value is NaN or infinite
    #[error("Non-finite {what}: {value}")]
    NonFiniteValue { what: &'static str, value: f32 },

    /// A group was asked to animate a key it was not created with
    #[error("Unknown spring group key: {0}")]
    UnknownKey(String),

    /// Decay options are out of range
    #[error("Invalid decay options: {0}")]
    InvalidDecay(String),

    /// Trail options are out of range
    #[error("Invalid trail options: {0}")]
    InvalidTrail(String),

    /// `set_global_loop()` was called after the global loop already existed
    #[error("Global frame loop already installed")]
    LoopAlreadyInstalled,
}

/// Result type for animation operations
pub type Result<T> = std::result::Result<T, AnimationError>;

/// Reject NaN and infinities
pub(crate) fn ensure_finite(what: &'static str, value: f32) -> Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AnimationError::NonFiniteValue { what, value })
    }
}
