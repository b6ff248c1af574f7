//! Codec error types.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding object state.
///
/// All codec errors are abort-only: the transaction that provoked one
/// cannot proceed.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The attribute map could not be encoded.
    #[error("failed to encode object state: {reason}")]
    Encode {
        /// What went wrong.
        reason: String,
    },

    /// The payload could not be decoded.
    #[error("failed to decode object state: {reason}")]
    Decode {
        /// What went wrong.
        reason: String,
    },

    /// The save hook failed to produce a reference for an object or
    /// blob (for example, the blob's source was already consumed).
    #[error("failed to save reference: {reason}")]
    ReferenceSave {
        /// What went wrong.
        reason: String,
    },

    /// The load hook failed to materialise a reference.
    #[error("failed to load reference: {reason}")]
    ReferenceLoad {
        /// What went wrong.
        reason: String,
    },
}

impl CodecError {
    /// Creates an encode error.
    pub fn encode(reason: impl ToString) -> Self {
        Self::Encode {
            reason: reason.to_string(),
        }
    }

    /// Creates a decode error.
    pub fn decode(reason: impl ToString) -> Self {
        Self::Decode {
            reason: reason.to_string(),
        }
    }

    /// Creates a save-hook error.
    pub fn reference_save(reason: impl ToString) -> Self {
        Self::ReferenceSave {
            reason: reason.to_string(),
        }
    }

    /// Creates a load-hook error.
    pub fn reference_load(reason: impl ToString) -> Self {
        Self::ReferenceLoad {
            reason: reason.to_string(),
        }
    }
}
