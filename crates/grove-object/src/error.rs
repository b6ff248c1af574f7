//! Object-layer error types.

use grove_common::Oid;
use thiserror::Error;

/// Result type for object operations.
pub type ObjectResult<T> = Result<T, ObjectError>;

/// Errors raised by the persistent object layer.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// Write attempted on an object whose overlay the calling thread
    /// does not own. Recoverable by checking the object out.
    #[error("object is read-only for this thread; check it out before writing")]
    ReadOnly,

    /// The object already belongs to another database.
    #[error("object already belongs to a different database")]
    AlreadyAttached,

    /// A different object is already registered under this OID.
    #[error("oid {oid} is already registered to a different object")]
    OidTaken {
        /// The contested identifier.
        oid: Oid,
    },

    /// Attribute read on a ghost: the object is known only by OID and
    /// no committed state for it has ever been loaded. A dangling
    /// reference stays in this state forever.
    #[error("object {oid} is an unresolved reference; no state has been loaded for it")]
    UnresolvedGhost {
        /// The referenced identifier.
        oid: Oid,
    },

    /// Read attempted on a blob that has not been committed yet.
    #[error("blob has not been committed; its bytes are not yet in the log")]
    BlobPending,

    /// The blob's pending source was already consumed.
    #[error("blob source already consumed")]
    BlobConsumed,

    /// I/O failure while reading a stored blob.
    #[error("blob read failed: {source}")]
    BlobRead {
        /// Underlying storage error.
        #[from]
        source: grove_log::LogError,
    },
}
