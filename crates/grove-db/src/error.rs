//! Database error taxonomy.

use grove_codec::CodecError;
use grove_common::Oid;
use grove_log::LogError;
use grove_object::ObjectError;
use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors surfaced by the database API.
#[derive(Debug, Error)]
pub enum DbError {
    /// Concurrent writers mutated overlapping objects and no resolver
    /// repaired the overlap. The transaction must be aborted.
    #[error("write conflict on object {oid}")]
    WriteConflict {
        /// The contested object.
        oid: Oid,
    },

    /// A concurrent commit invalidated this transaction's read set.
    /// The transaction must be aborted.
    #[error("read conflict on object {oid}")]
    ReadConflict {
        /// The contested object.
        oid: Oid,
    },

    /// Commit attempted with a checked-out object that is not
    /// reachable from the root.
    #[error("object graph error: {reason}")]
    ObjectGraph {
        /// What is disconnected.
        reason: String,
    },

    /// The object belongs to a different database.
    #[error("object belongs to a different database")]
    ForeignObject,

    /// A root object has already been elected or loaded.
    #[error("this database already has a root object")]
    RootExists,

    /// Only never-persisted objects can be elected as root.
    #[error("cannot elect an already persisted object as root")]
    ElectPersisted,

    /// Snapshot target must be a fresh, empty database.
    #[error("snapshot target is not empty")]
    SnapshotTargetNotEmpty,

    /// The source graph holds a blob that has never been committed,
    /// which cannot be copied into a snapshot.
    #[error("cannot snapshot an uncommitted blob")]
    SnapshotPendingBlob,

    /// The codec refused an attribute value. Abort-only.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying codec error.
        #[from]
        source: CodecError,
    },

    /// I/O failure, corruption, or lock failure in the log.
    #[error("storage error: {source}")]
    Storage {
        /// Underlying log error.
        #[from]
        source: LogError,
    },

    /// Object-layer failure (read-only write, double attach, blob
    /// misuse).
    #[error(transparent)]
    Object {
        /// Underlying object error.
        #[from]
        source: ObjectError,
    },
}

impl DbError {
    /// Returns true for conflicts that a caller may retry after
    /// aborting.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::WriteConflict { .. } | Self::ReadConflict { .. }
        )
    }

    /// Creates an object-graph error.
    pub fn object_graph(reason: impl Into<String>) -> Self {
        Self::ObjectGraph {
            reason: reason.into(),
        }
    }
}
