//! Log error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur during log storage operations.
///
/// All of these are fatal for the operation that provoked them; the
/// database file itself stays consistent because no trailer is written
/// for a failed append.
#[derive(Debug, Error)]
pub enum LogError {
    /// I/O error during a log operation.
    #[error("log I/O error: {source}")]
    Io {
        /// Underlying error.
        #[from]
        source: io::Error,
    },

    /// The file exists but does not carry the log magic.
    #[error("not a grove log file: {path}")]
    NotALog {
        /// Offending path.
        path: PathBuf,
    },

    /// Malformed bytes before the last well-formed trailer.
    #[error("log corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// File offset of the malformed bytes.
        offset: u64,
        /// What went wrong.
        reason: String,
    },

    /// Transaction checksum mismatch.
    #[error("transaction checksum mismatch at offset {offset}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Offset of the trailer whose checksum failed.
        offset: u64,
        /// Checksum stored in the trailer.
        expected: u32,
        /// Checksum computed over the transaction bytes.
        computed: u32,
    },

    /// An object record exceeds the size limit.
    #[error("object record too large: {size} bytes exceeds maximum {max} bytes")]
    RecordTooLarge {
        /// Declared record size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A blob source yielded fewer bytes than declared.
    #[error("short blob payload: declared {declared} bytes, source yielded {copied}")]
    ShortBlob {
        /// Declared payload length.
        declared: u64,
        /// Bytes actually copied.
        copied: u64,
    },

    /// A blob reference points outside the file.
    #[error("blob reference out of bounds: offset {offset} + length {length} > file size {file_len}")]
    BlobOutOfBounds {
        /// Payload offset.
        offset: u64,
        /// Payload length.
        length: u64,
        /// Current file size.
        file_len: u64,
    },

    /// Advisory file lock acquisition failed.
    #[error("file lock failed: {reason}")]
    LockFailed {
        /// Errno description.
        reason: String,
    },

    /// Configuration error.
    #[error("log configuration error: {reason}")]
    ConfigError {
        /// What is invalid.
        reason: String,
    },
}

impl LogError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(offset: u64, expected: u32, computed: u32) -> Self {
        Self::ChecksumMismatch {
            offset,
            expected,
            computed,
        }
    }

    /// Creates a lock failure error.
    pub fn lock_failed(reason: impl Into<String>) -> Self {
        Self::LockFailed {
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Returns true if this error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupted { .. } | Self::ChecksumMismatch { .. } | Self::NotALog { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(LogError::corrupted(16, "bad tag").is_corruption());
        assert!(LogError::checksum_mismatch(16, 1, 2).is_corruption());
        assert!(!LogError::lock_failed("EAGAIN").is_corruption());
    }

    #[test]
    fn test_error_display() {
        let err = LogError::RecordTooLarge {
            size: 100,
            max: 10,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("100"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: LogError = io_err.into();
        assert!(matches!(err, LogError::Io { .. }));
    }
}
