//! Log configuration.

use grove_common::constants::{BLOB_CHUNK_SIZE, MAX_OBJECT_RECORD_SIZE};

/// Configuration for a [`TransactionLog`](crate::TransactionLog).
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to verify transaction checksums during catch-up.
    pub verify_checksums: bool,

    /// Whether to fsync after writing a trailer.
    ///
    /// Disabling this trades durability for speed; only tests should
    /// turn it off.
    pub sync_on_commit: bool,

    /// Maximum size of a single encoded object record.
    pub max_record_size: usize,

    /// Chunk size for blob iteration.
    pub blob_chunk_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            sync_on_commit: true,
            max_record_size: MAX_OBJECT_RECORD_SIZE,
            blob_chunk_size: BLOB_CHUNK_SIZE,
        }
    }
}

impl LogConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets checksum verification on catch-up.
    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Sets fsync-on-commit behaviour.
    #[must_use]
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Sets the maximum encoded object record size.
    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Sets the blob iteration chunk size.
    #[must_use]
    pub fn with_blob_chunk_size(mut self, size: usize) -> Self {
        self.blob_chunk_size = size;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_record_size == 0 {
            return Err("max_record_size must be non-zero".to_string());
        }
        if self.blob_chunk_size == 0 {
            return Err("blob_chunk_size must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(LogConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::new()
            .with_verify_checksums(false)
            .with_sync_on_commit(false)
            .with_blob_chunk_size(1024);
        assert!(!config.verify_checksums);
        assert!(!config.sync_on_commit);
        assert_eq!(config.blob_chunk_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_chunk_size() {
        let config = LogConfig::new().with_blob_chunk_size(0);
        assert!(config.validate().is_err());
    }
}
