//! System-wide constants for Grove.

// =============================================================================
// Log File Format
// =============================================================================

/// Magic bytes at the start of every log file; identifies format and version.
pub const LOG_MAGIC: [u8; 8] = *b"GRVLOG01";

/// Magic bytes terminating every transaction trailer.
pub const TRAILER_MAGIC: [u8; 8] = *b"GRVTXEND";

/// Record tag: codec-encoded object version.
pub const TAG_OBJECT: u8 = 0x01;

/// Record tag: raw blob payload.
pub const TAG_BLOB: u8 = 0x02;

/// Record tag: transaction trailer.
pub const TAG_TRAILER: u8 = 0x03;

/// Transaction trailer size in bytes.
///
/// tag (1) + txid (8) + n_objs (4) + prev_trailer_offset (8) +
/// crc32 (4) + magic (8) = 33 bytes.
pub const TRAILER_SIZE: usize = 33;

/// Byte offset of the first record (immediately after the file magic).
pub const FIRST_RECORD_OFFSET: u64 = LOG_MAGIC.len() as u64;

// =============================================================================
// Locking
// =============================================================================

/// Start of the advisory lock byte range guarding commits.
pub const LOCK_RANGE_START: u64 = 0;

/// Length of the advisory lock byte range.
pub const LOCK_RANGE_LEN: u64 = 1;

// =============================================================================
// Blobs
// =============================================================================

/// Chunk size used when iterating over a persisted blob (32 KiB).
pub const BLOB_CHUNK_SIZE: usize = 32 * 1024;

/// Buffer size used when copying blob payloads into the log (64 KiB).
pub const BLOB_COPY_BUFFER_SIZE: usize = 64 * 1024;

// =============================================================================
// Limits
// =============================================================================

/// Maximum size of a single encoded object record (16 MB).
///
/// Larger states indicate a modelling problem; the limit also bounds
/// allocations made while scanning untrusted log bytes.
pub const MAX_OBJECT_RECORD_SIZE: usize = 16 * 1024 * 1024;
