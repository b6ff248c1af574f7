//! On-disk record framing.
//!
//! ```text
//! file       := magic(8) record*
//! record     := (obj_record | blob_record)* tx_trailer
//! obj_record := 0x01 len:u32 payload
//! blob_record:= 0x02 len:u64 payload
//! tx_trailer := 0x03 txid:u64 n_objs:u32 prev_trailer_offset:u64
//!               crc32:u32 magic_end(8)
//! ```
//!
//! Integers are little-endian. The CRC-32 covers every byte of the
//! transaction from its first record byte through the trailer's
//! `prev_trailer_offset` field inclusive.

use bytes::{Buf, BufMut};
use grove_common::constants::{TAG_BLOB, TAG_OBJECT, TAG_TRAILER, TRAILER_MAGIC, TRAILER_SIZE};
use grove_common::TxId;

use crate::error::{LogError, LogResult};

/// Size of an object record header: tag (1) + len (4).
pub const OBJECT_HEADER_SIZE: usize = 5;

/// Size of a blob record header: tag (1) + len (8).
pub const BLOB_HEADER_SIZE: usize = 9;

/// Transaction trailer (33 bytes on disk).
///
/// A trailer with `n_objs == 0` records a failed commit: readers count
/// it but skip it for state reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Transaction id, equal to commit order.
    pub txid: TxId,
    /// Number of object records in the transaction.
    pub n_objs: u32,
    /// File offset of the previous trailer's tag byte (0 for the first
    /// transaction).
    pub prev_trailer_offset: u64,
    /// CRC-32 over the transaction bytes.
    pub crc32: u32,
}

impl Trailer {
    /// Size of the trailer in bytes.
    pub const SIZE: usize = TRAILER_SIZE;

    /// Number of trailer bytes covered by the checksum (tag through
    /// `prev_trailer_offset`).
    pub const CRC_PREFIX_SIZE: usize = 1 + 8 + 4 + 8;

    /// Creates a trailer with an unset checksum.
    pub fn new(txid: TxId, n_objs: u32, prev_trailer_offset: u64) -> Self {
        Self {
            txid,
            n_objs,
            prev_trailer_offset,
            crc32: 0,
        }
    }

    /// Returns true if this trailer records a failed commit.
    pub fn is_failure_marker(&self) -> bool {
        self.n_objs == 0
    }

    /// Serializes the checksummed prefix (tag through
    /// `prev_trailer_offset`).
    pub fn encode_prefix(&self, buf: &mut impl BufMut) {
        buf.put_u8(TAG_TRAILER);
        buf.put_u64_le(self.txid.as_u64());
        buf.put_u32_le(self.n_objs);
        buf.put_u64_le(self.prev_trailer_offset);
    }

    /// Serializes the full trailer.
    pub fn encode(&self, buf: &mut impl BufMut) {
        self.encode_prefix(buf);
        buf.put_u32_le(self.crc32);
        buf.put_slice(&TRAILER_MAGIC);
    }

    /// Serializes the full trailer to a byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut cursor = &mut buf[..];
        self.encode(&mut cursor);
        buf
    }

    /// Finalizes the checksum: the hasher must already have consumed
    /// the transaction's record bytes.
    pub fn seal(&mut self, mut hasher: crc32fast::Hasher) {
        let mut prefix = [0u8; Self::CRC_PREFIX_SIZE];
        let mut cursor = &mut prefix[..];
        self.encode_prefix(&mut cursor);
        hasher.update(&prefix);
        self.crc32 = hasher.finalize();
    }

    /// Deserializes a trailer from exactly [`Trailer::SIZE`] bytes.
    ///
    /// `offset` is the trailer's file position, used for error
    /// reporting only.
    pub fn decode(bytes: &[u8], offset: u64) -> LogResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(LogError::corrupted(
                offset,
                format!("short trailer: {} bytes", bytes.len()),
            ));
        }

        let mut buf = bytes;
        let tag = buf.get_u8();
        if tag != TAG_TRAILER {
            return Err(LogError::corrupted(
                offset,
                format!("bad trailer tag {:#04x}", tag),
            ));
        }

        let txid = TxId::new(buf.get_u64_le());
        let n_objs = buf.get_u32_le();
        let prev_trailer_offset = buf.get_u64_le();
        let crc32 = buf.get_u32_le();

        let mut magic = [0u8; 8];
        buf.copy_to_slice(&mut magic);
        if magic != TRAILER_MAGIC {
            return Err(LogError::corrupted(offset, "bad trailer magic"));
        }

        Ok(Self {
            txid,
            n_objs,
            prev_trailer_offset,
            crc32,
        })
    }
}

/// Writes an object record header for a payload of `len` bytes.
pub fn encode_object_header(len: u32, buf: &mut impl BufMut) {
    buf.put_u8(TAG_OBJECT);
    buf.put_u32_le(len);
}

/// Writes a blob record header for a payload of `len` bytes.
pub fn encode_blob_header(len: u64, buf: &mut impl BufMut) {
    buf.put_u8(TAG_BLOB);
    buf.put_u64_le(len);
}
