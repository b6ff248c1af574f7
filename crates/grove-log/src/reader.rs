//! Forward transaction scan.
//!
//! The scanner reads fully-formed transactions from a record boundary
//! to EOF. Partial trailing bytes left by a crashed or in-flight
//! writer are ignored; malformed bytes *before* a complete trailer are
//! corruption.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use bytes::Bytes;
use grove_common::constants::{TAG_BLOB, TAG_OBJECT, TAG_TRAILER};
use grove_common::TxId;

use crate::config::LogConfig;
use crate::error::{LogError, LogResult};
use crate::format::Trailer;

/// A fully-formed transaction read from the log.
#[derive(Debug, Clone)]
pub struct TxRecord {
    /// Transaction id.
    pub txid: TxId,
    /// Codec-encoded object payloads, in write order. Empty for
    /// failure markers.
    pub objects: Vec<Bytes>,
    /// Object record count from the trailer.
    pub n_objs: u32,
    /// File offset of the transaction's first record byte.
    pub start_offset: u64,
    /// File offset one past the trailer.
    pub end_offset: u64,
}

impl TxRecord {
    /// Returns true if this transaction records a failed commit.
    pub fn is_failure_marker(&self) -> bool {
        self.n_objs == 0
    }
}

/// Result of a forward scan.
#[derive(Debug)]
pub struct Scan {
    /// Transactions read, in file order.
    pub records: Vec<TxRecord>,
    /// Offset one past the last complete trailer.
    pub end: u64,
    /// Offset of the last complete trailer's tag byte (unchanged from
    /// the seed if the scan found nothing).
    pub last_trailer_offset: u64,
    /// Id of the last complete transaction.
    pub last_txid: TxId,
}

/// Reads `buf.len()` bytes, distinguishing end-of-data from I/O errors.
///
/// Returns `Ok(false)` when the file ends before the buffer fills; the
/// truncated tail belongs to an unfinished writer and is not an error.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> LogResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Scans transactions from `start` to EOF.
///
/// `prev_trailer` and `last_txid` seed the chain checks: the first
/// trailer encountered must point back at `prev_trailer` and carry
/// `last_txid + 1`.
pub(crate) fn scan_transactions(
    file: &File,
    start: u64,
    prev_trailer: u64,
    last_txid: TxId,
    config: &LogConfig,
) -> LogResult<Scan> {
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(start))?;

    let mut scan = Scan {
        records: Vec::new(),
        end: start,
        last_trailer_offset: prev_trailer,
        last_txid,
    };

    let mut offset = start;
    let mut tx_start = start;
    let mut objects: Vec<Bytes> = Vec::new();
    let mut hasher = crc32fast::Hasher::new();

    loop {
        let mut tag = [0u8; 1];
        if !read_or_eof(&mut reader, &mut tag)? {
            break;
        }

        match tag[0] {
            TAG_OBJECT => {
                let mut len_buf = [0u8; 4];
                if !read_or_eof(&mut reader, &mut len_buf)? {
                    break;
                }
                let len = u32::from_le_bytes(len_buf) as usize;
                if len > config.max_record_size {
                    return Err(LogError::RecordTooLarge {
                        size: len,
                        max: config.max_record_size,
                    });
                }

                let mut payload = vec![0u8; len];
                if !read_or_eof(&mut reader, &mut payload)? {
                    break;
                }

                hasher.update(&tag);
                hasher.update(&len_buf);
                hasher.update(&payload);
                objects.push(Bytes::from(payload));
                offset += 1 + 4 + len as u64;
            }
            TAG_BLOB => {
                let mut len_buf = [0u8; 8];
                if !read_or_eof(&mut reader, &mut len_buf)? {
                    break;
                }
                let len = u64::from_le_bytes(len_buf);

                hasher.update(&tag);
                hasher.update(&len_buf);

                if config.verify_checksums {
                    let mut remaining = len;
                    let mut chunk = vec![0u8; config.blob_chunk_size];
                    let mut complete = true;
                    while remaining > 0 {
                        let want = remaining.min(chunk.len() as u64) as usize;
                        if !read_or_eof(&mut reader, &mut chunk[..want])? {
                            complete = false;
                            break;
                        }
                        hasher.update(&chunk[..want]);
                        remaining -= want as u64;
                    }
                    if !complete {
                        break;
                    }
                } else {
                    if len > i64::MAX as u64 {
                        // A length like this can only come from a
                        // torn header at the tail.
                        break;
                    }
                    // Seek past the payload; a seek beyond EOF does
                    // not fail, so probe with a read at the new
                    // position on the next loop turn.
                    reader.seek(SeekFrom::Current(len as i64))?;
                }
                offset += 1 + 8 + len;
            }
            TAG_TRAILER => {
                let mut rest = [0u8; Trailer::SIZE - 1];
                if !read_or_eof(&mut reader, &mut rest)? {
                    break;
                }

                let mut full = [0u8; Trailer::SIZE];
                full[0] = TAG_TRAILER;
                full[1..].copy_from_slice(&rest);
                let trailer = Trailer::decode(&full, offset)?;

                let expected_txid = scan.last_txid.next();
                if trailer.txid != expected_txid {
                    return Err(LogError::corrupted(
                        offset,
                        format!(
                            "transaction id discontinuity: expected {}, found {}",
                            expected_txid, trailer.txid
                        ),
                    ));
                }
                if trailer.prev_trailer_offset != scan.last_trailer_offset {
                    return Err(LogError::corrupted(
                        offset,
                        format!(
                            "trailer chain broken: expected previous offset {}, found {}",
                            scan.last_trailer_offset, trailer.prev_trailer_offset
                        ),
                    ));
                }

                if config.verify_checksums {
                    let mut check = hasher.clone();
                    let mut prefix = Vec::with_capacity(Trailer::CRC_PREFIX_SIZE);
                    trailer.encode_prefix(&mut prefix);
                    check.update(&prefix);
                    let computed = check.finalize();
                    if computed != trailer.crc32 {
                        return Err(LogError::checksum_mismatch(
                            offset,
                            trailer.crc32,
                            computed,
                        ));
                    }
                }

                let collected = std::mem::take(&mut objects);
                if trailer.n_objs != 0 && trailer.n_objs as usize != collected.len() {
                    return Err(LogError::corrupted(
                        offset,
                        format!(
                            "object count mismatch: trailer says {}, found {}",
                            trailer.n_objs,
                            collected.len()
                        ),
                    ));
                }

                let end = offset + Trailer::SIZE as u64;
                scan.records.push(TxRecord {
                    txid: trailer.txid,
                    // Failure markers are skipped for state.
                    objects: if trailer.is_failure_marker() {
                        Vec::new()
                    } else {
                        collected
                    },
                    n_objs: trailer.n_objs,
                    start_offset: tx_start,
                    end_offset: end,
                });

                scan.last_trailer_offset = offset;
                scan.last_txid = trailer.txid;
                scan.end = end;

                offset = end;
                tx_start = end;
                hasher = crc32fast::Hasher::new();
            }
            other => {
                return Err(LogError::corrupted(
                    offset,
                    format!("unknown record tag {:#04x}", other),
                ));
            }
        }
    }

    Ok(scan)
}
