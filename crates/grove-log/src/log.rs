//! Transaction log manager.
//!
//! [`TransactionLog`] owns one database file. It recovers the file on
//! open (truncating anything after the last well-formed trailer),
//! serves catch-up scans under a shared file lock, and hands out
//! exclusive [`WriteHandle`]s under the commit lock.
//!
//! A `TransactionLog` tracks the *instance's* consumed position, not
//! the file's: other processes may append at any time, and their
//! transactions become visible to this instance on the next
//! [`catch_up`](TransactionLog::catch_up) or
//! [`begin_write`](TransactionLog::begin_write).

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use grove_common::constants::{FIRST_RECORD_OFFSET, LOG_MAGIC, TRAILER_MAGIC};
use grove_common::{Oid, TxId};
use parking_lot::{Mutex, RwLock};

use crate::config::LogConfig;
use crate::error::{LogError, LogResult};
use crate::format::Trailer;
use crate::lock;
use crate::reader::{scan_transactions, TxRecord};
use crate::stream::BlobSlice;
use crate::writer::WriteHandle;

/// Window size for the backward recovery scan.
const RECOVERY_WINDOW: u64 = 4 * 1024 * 1024;

/// The instance's consumed tail position.
#[derive(Debug, Clone, Copy)]
struct Tail {
    /// Offset one past the last consumed trailer.
    end: u64,
    /// Offset of the last consumed trailer's tag byte (0 if none).
    last_trailer_offset: u64,
    /// Id of the last consumed transaction.
    last_txid: TxId,
    /// Transactions consumed or written by this instance, including
    /// failure markers.
    tx_count: u64,
}

/// Append-only transaction log over a single file.
pub struct TransactionLog {
    path: Arc<PathBuf>,
    config: LogConfig,
    /// In-process writer/reader coordination; the file lock handles
    /// other processes.
    io: RwLock<()>,
    /// Persistent write handle; also carries the commit file lock.
    write_file: Mutex<File>,
    tail: Mutex<Tail>,
    next_oid: Mutex<u64>,
}

impl TransactionLog {
    /// Opens (creating if needed) the log at `path` and recovers it.
    pub fn open(path: impl Into<PathBuf>, config: LogConfig) -> LogResult<Self> {
        config.validate().map_err(LogError::config_error)?;
        let path = path.into();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        // Recovery truncates, so it must exclude concurrent writers.
        lock::lock_exclusive(&file)?;
        let recovered = Self::recover(&file, &path);
        let unlock = lock::unlock(&file);
        let valid_end = recovered?;
        unlock?;

        tracing::debug!(path = %path.display(), valid_end, "log opened");

        Ok(Self {
            path: Arc::new(path),
            config,
            io: RwLock::new(()),
            write_file: Mutex::new(file),
            tail: Mutex::new(Tail {
                end: FIRST_RECORD_OFFSET,
                last_trailer_offset: 0,
                last_txid: TxId::ZERO,
                tx_count: 0,
            }),
            next_oid: Mutex::new(1),
        })
    }

    /// Ensures the magic is present and truncates everything after the
    /// most recent well-formed trailer. Returns the valid end offset.
    fn recover(file: &File, path: &Path) -> LogResult<u64> {
        let len = file.metadata()?.len();

        if len == 0 {
            let mut f = file;
            f.write_all(&LOG_MAGIC)?;
            f.sync_data()?;
            return Ok(FIRST_RECORD_OFFSET);
        }
        if len < FIRST_RECORD_OFFSET {
            return Err(LogError::NotALog {
                path: path.to_path_buf(),
            });
        }

        let mut magic = [0u8; LOG_MAGIC.len()];
        file.read_exact_at(&mut magic, 0)?;
        if magic != LOG_MAGIC {
            return Err(LogError::NotALog {
                path: path.to_path_buf(),
            });
        }

        let valid_end = Self::find_last_trailer(file, len)?;
        if valid_end < len {
            tracing::warn!(
                valid_end,
                file_len = len,
                "truncating partial transaction left by a crashed writer"
            );
            file.set_len(valid_end)?;
            file.sync_data()?;
        }
        Ok(valid_end)
    }

    /// Scans backwards from EOF for the most recent well-formed
    /// trailer; returns the offset one past it (or the first record
    /// offset when the log holds no transactions).
    fn find_last_trailer(file: &File, len: u64) -> LogResult<u64> {
        let magic_len = TRAILER_MAGIC.len();
        let mut window_end = len;

        while window_end > FIRST_RECORD_OFFSET {
            let window_start = window_end
                .saturating_sub(RECOVERY_WINDOW)
                .max(FIRST_RECORD_OFFSET);
            let size = (window_end - window_start) as usize;
            let mut buf = vec![0u8; size];
            file.read_exact_at(&mut buf, window_start)?;

            let mut idx = size;
            while idx >= magic_len {
                idx -= 1;
                let start = idx + 1 - magic_len;
                if buf[start..=idx] != TRAILER_MAGIC {
                    continue;
                }

                let trailer_end = window_start + (idx as u64) + 1;
                let Some(trailer_start) = trailer_end.checked_sub(Trailer::SIZE as u64) else {
                    continue;
                };
                if trailer_start < FIRST_RECORD_OFFSET {
                    continue;
                }
                if Self::verify_trailer_at(file, trailer_start)? {
                    return Ok(trailer_end);
                }
            }

            if window_start == FIRST_RECORD_OFFSET {
                break;
            }
            // Overlap windows so a trailer magic straddling the
            // boundary is still found.
            window_end = window_start + (magic_len as u64 - 1);
        }

        Ok(FIRST_RECORD_OFFSET)
    }

    /// Structurally and checksum-validates a trailer candidate.
    fn verify_trailer_at(file: &File, trailer_start: u64) -> LogResult<bool> {
        let mut bytes = [0u8; Trailer::SIZE];
        file.read_exact_at(&mut bytes, trailer_start)?;
        let Ok(trailer) = Trailer::decode(&bytes, trailer_start) else {
            return Ok(false);
        };

        let tx_start = if trailer.prev_trailer_offset == 0 {
            FIRST_RECORD_OFFSET
        } else {
            trailer.prev_trailer_offset + Trailer::SIZE as u64
        };
        if trailer.prev_trailer_offset != 0
            && (trailer.prev_trailer_offset < FIRST_RECORD_OFFSET || tx_start > trailer_start)
        {
            return Ok(false);
        }
        if tx_start > trailer_start {
            return Ok(false);
        }

        // CRC over the transaction bytes plus the trailer prefix.
        let mut hasher = crc32fast::Hasher::new();
        let mut offset = tx_start;
        let mut buf = vec![0u8; 64 * 1024];
        while offset < trailer_start {
            let want = ((trailer_start - offset) as usize).min(buf.len());
            file.read_exact_at(&mut buf[..want], offset)?;
            hasher.update(&buf[..want]);
            offset += want as u64;
        }
        let mut prefix = Vec::with_capacity(Trailer::CRC_PREFIX_SIZE);
        trailer.encode_prefix(&mut prefix);
        hasher.update(&prefix);

        Ok(hasher.finalize() == trailer.crc32)
    }

    /// Returns the log configuration.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        self.path.as_ref()
    }

    /// Number of transactions this instance has consumed or written,
    /// including failure markers.
    pub fn tx_count(&self) -> u64 {
        self.tail.lock().tx_count
    }

    /// Alias for [`tx_count`](Self::tx_count), as a length.
    pub fn len(&self) -> u64 {
        self.tx_count()
    }

    /// Returns true if this instance has seen no transactions.
    pub fn is_empty(&self) -> bool {
        self.tx_count() == 0
    }

    /// Id of the last transaction this instance has consumed or
    /// written.
    pub fn last_txid(&self) -> TxId {
        self.tail.lock().last_txid
    }

    /// Reads forward from the instance's consumed position under a
    /// shared file lock, returning the newly appended transactions.
    ///
    /// Partial trailing bytes from an in-flight or crashed writer are
    /// ignored.
    pub fn catch_up(&self) -> LogResult<Vec<TxRecord>> {
        let _io = self.io.read();

        let read_file = File::open(self.path.as_ref())?;
        lock::lock_shared(&read_file)?;

        // The tail mutex serialises concurrent catch-ups so each
        // transaction is consumed exactly once.
        let mut tail = self.tail.lock();
        let scan = scan_transactions(
            &read_file,
            tail.end,
            tail.last_trailer_offset,
            tail.last_txid,
            &self.config,
        )?;

        tail.end = scan.end;
        tail.last_trailer_offset = scan.last_trailer_offset;
        tail.last_txid = scan.last_txid;
        tail.tx_count += scan.records.len() as u64;

        if !scan.records.is_empty() {
            tracing::debug!(
                transactions = scan.records.len(),
                last_txid = scan.last_txid.as_u64(),
                "caught up"
            );
        }
        Ok(scan.records)
    }

    /// Acquires the commit lock and returns a write handle positioned
    /// at EOF, plus the transactions appended since this instance last
    /// looked (the commit-time catch-up).
    ///
    /// Blocks until the exclusive file lock is granted.
    pub fn begin_write(&self) -> LogResult<(WriteHandle<'_>, Vec<TxRecord>)> {
        let io = self.io.write();
        let mut file = self.write_file.lock();

        lock::lock_exclusive(&file)?;

        let prepared = (|| -> LogResult<(Vec<TxRecord>, TxId, u64, u64)> {
            let mut tail = self.tail.lock();
            let scan = scan_transactions(
                &file,
                tail.end,
                tail.last_trailer_offset,
                tail.last_txid,
                &self.config,
            )?;

            tail.end = scan.end;
            tail.last_trailer_offset = scan.last_trailer_offset;
            tail.last_txid = scan.last_txid;
            tail.tx_count += scan.records.len() as u64;

            // A writer that crashed while holding the lock may have
            // left partial bytes; we own the lock, so clear them.
            let file_len = file.metadata()?.len();
            if file_len > scan.end {
                file.set_len(scan.end)?;
            }

            Ok((
                scan.records,
                tail.last_txid.next(),
                tail.end,
                tail.last_trailer_offset,
            ))
        })();

        let (records, txid, start, prev) = match prepared {
            Ok(v) => v,
            Err(e) => {
                let _ = lock::unlock(&file);
                return Err(e);
            }
        };

        if let Err(e) = (&mut *file).seek(SeekFrom::Start(start)) {
            let _ = lock::unlock(&file);
            return Err(e.into());
        }

        let handle = WriteHandle::new(self, io, file, txid, start, prev);
        Ok((handle, records))
    }

    /// Validates a blob reference and returns a readable slice.
    pub fn read_blob(&self, offset: u64, length: u64) -> LogResult<BlobSlice> {
        let file_len = std::fs::metadata(self.path.as_ref())?.len();
        if offset.checked_add(length).map_or(true, |end| end > file_len) {
            return Err(LogError::BlobOutOfBounds {
                offset,
                length,
                file_len,
            });
        }
        Ok(self.blob_slice_unchecked(offset, length))
    }

    pub(crate) fn blob_slice_unchecked(&self, offset: u64, length: u64) -> BlobSlice {
        BlobSlice::new(
            Arc::clone(&self.path),
            offset,
            length,
            self.config.blob_chunk_size,
        )
    }

    /// Raises the OID floor to account for an identifier observed in a
    /// decoded record.
    pub fn observe_oid(&self, oid: Oid) {
        let mut next = self.next_oid.lock();
        *next = (*next).max(oid.as_u64() + 1);
    }

    pub(crate) fn allocate_oid(&self) -> Oid {
        let mut next = self.next_oid.lock();
        let oid = Oid::new(*next);
        *next += 1;
        oid
    }

    pub(crate) fn advance_tail(&self, trailer_offset: u64, txid: TxId, end: u64) {
        let mut tail = self.tail.lock();
        tail.last_trailer_offset = trailer_offset;
        tail.last_txid = txid;
        tail.end = end;
        tail.tx_count += 1;
    }
}

impl std::fmt::Debug for TransactionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tail = self.tail.lock();
        f.debug_struct("TransactionLog")
            .field("path", &self.path)
            .field("tx_count", &tail.tx_count)
            .field("last_txid", &tail.last_txid)
            .finish()
    }
}
