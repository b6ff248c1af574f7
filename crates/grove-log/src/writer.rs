//! Exclusive transaction writer.
//!
//! A [`WriteHandle`] represents one transaction's exclusive access to
//! the log tail: the holder owns the commit lock (both the in-process
//! writer lock and the inter-process file lock) until the handle
//! commits, aborts, or is dropped.
//!
//! Blob payloads are appended to the file as they arrive, so their
//! final offsets are known to the encoder; object records are staged
//! in memory and flushed in order just before the trailer. If the
//! transaction fails, the staged records are discarded and the
//! partially appended bytes are truncated away, leaving the file
//! consistent.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use grove_common::constants::BLOB_COPY_BUFFER_SIZE;
use grove_common::{Oid, TxId};
use parking_lot::{MutexGuard, RwLockWriteGuard};

use crate::error::{LogError, LogResult};
use crate::format::{self, Trailer, BLOB_HEADER_SIZE, OBJECT_HEADER_SIZE};
use crate::lock;
use crate::log::TransactionLog;
use crate::stream::BlobSlice;

/// Handle for appending one transaction.
///
/// Created by [`TransactionLog::begin_write`]; must be finished with
/// [`commit`](WriteHandle::commit), [`abort`](WriteHandle::abort) or
/// [`abort_with_marker`](WriteHandle::abort_with_marker). Dropping an
/// unfinished handle truncates the partial append and releases the
/// locks.
pub struct WriteHandle<'a> {
    log: &'a TransactionLog,
    _io: RwLockWriteGuard<'a, ()>,
    file: MutexGuard<'a, File>,
    txid: TxId,
    start_offset: u64,
    prev_trailer_offset: u64,
    pos: u64,
    staged: Vec<Bytes>,
    hasher: crc32fast::Hasher,
    finished: bool,
}

impl<'a> WriteHandle<'a> {
    /// The caller must have positioned `file` at `start_offset`.
    pub(crate) fn new(
        log: &'a TransactionLog,
        io: RwLockWriteGuard<'a, ()>,
        file: MutexGuard<'a, File>,
        txid: TxId,
        start_offset: u64,
        prev_trailer_offset: u64,
    ) -> Self {
        Self {
            log,
            _io: io,
            file,
            txid,
            start_offset,
            prev_trailer_offset,
            pos: start_offset,
            staged: Vec::new(),
            hasher: crc32fast::Hasher::new(),
            finished: false,
        }
    }

    /// The transaction id this handle will commit under.
    pub fn txid(&self) -> TxId {
        self.txid
    }

    /// Number of object records staged so far.
    pub fn object_count(&self) -> u32 {
        self.staged.len() as u32
    }

    /// Allocates a fresh object identifier.
    ///
    /// Only the commit-lock holder may allocate, which keeps OIDs
    /// unique across processes.
    pub fn new_oid(&mut self) -> Oid {
        self.log.allocate_oid()
    }

    /// Appends a blob payload, returning its location in the file.
    ///
    /// The payload is copied from `src`, which must yield exactly
    /// `length` bytes.
    pub fn append_blob(&mut self, src: &mut dyn Read, length: u64) -> LogResult<BlobSlice> {
        let mut header = Vec::with_capacity(BLOB_HEADER_SIZE);
        format::encode_blob_header(length, &mut header);
        self.file.write_all(&header)?;
        self.hasher.update(&header);

        let payload_offset = self.pos + BLOB_HEADER_SIZE as u64;

        let mut copied = 0u64;
        let mut buf = vec![0u8; BLOB_COPY_BUFFER_SIZE];
        while copied < length {
            let want = (length - copied).min(buf.len() as u64) as usize;
            let got = src.read(&mut buf[..want])?;
            if got == 0 {
                return Err(LogError::ShortBlob {
                    declared: length,
                    copied,
                });
            }
            self.file.write_all(&buf[..got])?;
            self.hasher.update(&buf[..got]);
            copied += got as u64;
        }

        self.pos = payload_offset + length;
        Ok(self.log.blob_slice_unchecked(payload_offset, length))
    }

    /// Stages an encoded object record for the commit flush.
    pub fn stage_object(&mut self, payload: &[u8]) -> LogResult<()> {
        let max = self.log.config().max_record_size;
        if payload.len() > max {
            return Err(LogError::RecordTooLarge {
                size: payload.len(),
                max,
            });
        }
        self.staged.push(Bytes::copy_from_slice(payload));
        Ok(())
    }

    /// Flushes staged records, writes the trailer, fsyncs, and
    /// releases the commit lock.
    pub fn commit(mut self) -> LogResult<TxId> {
        let n_objs = self.staged.len() as u32;
        for record in std::mem::take(&mut self.staged) {
            let mut header = Vec::with_capacity(OBJECT_HEADER_SIZE);
            format::encode_object_header(record.len() as u32, &mut header);
            self.file.write_all(&header)?;
            self.file.write_all(&record)?;
            self.hasher.update(&header);
            self.hasher.update(&record);
            self.pos += (OBJECT_HEADER_SIZE + record.len()) as u64;
        }

        let trailer_offset = self.pos;
        self.write_trailer(n_objs, trailer_offset)?;

        tracing::debug!(
            txid = self.txid.as_u64(),
            objects = n_objs,
            bytes = trailer_offset - self.start_offset,
            "transaction committed"
        );

        self.finished = true;
        Ok(self.txid)
    }

    /// Discards the transaction, truncating any appended bytes, and
    /// writes a failure marker (a trailer with zero object records)
    /// whose txid still advances.
    pub fn abort_with_marker(mut self) -> LogResult<TxId> {
        self.truncate_to_start()?;
        self.hasher = crc32fast::Hasher::new();
        let trailer_offset = self.start_offset;
        self.write_trailer(0, trailer_offset)?;

        tracing::debug!(txid = self.txid.as_u64(), "failure marker recorded");

        self.finished = true;
        Ok(self.txid)
    }

    /// Discards the transaction without leaving any trace.
    pub fn abort(mut self) -> LogResult<()> {
        self.truncate_to_start()?;
        lock::unlock(&self.file)?;
        self.finished = true;
        Ok(())
    }

    fn truncate_to_start(&mut self) -> LogResult<()> {
        self.staged.clear();
        self.file.set_len(self.start_offset)?;
        self.file.seek(SeekFrom::Start(self.start_offset))?;
        self.pos = self.start_offset;
        Ok(())
    }

    fn write_trailer(&mut self, n_objs: u32, trailer_offset: u64) -> LogResult<()> {
        let mut trailer = Trailer::new(self.txid, n_objs, self.prev_trailer_offset);
        trailer.seal(std::mem::take(&mut self.hasher));
        self.file.write_all(&trailer.to_bytes())?;
        if self.log.config().sync_on_commit {
            self.file.sync_data()?;
        }
        lock::unlock(&self.file)?;

        self.log
            .advance_tail(trailer_offset, self.txid, trailer_offset + Trailer::SIZE as u64);
        Ok(())
    }
}

impl Drop for WriteHandle<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Best effort: leave the file at the last trailer and give
            // the lock back. Errors here cannot be reported.
            let _ = self.file.set_len(self.start_offset);
            let _ = lock::unlock(&self.file);
        }
    }
}
