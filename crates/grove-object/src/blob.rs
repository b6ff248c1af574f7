//! Binary stream wrappers.
//!
//! A [`Blob`] starts *pending*: it wraps a byte source that will be
//! copied into the transaction log when the owning object commits.
//! After publication the same blob flips to its *stored* identity, a
//! [`BlobSlice`] naming the payload's location in the log file, and
//! becomes readable through a file-like API or chunked iteration.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use grove_log::{BlobChunks, BlobSlice, BlobStream};
use parking_lot::Mutex;

use crate::error::{ObjectError, ObjectResult};

/// A byte source for a pending blob.
pub type BlobSource = Box<dyn Read + Send>;

enum BlobState {
    Pending {
        source: Option<BlobSource>,
        length: u64,
    },
    Stored(BlobSlice),
}

/// A binary stream persisted (or about to be persisted) in the log.
///
/// Cloning is shallow: clones share the same identity, and committing
/// through any clone flips all of them to the stored state.
#[derive(Clone)]
pub struct Blob {
    state: Arc<Mutex<BlobState>>,
}

impl Blob {
    /// Wraps an in-memory buffer as a pending blob.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len() as u64;
        Self::from_reader(Cursor::new(bytes), length)
    }

    /// Wraps an arbitrary byte source that will yield exactly
    /// `length` bytes.
    pub fn from_reader(source: impl Read + Send + 'static, length: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(BlobState::Pending {
                source: Some(Box::new(source)),
                length,
            })),
        }
    }

    /// Rehydrates a stored blob from its log location. Used when
    /// loading object state from disk.
    pub fn from_slice(slice: BlobSlice) -> Self {
        Self {
            state: Arc::new(Mutex::new(BlobState::Stored(slice))),
        }
    }

    /// Returns true if the blob has not been committed yet.
    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), BlobState::Pending { .. })
    }

    /// Payload length in bytes.
    pub fn length(&self) -> u64 {
        match &*self.state.lock() {
            BlobState::Pending { length, .. } => *length,
            BlobState::Stored(slice) => slice.length(),
        }
    }

    /// Returns the stored location, if committed.
    pub fn slice(&self) -> Option<BlobSlice> {
        match &*self.state.lock() {
            BlobState::Stored(slice) => Some(slice.clone()),
            BlobState::Pending { .. } => None,
        }
    }

    /// Takes the pending source for the transaction writer.
    ///
    /// Fails if the blob is already stored or its source was already
    /// consumed by an earlier (failed) commit attempt.
    pub fn take_source(&self) -> ObjectResult<(BlobSource, u64)> {
        match &mut *self.state.lock() {
            BlobState::Pending { source, length } => source
                .take()
                .map(|s| (s, *length))
                .ok_or(ObjectError::BlobConsumed),
            BlobState::Stored(_) => Err(ObjectError::BlobConsumed),
        }
    }

    /// Flips the blob to its stored identity. Called at publication
    /// time, after the commit is durable.
    pub fn mark_stored(&self, slice: BlobSlice) {
        *self.state.lock() = BlobState::Stored(slice);
    }

    /// Opens the stored payload with a dedicated file handle.
    pub fn open(&self) -> ObjectResult<BlobStream> {
        let slice = self.slice().ok_or(ObjectError::BlobPending)?;
        Ok(slice.open()?)
    }

    /// Reads the entire stored payload.
    pub fn read_all(&self) -> ObjectResult<Vec<u8>> {
        let slice = self.slice().ok_or(ObjectError::BlobPending)?;
        Ok(slice.read_all()?)
    }

    /// Chunked iteration over the stored payload; the iterator owns an
    /// independent file handle and closes it after the last chunk.
    pub fn chunks(&self) -> ObjectResult<BlobChunks> {
        let slice = self.slice().ok_or(ObjectError::BlobPending)?;
        Ok(slice.chunks()?)
    }

    /// Returns true if `other` is the same blob identity.
    pub fn same_blob(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.lock() {
            BlobState::Pending { length, source } => f
                .debug_struct("Blob")
                .field("state", &"pending")
                .field("length", length)
                .field("consumed", &source.is_none())
                .finish(),
            BlobState::Stored(slice) => f
                .debug_struct("Blob")
                .field("state", &"stored")
                .field("offset", &slice.offset())
                .field("length", &slice.length())
                .finish(),
        }
    }
}
