//! Random-access blob reads.
//!
//! A [`BlobSlice`] names a byte range inside the log file; it is the
//! in-memory identity of a committed binary stream. Opening a slice
//! yields a [`BlobStream`] with its own file handle; iterating yields
//! [`BlobChunks`], which acquires an independent handle and drops it
//! when the last chunk has been produced.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::LogResult;

/// Location of a committed blob payload inside the log file.
#[derive(Debug, Clone)]
pub struct BlobSlice {
    path: Arc<PathBuf>,
    offset: u64,
    length: u64,
    chunk_size: usize,
}

impl PartialEq for BlobSlice {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.length == other.length
    }
}

impl Eq for BlobSlice {}

impl BlobSlice {
    pub(crate) fn new(path: Arc<PathBuf>, offset: u64, length: u64, chunk_size: usize) -> Self {
        Self {
            path,
            offset,
            length,
            chunk_size,
        }
    }

    /// Payload offset inside the log file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Payload length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Path of the backing log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the slice for reading with a dedicated file handle.
    pub fn open(&self) -> LogResult<BlobStream> {
        let mut file = File::open(self.path.as_ref())?;
        file.seek(SeekFrom::Start(self.offset))?;
        Ok(BlobStream {
            file,
            remaining: self.length,
        })
    }

    /// Reads the entire payload into memory.
    pub fn read_all(&self) -> LogResult<Vec<u8>> {
        let mut stream = self.open()?;
        let mut buf = Vec::with_capacity(self.length as usize);
        stream.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Returns a chunk iterator with its own file handle.
    ///
    /// The handle is closed as soon as the final chunk is yielded.
    pub fn chunks(&self) -> LogResult<BlobChunks> {
        let mut file = File::open(self.path.as_ref())?;
        file.seek(SeekFrom::Start(self.offset))?;
        Ok(BlobChunks {
            file: Some(file),
            remaining: self.length,
            chunk_size: self.chunk_size,
        })
    }
}

/// An open reader over a blob payload.
#[derive(Debug)]
pub struct BlobStream {
    file: File,
    remaining: u64,
}

impl BlobStream {
    /// Bytes left to read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Read for BlobStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let got = self.file.read(&mut buf[..want])?;
        self.remaining -= got as u64;
        Ok(got)
    }
}

/// Chunked iteration over a blob payload.
///
/// The underlying file handle is dropped when iteration completes.
#[derive(Debug)]
pub struct BlobChunks {
    file: Option<File>,
    remaining: u64,
    chunk_size: usize,
}

impl BlobChunks {
    /// Returns true once the iterator has released its file handle.
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl Iterator for BlobChunks {
    type Item = LogResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            self.file = None;
            return None;
        }

        let file = self.file.as_mut()?;
        let want = (self.chunk_size as u64).min(self.remaining) as usize;
        let mut buf = vec![0u8; want];

        let mut filled = 0;
        while filled < want {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.file = None;
                    return Some(Err(e.into()));
                }
            }
        }
        buf.truncate(filled);
        self.remaining = self.remaining.saturating_sub(filled as u64);

        if filled == 0 {
            // Truncated file; end iteration rather than spin.
            self.file = None;
            return None;
        }
        if self.remaining == 0 {
            self.file = None;
        }
        Some(Ok(buf))
    }
}
