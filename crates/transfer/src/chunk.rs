use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// A contiguous byte range of a source, transferred as one unit.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the source.
    pub offset: u64,
    /// Length of this chunk in bytes.
    pub len: usize,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data` (empty means no verification).
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Splits a seekable byte source into fixed-size chunks.
///
/// Chunks come out lazily, in offset order, covering the source exactly
/// once with no gaps or overlaps; the final chunk may be shorter. Resume
/// is explicit via [`seek_to`](Self::seek_to); nothing rewinds on its own.
pub struct ChunkReader<R> {
    src: R,
    chunk_size: usize,
    offset: u64,
    total_len: u64,
}

impl ChunkReader<std::fs::File> {
    /// Opens `path` for chunked reading.
    pub fn from_path(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        Self::new(file, chunk_size)
    }
}

impl<R: Read + Seek> ChunkReader<R> {
    /// Wraps a seekable source.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(mut src: R, chunk_size: usize) -> Result<Self, TransferError> {
        let total_len = src.seek(SeekFrom::End(0))?;
        src.seek(SeekFrom::Start(0))?;
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            src,
            chunk_size,
            offset: 0,
            total_len,
        })
    }

    /// Seeks to the given byte offset (for resume).
    pub fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        self.src.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` once the source is exhausted.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.offset >= self.total_len {
            return Ok(None);
        }

        let remaining = (self.total_len - self.offset) as usize;
        let read_size = remaining.min(self.chunk_size);
        let mut buf = vec![0u8; read_size];
        self.src.read_exact(&mut buf)?;

        let chunk = Chunk {
            offset: self.offset,
            len: read_size,
            checksum: checksum_bytes(&buf),
            data: buf,
        };
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total source length in bytes.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.total_len - self.offset
    }
}

// ---------------------------------------------------------------------------
// ChunkSink
// ---------------------------------------------------------------------------

/// Applies chunks to a write destination, strictly in offset order.
///
/// A chunk whose offset is not the next expected byte fails with
/// [`TransferError::Sequence`]; the destination is never written out of
/// order. Resume is explicit via [`with_offset`](Self::with_offset).
pub struct ChunkSink<W> {
    dest: W,
    expected: u64,
}

impl<W: Write> ChunkSink<W> {
    /// Creates a sink starting at offset 0.
    pub fn new(dest: W) -> Self {
        Self::with_offset(dest, 0)
    }

    /// Creates a sink expecting the first chunk at `offset`.
    pub fn with_offset(dest: W, offset: u64) -> Self {
        Self {
            dest,
            expected: offset,
        }
    }

    /// Applies one chunk.
    ///
    /// Verifies the checksum when the chunk carries one, enforces
    /// in-order application, and advances the expected offset.
    pub fn apply(&mut self, chunk: &Chunk) -> Result<(), TransferError> {
        if chunk.offset != self.expected {
            return Err(TransferError::Sequence {
                expected: self.expected,
                got: chunk.offset,
            });
        }

        if !chunk.checksum.is_empty() && checksum_bytes(&chunk.data) != chunk.checksum {
            return Err(TransferError::Checksum {
                offset: chunk.offset,
            });
        }

        self.dest.write_all(&chunk.data)?;
        self.expected += chunk.data.len() as u64;
        Ok(())
    }

    /// Offset the next chunk must start at.
    pub fn position(&self) -> u64 {
        self.expected
    }

    /// Flushes and returns the destination.
    pub fn into_inner(mut self) -> Result<W, TransferError> {
        self.dest.flush()?;
        Ok(self.dest)
    }
}
