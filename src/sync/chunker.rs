//! Bounded-memory chunking of (optionally gzip-compressed) file streams
//!
//! A [`ChunkReader`] holds at most one chunk buffer plus the compressor's
//! internal window, whatever the size of the underlying file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use crate::types::ChunkDescriptor;

/// One part of a stream, ready for upload
#[derive(Debug)]
pub struct Chunk {
    pub descriptor: ChunkDescriptor,
    pub data: Vec<u8>,
}

/// Splits a byte stream into sequential parts of `chunk_size` bytes
pub struct ChunkReader {
    inner: Box<dyn Read + Send>,
    chunk_size: usize,
    offset: u64,
    next_part: u32,
    finished: bool,
}

impl ChunkReader {
    pub fn new(inner: Box<dyn Read + Send>, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
            offset: 0,
            next_part: 1,
            finished: false,
        }
    }

    /// Open a file, wrapping it in a gzip encoder when `compression` is set
    pub fn open(
        path: &Path,
        chunk_size: usize,
        compression: Option<u32>,
    ) -> std::io::Result<Self> {
        let file = BufReader::new(File::open(path)?);
        let inner: Box<dyn Read + Send> = match compression {
            Some(level) => Box::new(GzEncoder::new(file, Compression::new(level))),
            None => Box::new(file),
        };
        Ok(Self::new(inner, chunk_size))
    }

    /// Bytes emitted so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next part; `None` once the stream is exhausted
    pub fn next_chunk(&mut self) -> std::io::Result<Option<Chunk>> {
        if self.finished {
            return Ok(None);
        }

        // Grows with the bytes actually read, never to the configured size up front
        let mut data = Vec::new();
        (&mut self.inner)
            .take(self.chunk_size as u64)
            .read_to_end(&mut data)?;

        if data.len() < self.chunk_size {
            self.finished = true;
        }
        if data.is_empty() {
            return Ok(None);
        }

        let descriptor = ChunkDescriptor {
            part_number: self.next_part,
            offset: self.offset,
            length: data.len() as u64,
            sha256: hex::encode(Sha256::digest(&data)),
        };
        self.offset += data.len() as u64;
        self.next_part += 1;

        Ok(Some(Chunk { descriptor, data }))
    }
}

impl Iterator for ChunkReader {
    type Item = std::io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Number of parts for a stream of `size` bytes
pub fn expected_chunk_count(size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size)
}
