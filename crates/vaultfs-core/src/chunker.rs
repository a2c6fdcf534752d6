use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{BackendError, Result};

/// Fixed-size windowed reader over a local spool file. Chunk indices are
/// zero-based; the last chunk may be short. The file handle closes with the
/// chunker.
pub struct Chunker {
    file: File,
    chunk_size: u64,
    file_size: u64,
    num_chunks: u64,
}

impl Chunker {
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self> {
        if chunk_size < 1 {
            return Err(BackendError::Config("chunk size must be positive".into()));
        }
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let num_chunks = file_size.div_ceil(chunk_size);
        Ok(Self {
            file,
            chunk_size,
            file_size,
            num_chunks,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn num_chunks(&self) -> u64 {
        self.num_chunks
    }

    /// Size of chunk `index` in bytes.
    pub fn chunk_len(&self, index: u64) -> u64 {
        if index + 1 < self.num_chunks {
            self.chunk_size
        } else {
            self.file_size - index * self.chunk_size
        }
    }

    /// Reader over the `index`-th window of the file.
    pub fn chunk_reader(&mut self, index: u64) -> io::Result<io::Take<&mut File>> {
        self.file.seek(SeekFrom::Start(index * self.chunk_size))?;
        Ok(self.file.by_ref().take(self.chunk_size))
    }

    /// Read chunk `index` into a fresh buffer.
    pub fn read_chunk(&mut self, index: u64) -> io::Result<Vec<u8>> {
        let expected = self.chunk_len(index) as usize;
        let mut buf = Vec::with_capacity(expected);
        self.chunk_reader(index)?.read_to_end(&mut buf)?;
        if buf.len() != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("chunk {index}: expected {expected} bytes, got {}", buf.len()),
            ));
        }
        Ok(buf)
    }
}
