//! Client-side chunk planning
//!
//! Splits a file of known size into fixed-size chunks, numbered from 1, the
//! way a multipart upload expects them. Every chunk but the last is exactly
//! `chunk_size` bytes, so the plan satisfies a backend minimum part size as
//! long as `chunk_size` does.

use super::UploadError;

/// One slice of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub part_number: u32,
    pub offset: u64,
    pub len: u64,
}

impl Chunk {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Split of a file into numbered chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_parts: u32,
}

impl ChunkPlan {
    /// Plan `ceil(file_size / chunk_size)` parts.
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, UploadError> {
        if chunk_size == 0 {
            return Err(UploadError::InvalidChunkSize(chunk_size));
        }
        if file_size == 0 {
            return Err(UploadError::EmptyFile);
        }

        let total_parts = file_size.div_ceil(chunk_size);
        if total_parts > u64::from(super::MAX_PARTS) {
            return Err(UploadError::InvalidChunkSize(chunk_size));
        }

        Ok(Self {
            file_size,
            chunk_size,
            total_parts: total_parts as u32,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    /// Chunk for a 1-based part number
    pub fn chunk(&self, part_number: u32) -> Option<Chunk> {
        if part_number == 0 || part_number > self.total_parts {
            return None;
        }
        let offset = u64::from(part_number - 1) * self.chunk_size;
        let end = (offset + self.chunk_size).min(self.file_size);
        Some(Chunk {
            part_number,
            offset,
            len: end - offset,
        })
    }

    /// All chunks in part-number order
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        (1..=self.total_parts).filter_map(|n| self.chunk(n))
    }

    /// Fraction of the transfer done once `part_number` has been stored
    pub fn progress(&self, part_number: u32) -> f64 {
        f64::from(part_number.min(self.total_parts)) / f64::from(self.total_parts)
    }
}
