//! Chunk planning for bounded-size transfers.

use crate::protocol::constants::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// One chunk of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Device-side offset.
    pub offset: usize,
    /// Position within the transfer buffer.
    pub start: usize,
    pub len: usize,
}

/// Splits `total` bytes starting at device offset `base` into chunks.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    base: usize,
    total: usize,
    chunk_size: usize,
    position: usize,
}

impl ChunkPlan {
    /// `chunk_size` is clamped to the supported range.
    pub fn new(base: usize, total: usize, chunk_size: usize) -> Self {
        Self {
            base,
            total,
            chunk_size: clamp_chunk_size(chunk_size),
            position: 0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total number of chunks.
    pub fn total_chunks(&self) -> usize {
        self.total.div_ceil(self.chunk_size)
    }

    /// Remaining bytes.
    pub fn remaining(&self) -> usize {
        self.total - self.position
    }

    pub fn is_done(&self) -> bool {
        self.position >= self.total
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.is_done() {
            return None;
        }
        let len = self.chunk_size.min(self.remaining());
        let chunk = Chunk {
            offset: self.base + self.position,
            start: self.position,
            len,
        };
        self.position += len;
        Some(chunk)
    }
}

pub fn clamp_chunk_size(chunk_size: usize) -> usize {
    chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}
