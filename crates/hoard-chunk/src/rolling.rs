//! Content-defined chunker.
//!
//! Boundaries are chosen where a rolling fingerprint of the content falls
//! within a mask, bounded below (to keep per-chunk overhead sane) and above
//! (to bound memory and single-blob size). The same input always produces
//! the same boundaries regardless of how it was buffered, which is what
//! makes cross-file deduplication work.
//!
//! **The size parameters must never change once data has been stored** —
//! identical content would otherwise split differently and stop
//! deduplicating.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Chunk, ChunkError};

/// Minimum chunk size (64 KiB).
pub const ROLL_MIN_SIZE: u32 = 65_536;

/// Target average chunk size (256 KiB).
pub const ROLL_AVG_SIZE: u32 = 262_144;

/// Maximum chunk size (1 MiB).
pub const ROLL_MAX_SIZE: u32 = 1_048_576;

/// Content-defined chunker using the FastCDC algorithm.
pub struct RollChunker {
    min_size: u32,
    avg_size: u32,
    max_size: u32,
}

impl RollChunker {
    /// Create a chunker with the default size bounds.
    pub fn new() -> Self {
        Self {
            min_size: ROLL_MIN_SIZE,
            avg_size: ROLL_AVG_SIZE,
            max_size: ROLL_MAX_SIZE,
        }
    }

    /// Create a chunker with custom bounds (for testing).
    pub fn with_sizes(min_size: u32, avg_size: u32, max_size: u32) -> Self {
        Self {
            min_size,
            avg_size,
            max_size,
        }
    }

    /// Split a byte slice into content-defined chunks.
    ///
    /// Returns an empty vec for empty input.
    pub fn chunk(&self, data: &[u8]) -> Vec<Chunk> {
        if data.is_empty() {
            return Vec::new();
        }

        let cuts = fastcdc::v2020::FastCDC::new(data, self.min_size, self.avg_size, self.max_size);
        let mut chunks = Vec::new();
        for entry in cuts {
            chunks.push(Chunk {
                offset: entry.offset as u64,
                data: Bytes::copy_from_slice(&data[entry.offset..entry.offset + entry.length]),
            });
        }
        chunks
    }

    /// Split an async reader into content-defined chunks.
    pub async fn chunk_stream(
        &self,
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<Vec<Chunk>, ChunkError> {
        // Boundary detection needs the full buffer; read it all first.
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(self.chunk(&buf))
    }
}

impl Default for RollChunker {
    fn default() -> Self {
        Self::new()
    }
}
