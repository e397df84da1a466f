//! Fixed-size chunker.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Chunk, ChunkError};

/// Splits data into fixed-size windows.
///
/// The last chunk may be smaller than `chunk_size`. Empty input produces
/// zero chunks.
pub struct FixedChunker {
    chunk_size: u32,
}

impl FixedChunker {
    /// Default window: 1 MiB.
    pub const DEFAULT_SIZE: u32 = 1 << 20;

    /// Create a chunker with the given window size in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero or not a power of two.
    pub fn new(chunk_size: u32) -> Self {
        assert!(
            chunk_size.is_power_of_two(),
            "chunk_size must be a power of two (got {chunk_size})"
        );
        Self { chunk_size }
    }

    /// Split a byte slice into fixed-size chunks.
    pub fn chunk(&self, data: &[u8]) -> Vec<Chunk> {
        if data.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut offset = 0u64;
        for slice in data.chunks(self.chunk_size as usize) {
            chunks.push(Chunk {
                offset,
                data: Bytes::copy_from_slice(slice),
            });
            offset += slice.len() as u64;
        }
        chunks
    }

    /// Split an async reader into fixed-size chunks.
    ///
    /// Reads the stream to exhaustion, producing chunks as it goes.
    pub async fn chunk_stream(
        &self,
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<Vec<Chunk>, ChunkError> {
        let chunk_size = self.chunk_size as usize;
        let mut chunks = Vec::new();
        let mut offset = 0u64;

        loop {
            let mut buf = vec![0u8; chunk_size];
            let mut filled = 0;

            // Fill the window, or stop at EOF.
            while filled < chunk_size {
                let n = reader.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }

            if filled == 0 {
                break;
            }

            buf.truncate(filled);
            chunks.push(Chunk {
                offset,
                data: Bytes::from(buf),
            });
            offset += filled as u64;
        }

        Ok(chunks)
    }
}

impl Default for FixedChunker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE)
    }
}
