//! Chunking of byte streams for hoard file ingestion.
//!
//! This crate provides:
//! - [`FixedChunker`] — splits data into fixed power-of-two windows.
//! - [`RollChunker`] — content-defined chunking whose boundaries follow the
//!   data, so edits in one region leave the other chunks' identities intact.
//!
//! Which chunker a given upload uses is a per-upload decision, captured by
//! [`ChunkMode`].

mod error;
mod fixed;
mod rolling;

pub use error::ChunkError;
pub use fixed::FixedChunker;
pub use rolling::{ROLL_AVG_SIZE, ROLL_MAX_SIZE, ROLL_MIN_SIZE, RollChunker};

use bytes::Bytes;
use tokio::io::AsyncRead;

/// A single chunk of an input stream.
///
/// Concatenating a stream's chunks in order reproduces the input exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset within the original stream.
    pub offset: u64,
    /// The raw chunk data.
    pub data: Bytes,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-upload choice of chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// Fixed-size chunks of the given power-of-two size.
    Fixed(u32),
    /// Content-defined boundaries with the default size bounds.
    Rolling,
}

impl ChunkMode {
    /// Split an async reader into chunks using this mode.
    pub async fn chunk_stream(
        &self,
        reader: impl AsyncRead + Unpin,
    ) -> Result<Vec<Chunk>, ChunkError> {
        match self {
            ChunkMode::Fixed(size) => FixedChunker::new(*size).chunk_stream(reader).await,
            ChunkMode::Rolling => RollChunker::new().chunk_stream(reader).await,
        }
    }
}

impl Default for ChunkMode {
    fn default() -> Self {
        ChunkMode::Fixed(FixedChunker::DEFAULT_SIZE)
    }
}
