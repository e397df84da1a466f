//! Error types for chunking.

/// Errors that can occur while splitting a stream into chunks.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// An I/O error occurred while reading the input.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
