//! Error types for blob storage operations.

use hoard_types::BlobRef;

/// Errors that can occur during blob storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob was not found.
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    /// The received bytes do not hash to the declared ref.
    #[error("corrupt blob: declared {declared}, computed {computed}")]
    Corrupt {
        /// The ref the sender declared.
        declared: BlobRef,
        /// The ref the bytes actually hash to.
        computed: BlobRef,
    },

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blob ref could not be parsed.
    #[error(transparent)]
    Ref(#[from] hoard_types::RefError),
}
