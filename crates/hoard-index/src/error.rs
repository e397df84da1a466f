//! Error types for receive and indexing.

use hoard_types::BlobRef;

/// Errors from the receive pipeline and index store.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The body does not hash to the declared ref.
    #[error("corrupt blob: declared {declared}, computed {computed}")]
    CorruptBlob {
        declared: BlobRef,
        computed: BlobRef,
    },

    /// Index database failure.
    #[error("index db error: {0}")]
    Fjall(#[from] fjall::Error),

    /// Index row encode/decode failure.
    #[error("row serialization error: {0}")]
    Row(#[from] postcard::Error),

    /// I/O failure while streaming the body.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Schema(#[from] hoard_schema::SchemaError),

    #[error(transparent)]
    Store(#[from] hoard_store::StoreError),
}
