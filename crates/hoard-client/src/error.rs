//! Error types for the client.

use std::path::PathBuf;

/// Errors surfaced by the upload client and ingestion coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP transport failure (after retries).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server's response didn't follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server never acknowledged receiving an uploaded blob.
    #[error("server did not acknowledge upload of {0}")]
    UploadRejected(hoard_types::BlobRef),

    /// Some requested refs were absent from the server's `removed` set.
    #[error("failed to remove blobs: {0:?}")]
    RemoveIncomplete(Vec<String>),

    /// An inode kind the ingester doesn't handle (block/char/fifo/socket).
    #[error("unimplemented file type: {0}")]
    Unimplemented(PathBuf),

    /// The ingest was canceled.
    #[error("upload canceled")]
    Canceled,

    /// Local cache failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Filesystem failure while walking or reading.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ref(#[from] hoard_types::RefError),

    #[error(transparent)]
    Store(#[from] hoard_store::StoreError),

    #[error(transparent)]
    Schema(#[from] hoard_schema::SchemaError),

    #[error(transparent)]
    Sign(#[from] hoard_jsonsign::SignError),
}
