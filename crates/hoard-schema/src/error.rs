//! Error types for the schema layer.

/// Errors from building, parsing, or reassembling schema blobs.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The map lacks a `camliVersion` key.
    #[error("no camliVersion key in map")]
    NoVersion,

    /// A required field for the kind is missing.
    #[error("missing required field {0:?}")]
    MissingField(&'static str),

    /// A part names both `blobRef` and `bytesRef`.
    #[error("part contains both blobRef and bytesRef")]
    ConflictingPart,

    /// A part names neither `blobRef` nor `bytesRef`.
    #[error("part contains neither blobRef nor bytesRef")]
    MissingPartRef,

    /// The declared size disagrees with the sum of the parts.
    #[error("declared size {declared} doesn't match sum of parts size {sum}")]
    SizeMismatch { declared: u64, sum: u64 },

    /// A part reads past the end of its referenced blob.
    #[error("part overruns blob {blob_ref}: offset {offset} + size {size} > len {len}")]
    PartOverrun {
        blob_ref: hoard_types::BlobRef,
        offset: u64,
        size: u64,
        len: u64,
    },

    /// The blob is not of the kind the caller expected.
    #[error("blob is camliType {found:?}, not {expected:?}")]
    WrongKind {
        expected: &'static str,
        found: String,
    },

    /// A referenced blob was not found in the fetcher.
    #[error("referenced blob not found: {0}")]
    MissingBlob(hoard_types::BlobRef),

    /// A timestamp failed to parse as RFC3339.
    #[error("bad RFC3339 timestamp: {0:?}")]
    BadDate(String),

    /// The file type is not supported for ingestion.
    #[error("unimplemented file type")]
    Unimplemented,

    /// JSON encode/decode failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Blob ref parse failure inside a schema field.
    #[error(transparent)]
    Ref(#[from] hoard_types::RefError),

    /// Underlying storage failure.
    #[error(transparent)]
    Store(#[from] hoard_store::StoreError),

    /// Chunking failure.
    #[error(transparent)]
    Chunk(#[from] hoard_chunk::ChunkError),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
