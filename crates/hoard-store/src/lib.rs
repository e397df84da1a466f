//! Blob storage capability traits and backend implementations.
//!
//! The storage surface is split into narrow capabilities so that callers
//! depend only on what they use:
//!
//! - [`BlobSink`] — stat + receive (what an uploader needs)
//! - [`BlobSource`] — streaming fetch + enumerate
//! - [`BlobRemover`] — remove
//! - [`SeekFetcher`] — whole-blob fetch for random-access reassembly
//! - [`Storage`] — umbrella over all of the above
//!
//! Two local backends are provided:
//!
//! - [`MemoryStore`] — in-memory storage backed by a `RwLock<BTreeMap>`.
//! - [`FileStore`] — file-based storage with a 2-level fan-out layout.
//!
//! The remote upload client implements the same traits, so the file writer
//! and the ingestion coordinator work identically against either.

mod error;
mod file_store;
mod memory_store;
mod traits;

pub use error::StoreError;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use traits::{BlobRemover, BlobSink, BlobSource, BlobStream, SeekFetcher, Storage};
