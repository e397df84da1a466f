//! Capability traits for blob storage.

use bytes::Bytes;
use hoard_types::{BlobRef, SizedBlobRef};
use tokio::io::AsyncRead;

use crate::error::StoreError;

/// A boxed async byte stream, as returned by [`BlobSource::fetch_streaming`].
pub type BlobStream = Box<dyn AsyncRead + Send + Unpin>;

/// Receiving side of blob storage: stat known refs, accept new blobs.
///
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait::async_trait]
pub trait BlobSink: Send + Sync {
    /// Report which of `refs` the store already has, with their sizes.
    ///
    /// The result contains one entry per present ref, in no particular
    /// order; absent refs are simply omitted.
    async fn stat(&self, refs: &[BlobRef]) -> Result<Vec<SizedBlobRef>, StoreError>;

    /// Store a blob under its declared ref.
    ///
    /// Implementations verify that `data` hashes to `br` and reject the
    /// blob with [`StoreError::Corrupt`] otherwise; no partial state is
    /// left behind on rejection. Receiving the same blob twice is a no-op.
    async fn receive(&self, br: &BlobRef, data: Bytes) -> Result<SizedBlobRef, StoreError>;
}

/// Reading side of blob storage: streaming fetch and enumeration.
#[async_trait::async_trait]
pub trait BlobSource: Send + Sync {
    /// Fetch a blob as a stream, with its size. `None` when absent.
    async fn fetch_streaming(
        &self,
        br: &BlobRef,
    ) -> Result<Option<(BlobStream, u64)>, StoreError>;

    /// Enumerate stored refs in ascending string order.
    ///
    /// `after` is exclusive; `limit` bounds the page size.
    async fn enumerate(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SizedBlobRef>, StoreError>;
}

/// Removal capability.
#[async_trait::async_trait]
pub trait BlobRemover: Send + Sync {
    /// Remove the given blobs, returning the subset that existed and was
    /// deleted. Removing an absent blob is not an error.
    async fn remove(&self, refs: &[BlobRef]) -> Result<Vec<BlobRef>, StoreError>;
}

/// Whole-blob fetch for random-access reassembly of chunked files.
#[async_trait::async_trait]
pub trait SeekFetcher: Send + Sync {
    /// Fetch a complete blob. `None` when absent.
    async fn fetch(&self, br: &BlobRef) -> Result<Option<Bytes>, StoreError>;
}

/// Umbrella trait for full-featured storage backends.
pub trait Storage: BlobSink + BlobSource + BlobRemover + SeekFetcher {}

impl<T: BlobSink + BlobSource + BlobRemover + SeekFetcher> Storage for T {}
