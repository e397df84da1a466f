//! In-memory blob storage backend.

use std::collections::BTreeMap;
use std::sync::RwLock;

use bytes::Bytes;
use hoard_types::{BlobRef, SizedBlobRef};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{BlobRemover, BlobSink, BlobSource, BlobStream, SeekFetcher};

/// In-memory blob store backed by a `RwLock<BTreeMap>`.
///
/// The map is keyed by the ref's string form, so enumeration order falls
/// out of the map itself. Useful for tests and memory-only servers.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<BTreeMap<String, (BlobRef, Bytes)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl BlobSink for MemoryStore {
    async fn stat(&self, refs: &[BlobRef]) -> Result<Vec<SizedBlobRef>, StoreError> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(refs
            .iter()
            .filter_map(|br| {
                map.get(&br.to_string())
                    .map(|(_, data)| br.clone().with_size(data.len() as u64))
            })
            .collect())
    }

    async fn receive(&self, br: &BlobRef, data: Bytes) -> Result<SizedBlobRef, StoreError> {
        if !br.matches(&data) {
            return Err(StoreError::Corrupt {
                declared: br.clone(),
                computed: BlobRef::from_data(br.algo(), &data),
            });
        }
        let size = data.len() as u64;
        let mut map = self.blobs.write().expect("lock poisoned");
        map.entry(br.to_string())
            .or_insert_with(|| (br.clone(), data));
        debug!(%br, size, "stored blob in memory");
        Ok(br.clone().with_size(size))
    }
}

#[async_trait::async_trait]
impl BlobSource for MemoryStore {
    async fn fetch_streaming(
        &self,
        br: &BlobRef,
    ) -> Result<Option<(BlobStream, u64)>, StoreError> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.get(&br.to_string()).map(|(_, data)| {
            let size = data.len() as u64;
            let stream: BlobStream = Box::new(std::io::Cursor::new(data.to_vec()));
            (stream, size)
        }))
    }

    async fn enumerate(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SizedBlobRef>, StoreError> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map
            .iter()
            .filter(|(key, _)| after.is_none_or(|a| key.as_str() > a))
            .take(limit)
            .map(|(_, (br, data))| br.clone().with_size(data.len() as u64))
            .collect())
    }
}

#[async_trait::async_trait]
impl BlobRemover for MemoryStore {
    async fn remove(&self, refs: &[BlobRef]) -> Result<Vec<BlobRef>, StoreError> {
        let mut map = self.blobs.write().expect("lock poisoned");
        let mut removed = Vec::new();
        for br in refs {
            if map.remove(&br.to_string()).is_some() {
                removed.push(br.clone());
            }
        }
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl SeekFetcher for MemoryStore {
    async fn fetch(&self, br: &BlobRef) -> Result<Option<Bytes>, StoreError> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.get(&br.to_string()).map(|(_, data)| data.clone()))
    }
}
