//! File-based blob storage backend.
//!
//! Stores one file per blob with a 2-level fan-out directory structure:
//! `{base_dir}/{algo}/{digest[0..2]}/{digest[2..4]}/{algo}-{digest}.dat`.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use hoard_types::{BlobRef, SizedBlobRef};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{BlobRemover, BlobSink, BlobSource, BlobStream, SeekFetcher};

/// File-based blob store with 2-level fan-out directory layout.
///
/// Writes are atomic: data is written to a temporary file first, then
/// renamed into place, so a crash never leaves a half-written blob behind.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a file store rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn blob_path(&self, br: &BlobRef) -> PathBuf {
        let digest = br.digest();
        self.base_dir
            .join(br.algo().name())
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(format!("{br}.dat"))
    }
}

#[async_trait::async_trait]
impl BlobSink for FileStore {
    async fn stat(&self, refs: &[BlobRef]) -> Result<Vec<SizedBlobRef>, StoreError> {
        let mut out = Vec::new();
        for br in refs {
            match tokio::fs::metadata(self.blob_path(br)).await {
                Ok(meta) => out.push(br.clone().with_size(meta.len())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Ok(out)
    }

    async fn receive(&self, br: &BlobRef, data: Bytes) -> Result<SizedBlobRef, StoreError> {
        if !br.matches(&data) {
            return Err(StoreError::Corrupt {
                declared: br.clone(),
                computed: BlobRef::from_data(br.algo(), &data),
            });
        }

        let path = self.blob_path(br);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Atomic write: temp file in the same directory, then rename.
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(%br, path = %path.display(), size = data.len(), "stored blob to file");
        Ok(br.clone().with_size(data.len() as u64))
    }
}

#[async_trait::async_trait]
impl BlobSource for FileStore {
    async fn fetch_streaming(
        &self,
        br: &BlobRef,
    ) -> Result<Option<(BlobStream, u64)>, StoreError> {
        let path = self.blob_path(br);
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                let size = file.metadata().await?.len();
                let stream: BlobStream = Box::new(file);
                Ok(Some((stream, size)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn enumerate(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SizedBlobRef>, StoreError> {
        // Collect all refs, then sort; blob counts per store are modest and
        // the fan-out walk has no inherent order.
        let mut found: Vec<(String, u64)> = Vec::new();

        let mut algos = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        while let Some(algo_dir) = algos.next_entry().await? {
            if !algo_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut level0 = tokio::fs::read_dir(algo_dir.path()).await?;
            while let Some(d0) = level0.next_entry().await? {
                if !d0.file_type().await?.is_dir() {
                    continue;
                }
                let mut level1 = tokio::fs::read_dir(d0.path()).await?;
                while let Some(d1) = level1.next_entry().await? {
                    if !d1.file_type().await?.is_dir() {
                        continue;
                    }
                    let mut files = tokio::fs::read_dir(d1.path()).await?;
                    while let Some(entry) = files.next_entry().await? {
                        let name = entry.file_name();
                        if let Some(name) = name.to_str()
                            && let Some(ref_str) = name.strip_suffix(".dat")
                            && BlobRef::parse(ref_str).is_ok()
                        {
                            let size = entry.metadata().await?.len();
                            found.push((ref_str.to_owned(), size));
                        }
                    }
                }
            }
        }

        found.sort();
        Ok(found
            .into_iter()
            .filter(|(key, _)| after.is_none_or(|a| key.as_str() > a))
            .take(limit)
            .map(|(key, size)| {
                BlobRef::parse(&key)
                    .map(|br| br.with_size(size))
                    .map_err(StoreError::Ref)
            })
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait::async_trait]
impl BlobRemover for FileStore {
    async fn remove(&self, refs: &[BlobRef]) -> Result<Vec<BlobRef>, StoreError> {
        let mut removed = Vec::new();
        for br in refs {
            match tokio::fs::remove_file(self.blob_path(br)).await {
                Ok(()) => {
                    debug!(%br, "deleted blob file");
                    removed.push(br.clone());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl SeekFetcher for FileStore {
    async fn fetch(&self, br: &BlobRef) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(self.blob_path(br)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
