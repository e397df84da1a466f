//! The ingestion coordinator: walk a tree, dedup, bound concurrency.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use hoard_chunk::ChunkMode;
use hoard_jsonsign::{KeyFetcher, SignRequest};
use hoard_schema::{
    StaticSet, map_to_json, new_common_file_map, new_unsigned_permanode, populate_directory_map,
    populate_symlink_map, write_file_map,
};
use hoard_store::BlobSink;
use hoard_types::{BlobRef, SizedBlobRef};
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{FileFingerprint, HaveCache, StatCache};
use crate::client::{PutResult, UploadClient, UploadHandle};
use crate::error::ClientError;

/// Tuning knobs for the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct UploaderConfig {
    /// Global bound on simultaneous file uploads.
    pub file_concurrency: usize,
    /// Bound on outstanding child tasks within one directory.
    pub dir_fanout: usize,
    /// Chunking strategy for regular files.
    pub chunk_mode: ChunkMode,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            file_concurrency: 10,
            dir_fanout: 100,
            chunk_mode: ChunkMode::default(),
        }
    }
}

/// Walks a filesystem path and produces exactly one top-level ref
/// representing the entire tree.
///
/// Concurrency discipline: a global semaphore bounds simultaneous file
/// uploads. A directory holds a token while producing its own blobs but
/// releases it across recursion into children; holding it across recursion
/// deadlocks on trees deeper than the semaphore capacity.
pub struct Uploader {
    client: Arc<UploadClient>,
    stat_cache: Option<Arc<dyn StatCache>>,
    have_cache: Option<Arc<dyn HaveCache>>,
    signer: Option<BlobRef>,
    key_fetcher: Option<Arc<dyn KeyFetcher>>,
    pwd: PathBuf,
    permits: Arc<Semaphore>,
    dir_fanout: usize,
    chunk_mode: ChunkMode,
    cancel: CancellationToken,
}

impl Uploader {
    pub fn new(client: Arc<UploadClient>, config: UploaderConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client,
            stat_cache: None,
            have_cache: None,
            signer: None,
            key_fetcher: None,
            pwd: std::env::current_dir()?,
            permits: Arc::new(Semaphore::new(config.file_concurrency)),
            dir_fanout: config.dir_fanout,
            chunk_mode: config.chunk_mode,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_stat_cache(mut self, cache: Arc<dyn StatCache>) -> Self {
        self.stat_cache = Some(cache);
        self
    }

    pub fn with_have_cache(mut self, cache: Arc<dyn HaveCache>) -> Self {
        self.have_cache = Some(cache);
        self
    }

    /// Configure signing: the ref of the armored public-key blob and the
    /// fetcher for the matching secret key.
    pub fn with_signer(mut self, signer: BlobRef, key_fetcher: Arc<dyn KeyFetcher>) -> Self {
        self.signer = Some(signer);
        self.key_fetcher = Some(key_fetcher);
        self
    }

    /// Token observed at suspension points; cancel it to stop the walk.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The underlying protocol client.
    pub fn client(&self) -> &Arc<UploadClient> {
        &self.client
    }

    // -------------------------------------------------------------------
    // Single-blob and map uploads
    // -------------------------------------------------------------------

    /// Upload one raw blob, consulting the have cache first.
    pub async fn upload_blob_data(&self, data: Bytes) -> Result<PutResult, ClientError> {
        let handle = UploadHandle::from_data(data);
        if let Some(have) = &self.have_cache
            && have.blob_exists(&handle.blob_ref)
        {
            debug!(br = %handle.blob_ref, "have cache hit");
            return Ok(PutResult {
                blob_ref: handle.blob_ref,
                size: handle.size,
                skipped: true,
            });
        }
        let pr = self.client.upload(handle).await?;
        if let Some(have) = &self.have_cache {
            have.note_blob_exists(&pr.blob_ref);
        }
        Ok(pr)
    }

    /// Serialize a schema map canonically and upload it.
    pub async fn upload_map(&self, m: &Map<String, Value>) -> Result<PutResult, ClientError> {
        let json = map_to_json(m)?;
        self.upload_blob_data(Bytes::from(json)).await
    }

    /// Set `camliSigner`, serialize canonically, and sign.
    pub async fn sign_map(&self, m: &mut Map<String, Value>) -> Result<String, ClientError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or(ClientError::Sign(hoard_jsonsign::SignError::MissingSigner))?;
        let key_fetcher = self
            .key_fetcher
            .as_ref()
            .expect("key fetcher configured with signer");

        m.insert("camliSigner".into(), json!(signer.to_string()));
        let unsigned = map_to_json(m)?;
        Ok(SignRequest {
            unsigned_json: unsigned,
            fetcher: &*self.client,
            key_fetcher: &**key_fetcher,
        }
        .sign()
        .await?)
    }

    /// Sign a map and upload the signed bytes.
    pub async fn upload_and_sign_map(
        &self,
        m: &mut Map<String, Value>,
    ) -> Result<PutResult, ClientError> {
        let signed = self.sign_map(m).await?;
        self.upload_blob_data(Bytes::from(signed)).await
    }

    /// Create, sign, and upload a fresh permanode.
    pub async fn upload_new_permanode(&self) -> Result<PutResult, ClientError> {
        let mut m = new_unsigned_permanode();
        self.upload_and_sign_map(&mut m).await
    }

    /// Upload a file's raw bytes as a single blob, no schema.
    pub async fn upload_file_blob(&self, path: &Path) -> Result<PutResult, ClientError> {
        let data = tokio::fs::read(path).await?;
        self.upload_blob_data(Bytes::from(data)).await
    }

    // -------------------------------------------------------------------
    // Tree walk
    // -------------------------------------------------------------------

    /// Ingest `path` (file, directory tree, or symlink) and return the
    /// top-level ref describing it.
    pub async fn upload_path(self: Arc<Self>, path: &Path) -> Result<PutResult, ClientError> {
        self.walk(path.to_path_buf()).await
    }

    fn walk(self: Arc<Self>, path: PathBuf) -> BoxFuture<'static, Result<PutResult, ClientError>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(ClientError::Canceled);
            }

            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("upload semaphore closed");

            let meta = tokio::fs::symlink_metadata(&path).await?;
            let file_type = meta.file_type();

            if file_type.is_file() {
                let fingerprint = FileFingerprint::from_metadata(&meta);
                if let Some(cache) = &self.stat_cache
                    && let Some(cached) = cache.cached_put_result(&self.pwd, &path, &fingerprint)
                {
                    debug!(path = %path.display(), br = %cached.blob_ref, "stat cache hit");
                    return Ok(cached);
                }

                let mut m = new_common_file_map(&path, &meta);
                m.insert("camliType".into(), json!("file"));

                let file = tokio::fs::File::open(&path).await?;
                let sink = CachingSink { up: self.as_ref() };
                let br = write_file_map(&sink, &mut m, file, self.chunk_mode).await?;
                let json = map_to_json(&m)?;

                let result = PutResult {
                    blob_ref: br,
                    size: json.len() as u64,
                    skipped: false,
                };
                if let Some(cache) = &self.stat_cache {
                    cache.add_cached_put_result(&self.pwd, &path, &fingerprint, &result);
                }
                Ok(result)
            } else if file_type.is_symlink() {
                let mut m = new_common_file_map(&path, &meta);
                let target = tokio::fs::read_link(&path).await?;
                populate_symlink_map(&mut m, target.as_os_str().as_encoded_bytes());
                self.upload_map(&m).await
            } else if file_type.is_dir() {
                let mut names: Vec<OsString> = Vec::new();
                let mut entries = tokio::fs::read_dir(&path).await?;
                while let Some(entry) = entries.next_entry().await? {
                    names.push(entry.file_name());
                }
                names.sort();

                // Yield our token while the subtree runs; it may need more
                // tokens than remain, and holding ours would deadlock.
                drop(permit);

                let fanout = Arc::new(Semaphore::new(self.dir_fanout));
                let mut children = JoinSet::new();
                let mut first_err: Option<ClientError> = None;

                for name in &names {
                    if self.cancel.is_cancelled() {
                        first_err.get_or_insert(ClientError::Canceled);
                        break;
                    }
                    let this = self.clone();
                    let fanout = fanout.clone();
                    let child_path = path.join(name);
                    let name = name.clone();
                    children.spawn(async move {
                        let _slot = fanout.acquire_owned().await.expect("fanout closed");
                        (name, this.walk(child_path).await)
                    });
                }

                let mut results: HashMap<OsString, PutResult> = HashMap::new();
                while let Some(joined) = children.join_next().await {
                    match joined {
                        Ok((name, Ok(pr))) => {
                            results.insert(name, pr);
                        }
                        Ok((name, Err(e))) => {
                            warn!(child = ?name, error = %e, "child upload failed");
                            first_err.get_or_insert(e);
                        }
                        Err(join_err) => {
                            first_err
                                .get_or_insert(ClientError::Io(std::io::Error::other(join_err)));
                        }
                    }
                }
                if let Some(e) = first_err {
                    return Err(e);
                }

                // Sorted-name order, regardless of completion order.
                let mut set = StaticSet::new();
                for name in &names {
                    let pr = results.get(name).expect("every child settled");
                    set.add(pr.blob_ref.clone());
                }

                // Take the token back before uploading our own blobs.
                let _permit = self
                    .permits
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("upload semaphore closed");

                let set_result = self.upload_map(&set.to_map()).await?;
                let mut m = new_common_file_map(&path, &meta);
                populate_directory_map(&mut m, &set_result.blob_ref);
                self.upload_map(&m).await
            } else {
                // block/char/fifo/socket
                Err(ClientError::Unimplemented(path))
            }
        })
    }
}

/// Sink handed to the file writer: have-cache-aware stat, have-cache
/// updates on receive.
struct CachingSink<'a> {
    up: &'a Uploader,
}

#[async_trait::async_trait]
impl BlobSink for CachingSink<'_> {
    async fn stat(
        &self,
        refs: &[BlobRef],
    ) -> Result<Vec<SizedBlobRef>, hoard_store::StoreError> {
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for br in refs {
            if self
                .up
                .have_cache
                .as_ref()
                .is_some_and(|have| have.blob_exists(br))
            {
                known.push(br.clone().with_size(0));
            } else {
                unknown.push(br.clone());
            }
        }
        if !unknown.is_empty() {
            known.extend(BlobSink::stat(&*self.up.client, &unknown).await?);
        }
        Ok(known)
    }

    async fn receive(
        &self,
        br: &BlobRef,
        data: Bytes,
    ) -> Result<SizedBlobRef, hoard_store::StoreError> {
        let sized = self.up.client.receive(br, data).await?;
        if let Some(have) = &self.up.have_cache {
            have.note_blob_exists(br);
        }
        Ok(sized)
    }
}
