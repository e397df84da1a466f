//! HTTP client for a remote blob server.

use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use hoard_store::{BlobRemover, BlobSink, BlobSource, BlobStream, SeekFetcher, StoreError};
use hoard_types::{BlobRef, HashAlgo, SizedBlobRef};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Transport retries: attempts and base delay for exponential backoff.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// One blob ready to upload.
pub struct UploadHandle {
    pub blob_ref: BlobRef,
    pub size: u64,
    pub contents: Bytes,
}

impl UploadHandle {
    /// Hash `data` and wrap it for upload.
    pub fn from_data(data: Bytes) -> Self {
        let blob_ref = BlobRef::from_data(HashAlgo::Sha1, &data);
        Self {
            blob_ref,
            size: data.len() as u64,
            contents: data,
        }
    }
}

/// Outcome of putting one blob (or one whole file/tree).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    pub blob_ref: BlobRef,
    pub size: u64,
    /// True when the server already had the blob and nothing was sent.
    pub skipped: bool,
}

/// Response of `POST /camli/stat`.
#[derive(Debug, Deserialize)]
pub struct StatResponse {
    #[serde(default)]
    pub stat: Vec<SizedBlobRef>,
    #[serde(rename = "uploadUrl", default)]
    pub upload_url: Option<String>,
    #[serde(rename = "uploadUrlExpirationSeconds", default)]
    pub upload_url_expiration_seconds: Option<u64>,
    #[serde(rename = "maxUploadSize", default)]
    pub max_upload_size: Option<u64>,
    #[serde(rename = "canLongPoll", default)]
    pub can_long_poll: bool,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    received: Vec<SizedBlobRef>,
}

#[derive(Debug, Deserialize)]
struct RemoveResponse {
    #[serde(default)]
    removed: Vec<String>,
}

/// Response of `GET /camli/enumerate-blobs`.
#[derive(Debug, Deserialize)]
pub struct EnumerateResponse {
    #[serde(default)]
    pub blobs: Vec<SizedBlobRef>,
    #[serde(rename = "continueAfter", default)]
    pub continue_after: Option<String>,
}

/// HTTP client for the blob-server protocol.
///
/// Every request carries HTTP Basic auth. The client keeps one connection
/// pool and is safe for concurrent use; transport failures are retried
/// with bounded exponential backoff before surfacing.
pub struct UploadClient {
    server: String,
    username: String,
    password: String,
    http: reqwest::Client,
}

impl UploadClient {
    /// Create a client for `server` (e.g. `https://hoard.example.com`).
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let mut server = server.into();
        while server.ends_with('/') {
            server.pop();
        }
        Ok(Self {
            server,
            username: username.into(),
            password: password.into(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server)
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.basic_auth(&self.username, Some(&self.password))
    }

    /// Retry a request whose builder can be cloned (no streaming body).
    async fn send_with_retry(
        &self,
        rb: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ClientError> {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_err = None;
        for attempt in 0..RETRY_ATTEMPTS {
            let Some(rb) = rb.try_clone() else {
                // Unclonable body: single shot.
                return Ok(rb.send().await?.error_for_status()?);
            };
            match rb.send().await.and_then(|r| r.error_for_status()) {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    // Client errors (4xx) won't improve on retry.
                    if e.status().is_some_and(|s| s.is_client_error()) {
                        return Err(e.into());
                    }
                    warn!(attempt, error = %e, "request failed, backing off");
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        Err(last_err.expect("at least one attempt").into())
    }

    /// `POST /camli/stat` — which of `refs` does the server have?
    ///
    /// `wait` maps to `maxwaitsec` for servers that support long-polling.
    pub async fn stat(
        &self,
        refs: &[BlobRef],
        wait: Option<Duration>,
    ) -> Result<StatResponse, ClientError> {
        let mut form: Vec<(String, String)> = refs
            .iter()
            .enumerate()
            .map(|(n, br)| (format!("blob{}", n + 1), br.to_string()))
            .collect();
        if let Some(wait) = wait {
            form.push(("maxwaitsec".into(), wait.as_secs().to_string()));
        }

        let rb = self.authed(self.http.post(self.url("/camli/stat")).form(&form));
        let resp = self.send_with_retry(rb).await?;
        Ok(resp.json().await?)
    }

    /// Upload one blob: stat first, then multipart POST to the upload URL.
    ///
    /// Returns `skipped: true` without sending the body when the server
    /// already has the blob; callers rely on this to short-circuit.
    pub async fn upload(&self, handle: UploadHandle) -> Result<PutResult, ClientError> {
        let stat = self.stat(std::slice::from_ref(&handle.blob_ref), None).await?;
        if stat.stat.iter().any(|s| s.blob_ref == handle.blob_ref) {
            debug!(br = %handle.blob_ref, "server already has blob");
            return Ok(PutResult {
                blob_ref: handle.blob_ref,
                size: handle.size,
                skipped: true,
            });
        }

        let upload_url = stat
            .upload_url
            .unwrap_or_else(|| self.url("/camli/upload"));

        // Multipart bodies are not clonable; retry by rebuilding the form.
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 0u32;
        let resp: UploadResponse = loop {
            let part = reqwest::multipart::Part::bytes(handle.contents.to_vec())
                .file_name(handle.blob_ref.to_string());
            let form =
                reqwest::multipart::Form::new().part(handle.blob_ref.to_string(), part);
            let rb = self.authed(self.http.post(&upload_url).multipart(form));
            match rb.send().await.and_then(|r| r.error_for_status()) {
                Ok(resp) => break resp.json().await?,
                Err(e) => {
                    attempt += 1;
                    if attempt >= RETRY_ATTEMPTS
                        || e.status().is_some_and(|s| s.is_client_error())
                    {
                        return Err(e.into());
                    }
                    warn!(attempt, error = %e, "upload failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        };

        let received = resp
            .received
            .iter()
            .find(|r| r.blob_ref == handle.blob_ref)
            .ok_or_else(|| ClientError::UploadRejected(handle.blob_ref.clone()))?;

        Ok(PutResult {
            blob_ref: handle.blob_ref.clone(),
            size: received.size,
            skipped: false,
        })
    }

    /// `GET /camli/<blobref>` — streaming fetch. `None` on 404.
    pub async fn fetch_blob(
        &self,
        br: &BlobRef,
    ) -> Result<Option<(BlobStream, u64)>, ClientError> {
        let rb = self.authed(self.http.get(self.url(&format!("/camli/{br}"))));

        let mut delay = RETRY_BASE_DELAY;
        let mut last_err: Option<reqwest::Error> = None;
        for attempt in 0..RETRY_ATTEMPTS {
            let rb = rb.try_clone().expect("GET is clonable");
            match rb.send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Ok(None);
                }
                Ok(resp) => match resp.error_for_status() {
                    Ok(resp) => {
                        let size = resp.content_length().unwrap_or(0);
                        let stream = Box::pin(resp.bytes_stream().map_err(std::io::Error::other));
                        let reader: BlobStream =
                            Box::new(tokio_util::io::StreamReader::new(stream));
                        return Ok(Some((reader, size)));
                    }
                    Err(e) if e.status().is_some_and(|s| s.is_client_error()) => {
                        return Err(e.into());
                    }
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e),
            }
            warn!(attempt, br = %br, "fetch failed, backing off");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        Err(last_err.expect("at least one attempt").into())
    }

    /// `GET /camli/enumerate-blobs` — one page of refs after `after`.
    pub async fn enumerate_page(
        &self,
        after: Option<&str>,
        limit: usize,
        wait: Option<Duration>,
    ) -> Result<EnumerateResponse, ClientError> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        if let Some(wait) = wait {
            query.push(("maxwaitsec", wait.as_secs().to_string()));
        }
        let rb = self.authed(
            self.http
                .get(self.url("/camli/enumerate-blobs"))
                .query(&query),
        );
        let resp = self.send_with_retry(rb).await?;
        Ok(resp.json().await?)
    }

    /// `POST /camli/remove` — remove blobs, verifying the server's answer.
    ///
    /// Every requested ref must come back in the `removed` set; any absent
    /// ref is reported as [`ClientError::RemoveIncomplete`]. Removing a
    /// blob the server never had is not an error server-side, so callers
    /// that want idempotent removal should stat first.
    pub async fn remove_blobs(&self, refs: &[BlobRef]) -> Result<(), ClientError> {
        let form: Vec<(String, String)> = refs
            .iter()
            .enumerate()
            .map(|(n, br)| (format!("blob{}", n + 1), br.to_string()))
            .collect();

        let rb = self.authed(self.http.post(self.url("/camli/remove")).form(&form));
        let resp = self.send_with_retry(rb).await?;
        let removed: RemoveResponse = resp.json().await?;

        let mut needs_delete: std::collections::HashSet<String> =
            refs.iter().map(|br| br.to_string()).collect();
        for done in &removed.removed {
            needs_delete.remove(done);
        }
        if !needs_delete.is_empty() {
            let mut missing: Vec<String> = needs_delete.into_iter().collect();
            missing.sort();
            return Err(ClientError::RemoveIncomplete(missing));
        }
        Ok(())
    }
}

fn to_store_err(e: ClientError) -> StoreError {
    StoreError::Io(std::io::Error::other(e))
}

#[async_trait::async_trait]
impl BlobSink for UploadClient {
    async fn stat(&self, refs: &[BlobRef]) -> Result<Vec<SizedBlobRef>, StoreError> {
        let resp = UploadClient::stat(self, refs, None)
            .await
            .map_err(to_store_err)?;
        Ok(resp.stat)
    }

    async fn receive(&self, br: &BlobRef, data: Bytes) -> Result<SizedBlobRef, StoreError> {
        let pr = self
            .upload(UploadHandle {
                blob_ref: br.clone(),
                size: data.len() as u64,
                contents: data,
            })
            .await
            .map_err(to_store_err)?;
        Ok(pr.blob_ref.with_size(pr.size))
    }
}

#[async_trait::async_trait]
impl BlobSource for UploadClient {
    async fn fetch_streaming(
        &self,
        br: &BlobRef,
    ) -> Result<Option<(BlobStream, u64)>, StoreError> {
        self.fetch_blob(br).await.map_err(to_store_err)
    }

    async fn enumerate(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SizedBlobRef>, StoreError> {
        let page = self
            .enumerate_page(after, limit, None)
            .await
            .map_err(to_store_err)?;
        Ok(page.blobs)
    }
}

#[async_trait::async_trait]
impl BlobRemover for UploadClient {
    async fn remove(&self, refs: &[BlobRef]) -> Result<Vec<BlobRef>, StoreError> {
        self.remove_blobs(refs).await.map_err(to_store_err)?;
        Ok(refs.to_vec())
    }
}

#[async_trait::async_trait]
impl SeekFetcher for UploadClient {
    async fn fetch(&self, br: &BlobRef) -> Result<Option<Bytes>, StoreError> {
        match self.fetch_blob(br).await.map_err(to_store_err)? {
            Some((mut stream, size)) => {
                let mut buf = Vec::with_capacity(size as usize);
                stream.read_to_end(&mut buf).await?;
                Ok(Some(Bytes::from(buf)))
            }
            None => Ok(None),
        }
    }
}
