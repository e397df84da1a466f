//! Blob protocol request handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::{Form, Multipart, Path, Query, State};
use axum::http::{Response, StatusCode};
use bytes::Bytes;
use hoard_store::{BlobRemover, BlobSink, BlobSource, SeekFetcher};
use hoard_types::{BlobRef, SizedBlobRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{AppState, MAX_UPLOAD_SIZE, ServerError};

/// Cap on one enumeration page.
const MAX_ENUMERATE: usize = 1000;

/// Parse `blobN` form fields into refs, rejecting malformed ones.
fn refs_from_form(fields: &[(String, String)]) -> Result<Vec<BlobRef>, ServerError> {
    let mut refs = Vec::new();
    for (key, value) in fields {
        if !key.starts_with("blob") {
            continue;
        }
        let br = BlobRef::parse(value)
            .map_err(|e| ServerError::BadRequest(format!("bad {key}: {e}")))?;
        refs.push(br);
    }
    Ok(refs)
}

// -----------------------------------------------------------------------
// POST /camli/stat
// -----------------------------------------------------------------------

#[derive(Serialize)]
pub(crate) struct StatResponse {
    stat: Vec<SizedBlobRef>,
    #[serde(rename = "uploadUrl", skip_serializing_if = "Option::is_none")]
    upload_url: Option<String>,
    #[serde(rename = "uploadUrlExpirationSeconds")]
    upload_url_expiration_seconds: u64,
    #[serde(rename = "maxUploadSize")]
    max_upload_size: u64,
    #[serde(rename = "canLongPoll")]
    can_long_poll: bool,
}

/// Report which of the requested blobs exist. `maxwaitsec` is accepted
/// but long-polling is not implemented; the response says so.
pub(crate) async fn stat(
    State(state): State<AppState>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Json<StatResponse>, ServerError> {
    let refs = refs_from_form(&fields)?;
    let stat = state.storage.stat(&refs).await?;
    debug!(requested = refs.len(), present = stat.len(), "stat");

    Ok(Json(StatResponse {
        stat,
        upload_url: state
            .base_url
            .as_deref()
            .map(|base| format!("{base}/camli/upload")),
        upload_url_expiration_seconds: 7200,
        max_upload_size: MAX_UPLOAD_SIZE,
        can_long_poll: false,
    }))
}

// -----------------------------------------------------------------------
// POST /camli/upload
// -----------------------------------------------------------------------

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    received: Vec<SizedBlobRef>,
}

/// Receive multipart blob uploads, one part per blob named by its ref.
///
/// Each body is hash-verified before persisting; a mismatch rejects the
/// whole request with no partial state for that blob.
pub(crate) async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let mut received = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("reading body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let Ok(br) = BlobRef::parse(&name) else {
            warn!(part = %name, "ignoring part not named by a blob ref");
            continue;
        };
        let data: Bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("reading body: {e}")))?;

        // Index first: it verifies the hash and writes no rows on
        // mismatch, so corrupt uploads leave neither index nor storage
        // state behind.
        if let Some(indexer) = &state.indexer {
            indexer
                .receive(&br, &data[..])
                .await
                .map_err(|e| match e {
                    hoard_index::IndexError::CorruptBlob { .. } => {
                        ServerError::CorruptBlob(e.to_string())
                    }
                    other => ServerError::Index(other),
                })?;
        }
        let sized = state.storage.receive(&br, data).await?;
        debug!(br = %sized.blob_ref, size = sized.size, "received blob");
        received.push(sized);
    }

    Ok(Json(UploadResponse { received }))
}

// -----------------------------------------------------------------------
// POST /camli/uploadhelper
// -----------------------------------------------------------------------

#[derive(Serialize)]
pub(crate) struct UploadHelperFile {
    filename: String,
    formname: String,
    fileref: String,
}

#[derive(Serialize)]
pub(crate) struct UploadHelperResponse {
    got: Vec<UploadHelperFile>,
}

#[derive(Deserialize)]
pub(crate) struct UploadHelperQuery {
    #[serde(default)]
    rollsum: Option<String>,
}

/// Delegates [`BlobSink`](hoard_store::BlobSink) to a borrowed storage
/// trait object, so the file writer can target server-local storage.
struct SinkRef<'a>(&'a dyn hoard_store::Storage);

#[async_trait::async_trait]
impl hoard_store::BlobSink for SinkRef<'_> {
    async fn stat(
        &self,
        refs: &[BlobRef],
    ) -> Result<Vec<SizedBlobRef>, hoard_store::StoreError> {
        self.0.stat(refs).await
    }

    async fn receive(
        &self,
        br: &BlobRef,
        data: Bytes,
    ) -> Result<SizedBlobRef, hoard_store::StoreError> {
        self.0.receive(br, data).await
    }
}

/// Web-upload helper: run each posted file through the file writer
/// server-side, producing `file` schema blobs over the local storage.
/// `?rollsum=1` selects content-defined chunking.
pub(crate) async fn upload_helper(
    State(state): State<AppState>,
    Query(query): Query<UploadHelperQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadHelperResponse>, ServerError> {
    let mode = if query.rollsum.as_deref() == Some("1") {
        hoard_chunk::ChunkMode::Rolling
    } else {
        hoard_chunk::ChunkMode::default()
    };

    let mut got = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("reading body: {e}")))?
    {
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let form_name = field.name().unwrap_or_default().to_owned();
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("reading body: {e}")))?;

        let sink = SinkRef(&*state.storage);
        let file_ref = hoard_schema::write_file_from_reader(&sink, &file_name, &data[..], mode)
            .await
            .map_err(|e| ServerError::BadRequest(format!("writing file: {e}")))?;

        // Keep the index coherent: classify the new schema blob too.
        if let Some(indexer) = &state.indexer
            && let Some(raw) = state.storage.fetch(&file_ref).await?
        {
            indexer.receive(&file_ref, &raw[..]).await?;
        }

        debug!(file = %file_name, fileref = %file_ref, "upload helper wrote file");
        got.push(UploadHelperFile {
            filename: file_name,
            formname: form_name,
            fileref: file_ref.to_string(),
        });
    }

    Ok(Json(UploadHelperResponse { got }))
}

// -----------------------------------------------------------------------
// GET /camli/{blobref}
// -----------------------------------------------------------------------

/// Streaming fetch of one blob; 404 when absent.
pub(crate) async fn fetch(
    State(state): State<AppState>,
    Path(blobref): Path<String>,
) -> Result<Response<Body>, ServerError> {
    let br = BlobRef::parse(&blobref)
        .map_err(|e| ServerError::BadRequest(format!("bad blobref: {e}")))?;

    match state.storage.fetch_streaming(&br).await? {
        Some((stream, size)) => {
            let body = Body::from_stream(tokio_util::io::ReaderStream::new(stream));
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-length", size)
                .header("content-type", "application/octet-stream")
                .body(body)
                .expect("response builds"))
        }
        None => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .expect("response builds")),
    }
}

// -----------------------------------------------------------------------
// GET /camli/enumerate-blobs
// -----------------------------------------------------------------------

#[derive(Deserialize)]
pub(crate) struct EnumerateQuery {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
pub(crate) struct EnumerateResponse {
    blobs: Vec<SizedBlobRef>,
    #[serde(rename = "continueAfter", skip_serializing_if = "Option::is_none")]
    continue_after: Option<String>,
}

/// Enumerate stored blobs in ref order, `after`-exclusive, paginated.
pub(crate) async fn enumerate(
    State(state): State<AppState>,
    Query(query): Query<EnumerateQuery>,
) -> Result<Json<EnumerateResponse>, ServerError> {
    let limit = query.limit.unwrap_or(MAX_ENUMERATE).min(MAX_ENUMERATE);
    let blobs = state.storage.enumerate(query.after.as_deref(), limit).await?;

    let continue_after = if blobs.len() == limit {
        blobs.last().map(|s| s.blob_ref.to_string())
    } else {
        None
    };

    Ok(Json(EnumerateResponse {
        blobs,
        continue_after,
    }))
}

// -----------------------------------------------------------------------
// POST /camli/remove
// -----------------------------------------------------------------------

#[derive(Serialize)]
pub(crate) struct RemoveResponse {
    removed: Vec<String>,
}

/// Remove blobs. The response enumerates what was actually deleted;
/// removing an absent blob is not an error.
pub(crate) async fn remove(
    State(state): State<AppState>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Json<RemoveResponse>, ServerError> {
    let refs = refs_from_form(&fields)?;
    let removed = state.storage.remove(&refs).await?;
    debug!(requested = refs.len(), removed = removed.len(), "remove");

    Ok(Json(RemoveResponse {
        removed: removed.iter().map(BlobRef::to_string).collect(),
    }))
}
