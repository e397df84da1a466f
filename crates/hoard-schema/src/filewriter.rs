//! Assemble `file`/`bytes` schema blobs from a chunked byte stream.

use bytes::Bytes;
use hoard_chunk::ChunkMode;
use hoard_store::BlobSink;
use hoard_types::{BlobRef, HashAlgo, SizedBlobRef};
use serde_json::{Map, Value};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::superset::BytesPart;
use crate::{SchemaError, map_to_json, new_bytes_map, new_file_map, populate_parts};

/// Maximum parts carried flat in one `file`/`bytes` map before runs are
/// folded into intermediate `bytes` blobs. Keeps large files as a shallow
/// tree rather than a list of thousands of parts.
const MAX_FLAT_PARTS: usize = 255;

/// Upload one raw blob through the sink, skipping the send when the sink
/// already has it.
pub async fn upload_blob(sink: &dyn BlobSink, data: Bytes) -> Result<SizedBlobRef, SchemaError> {
    let br = BlobRef::from_data(HashAlgo::Sha1, &data);
    let size = data.len() as u64;
    let known = sink.stat(std::slice::from_ref(&br)).await?;
    if known.iter().any(|s| s.blob_ref == br) {
        debug!(%br, size, "sink already has blob, skipping send");
        return Ok(br.with_size(size));
    }
    Ok(sink.receive(&br, data).await?)
}

/// Chunk `reader`, upload the chunks, fill `m`'s `parts`, and upload the
/// finished map. Returns the ref of the top-level schema blob.
///
/// `m` must already carry `camliType` of `file` or `bytes`; chunks are
/// appended to `parts` in stream order, and the declared size equals the
/// sum of the part sizes.
pub async fn write_file_map(
    sink: &dyn BlobSink,
    m: &mut Map<String, Value>,
    reader: impl AsyncRead + Unpin,
    mode: ChunkMode,
) -> Result<BlobRef, SchemaError> {
    let chunks = mode.chunk_stream(reader).await?;

    let mut size = 0u64;
    let mut parts = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        size += chunk.len();
        let sized = upload_blob(sink, chunk.data).await?;
        parts.push(BytesPart::leaf(sized.blob_ref, sized.size));
    }

    let parts = fold_parts(sink, parts).await?;
    populate_parts(m, size, &parts)?;

    let json = map_to_json(m)?;
    let sized = upload_blob(sink, Bytes::from(json)).await?;
    Ok(sized.blob_ref)
}

/// Convenience wrapper: build a `file` map named after `file_name` and
/// write `reader` through it with the given chunking mode.
pub async fn write_file_from_reader(
    sink: &dyn BlobSink,
    file_name: &str,
    reader: impl AsyncRead + Unpin,
    mode: ChunkMode,
) -> Result<BlobRef, SchemaError> {
    let mut m = new_file_map(std::path::Path::new(file_name));
    write_file_map(sink, &mut m, reader, mode).await
}

/// Fold runs of parts into intermediate `bytes` blobs until the list fits
/// flat. Each fold level preserves order and total size.
async fn fold_parts(
    sink: &dyn BlobSink,
    mut parts: Vec<BytesPart>,
) -> Result<Vec<BytesPart>, SchemaError> {
    while parts.len() > MAX_FLAT_PARTS {
        let mut next = Vec::with_capacity(parts.len() / MAX_FLAT_PARTS + 1);
        for run in parts.chunks(MAX_FLAT_PARTS) {
            if run.len() == 1 {
                next.push(run[0].clone());
                continue;
            }
            let run_size: u64 = run.iter().map(|p| p.size).sum();
            let mut bm = new_bytes_map();
            populate_parts(&mut bm, run_size, run)?;
            let json = map_to_json(&bm)?;
            let sized = upload_blob(sink, Bytes::from(json)).await?;
            next.push(BytesPart::bytes(sized.blob_ref, run_size));
        }
        parts = next;
    }
    Ok(parts)
}
