//! Reassemble `file`/`bytes` blobs back into their original byte stream.

use std::future::Future;
use std::pin::Pin;

use hoard_store::SeekFetcher;
use hoard_types::BlobRef;

use crate::superset::{BytesPart, Superset};
use crate::SchemaError;

/// Reads the content described by a `file` or `bytes` schema blob.
///
/// Parts are applied in order with their offsets; interior `bytesRef`
/// parts recurse into nested `bytes` blobs. A part naming both `blobRef`
/// and `bytesRef` is rejected as an input error.
pub struct FileReader<'a> {
    fetcher: &'a dyn SeekFetcher,
    ss: Superset,
}

impl<'a> FileReader<'a> {
    /// Load the schema blob at `br` and prepare to read its content.
    pub async fn new(fetcher: &'a dyn SeekFetcher, br: &BlobRef) -> Result<Self, SchemaError> {
        let data = fetcher
            .fetch(br)
            .await?
            .ok_or_else(|| SchemaError::MissingBlob(br.clone()))?;
        let ss = Superset::parse_at(br, &data)?;
        if ss.kind != "file" && ss.kind != "bytes" {
            return Err(SchemaError::WrongKind {
                expected: "file",
                found: ss.kind,
            });
        }
        Ok(Self { fetcher, ss })
    }

    /// The parsed schema blob.
    pub fn superset(&self) -> &Superset {
        &self.ss
    }

    /// Logical size: the sum of the declared part sizes.
    pub fn size(&self) -> u64 {
        self.ss.sum_parts_size()
    }

    /// Read the entire content into memory.
    pub async fn read_all(&self) -> Result<Vec<u8>, SchemaError> {
        let mut out = Vec::with_capacity(self.size() as usize);
        append_parts(
            self.fetcher,
            self.ss.parts.as_deref().unwrap_or_default(),
            &mut out,
        )
        .await?;
        Ok(out)
    }
}

fn append_parts<'a>(
    fetcher: &'a dyn SeekFetcher,
    parts: &'a [BytesPart],
    out: &'a mut Vec<u8>,
) -> Pin<Box<dyn Future<Output = Result<(), SchemaError>> + Send + 'a>> {
    Box::pin(async move {
        for part in parts {
            let (br, is_bytes) = part.referent()?;
            let content: Vec<u8> = if is_bytes {
                let data = fetcher
                    .fetch(br)
                    .await?
                    .ok_or_else(|| SchemaError::MissingBlob(br.clone()))?;
                let inner = Superset::parse_at(br, &data)?;
                if inner.kind != "bytes" {
                    return Err(SchemaError::WrongKind {
                        expected: "bytes",
                        found: inner.kind,
                    });
                }
                let mut buf = Vec::with_capacity(inner.sum_parts_size() as usize);
                append_parts(fetcher, inner.parts.as_deref().unwrap_or_default(), &mut buf)
                    .await?;
                buf
            } else {
                fetcher
                    .fetch(br)
                    .await?
                    .ok_or_else(|| SchemaError::MissingBlob(br.clone()))?
                    .to_vec()
            };

            let end = part.offset.checked_add(part.size);
            if end.is_none() || end.unwrap() > content.len() as u64 {
                return Err(SchemaError::PartOverrun {
                    blob_ref: br.clone(),
                    offset: part.offset,
                    size: part.size,
                    len: content.len() as u64,
                });
            }
            out.extend_from_slice(
                &content[part.offset as usize..(part.offset + part.size) as usize],
            );
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hoard_store::{BlobSink, MemoryStore};
    use hoard_types::HashAlgo;
    use serde_json::json;

    async fn put(store: &MemoryStore, data: &[u8]) -> BlobRef {
        let br = BlobRef::from_data(HashAlgo::Sha1, data);
        store
            .receive(&br, Bytes::copy_from_slice(data))
            .await
            .unwrap();
        br
    }

    async fn put_json(store: &MemoryStore, v: serde_json::Value) -> BlobRef {
        put(store, v.to_string().as_bytes()).await
    }

    #[tokio::test]
    async fn test_offset_slicing() {
        let store = MemoryStore::new();
        let leaf = put(&store, b"0123456789").await;
        let file = put_json(
            &store,
            json!({
                "camliVersion": 1,
                "camliType": "file",
                "parts": [
                    {"blobRef": leaf.to_string(), "size": 4, "offset": 3},
                    {"blobRef": leaf.to_string(), "size": 2},
                ]
            }),
        )
        .await;

        let reader = FileReader::new(&store, &file).await.unwrap();
        assert_eq!(reader.read_all().await.unwrap(), b"345601");
    }

    #[tokio::test]
    async fn test_nested_bytes_blob() {
        let store = MemoryStore::new();
        let leaf_a = put(&store, b"aaaa").await;
        let leaf_b = put(&store, b"bbbb").await;
        let inner = put_json(
            &store,
            json!({
                "camliVersion": 1,
                "camliType": "bytes",
                "parts": [
                    {"blobRef": leaf_a.to_string(), "size": 4},
                    {"blobRef": leaf_b.to_string(), "size": 4},
                ]
            }),
        )
        .await;
        let file = put_json(
            &store,
            json!({
                "camliVersion": 1,
                "camliType": "file",
                "parts": [
                    {"bytesRef": inner.to_string(), "size": 6, "offset": 1},
                ]
            }),
        )
        .await;

        let reader = FileReader::new(&store, &file).await.unwrap();
        assert_eq!(reader.read_all().await.unwrap(), b"aaabbb");
    }

    #[tokio::test]
    async fn test_both_refs_rejected_on_read() {
        let store = MemoryStore::new();
        let leaf = put(&store, b"data").await;
        let file = put_json(
            &store,
            json!({
                "camliVersion": 1,
                "camliType": "file",
                "parts": [
                    {"blobRef": leaf.to_string(), "bytesRef": leaf.to_string(), "size": 4},
                ]
            }),
        )
        .await;

        let reader = FileReader::new(&store, &file).await.unwrap();
        assert!(matches!(
            reader.read_all().await,
            Err(SchemaError::ConflictingPart)
        ));
    }

    #[tokio::test]
    async fn test_part_overrun_rejected() {
        let store = MemoryStore::new();
        let leaf = put(&store, b"short").await;
        let file = put_json(
            &store,
            json!({
                "camliVersion": 1,
                "camliType": "file",
                "parts": [
                    {"blobRef": leaf.to_string(), "size": 10},
                ]
            }),
        )
        .await;

        let reader = FileReader::new(&store, &file).await.unwrap();
        assert!(matches!(
            reader.read_all().await,
            Err(SchemaError::PartOverrun { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_kind_rejected() {
        let store = MemoryStore::new();
        let pn = put_json(
            &store,
            json!({"camliVersion": 1, "camliType": "permanode", "random": "x"}),
        )
        .await;
        assert!(matches!(
            FileReader::new(&store, &pn).await,
            Err(SchemaError::WrongKind { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = MemoryStore::new();
        let ghost = BlobRef::from_data(HashAlgo::Sha1, b"never stored");
        assert!(matches!(
            FileReader::new(&store, &ghost).await,
            Err(SchemaError::MissingBlob(_))
        ));
    }
}
