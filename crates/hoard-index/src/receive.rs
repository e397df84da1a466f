//! The hash-verified receive pipeline.

use std::sync::Arc;

use hoard_jsonsign::VerifyRequest;
use hoard_schema::{FileReader, Superset, nanos_from_rfc3339};
use hoard_store::SeekFetcher;
use hoard_types::{BlobRef, Digester, HashAlgo, SizedBlobRef};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::store::{AttrRow, BlobRow, ClaimRow, FileRow, IndexStore, PathRow};
use crate::{INDEXED_ATTRIBUTES, IndexError, PATH_ATTRIBUTE_PREFIX, magic};

/// How much of a blob to buffer for MIME sniffing and schema analysis.
/// Also the ceiling for holding a claim in memory for verification.
const MAX_SNIFF_SIZE: usize = 1024 * 1024;

/// Accumulates a capped prefix of the body and classifies it.
pub struct Sniffer {
    header: Vec<u8>,
    written: u64,
    superset: Option<Superset>,
    mime: Option<String>,
}

impl Default for Sniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sniffer {
    pub fn new() -> Self {
        Self {
            header: Vec::new(),
            written: 0,
            superset: None,
            mime: None,
        }
    }

    /// Feed a body slice; only the first [`MAX_SNIFF_SIZE`] bytes are kept.
    pub fn write(&mut self, data: &[u8]) {
        self.written += data.len() as u64;
        if self.header.len() < MAX_SNIFF_SIZE {
            let room = MAX_SNIFF_SIZE - self.header.len();
            self.header.extend_from_slice(&data[..data.len().min(room)]);
        }
    }

    /// Whether the body overflowed the sniff buffer.
    pub fn is_truncated(&self) -> bool {
        self.written > MAX_SNIFF_SIZE as u64
    }

    /// The complete body, if it fit in the buffer.
    pub fn body(&self) -> Option<&[u8]> {
        if self.is_truncated() {
            None
        } else {
            Some(&self.header)
        }
    }

    /// Classify the buffered prefix: schema JSON first, then magic numbers.
    pub fn parse(&mut self) {
        if self.header.first() == Some(&b'{')
            && let Ok(ss) = Superset::parse(&self.header)
            && !ss.kind.is_empty()
        {
            self.mime = Some(format!("application/json; camliType={}", ss.kind));
            self.superset = Some(ss);
        }

        if let Some(mime) = magic::mime_type(&self.header) {
            self.mime = Some(mime.to_owned());
        }
    }

    pub fn superset(&self) -> Option<&Superset> {
        self.superset.as_ref()
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }
}

/// Server-side receiver: verifies hashes on arrival, classifies schema
/// blobs, and updates the secondary indexes.
pub struct Indexer {
    store: IndexStore,
    /// Blob source for public keys and for reassembling indexed files.
    fetcher: Arc<dyn SeekFetcher>,
}

impl Indexer {
    pub fn new(store: IndexStore, fetcher: Arc<dyn SeekFetcher>) -> Self {
        Self { store, fetcher }
    }

    /// The underlying index store, for queries.
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Receive one blob: stream through the expected-hash accumulator and
    /// the sniffer, reject on mismatch, then classify and index.
    ///
    /// On rejection no index rows are written. Indexing the same blob
    /// twice is a no-op.
    pub async fn receive(
        &self,
        br: &BlobRef,
        mut body: impl AsyncRead + Unpin,
    ) -> Result<SizedBlobRef, IndexError> {
        let mut digester = Digester::new(br.algo());
        let mut sniffer = Sniffer::new();
        let mut buf = [0u8; 64 * 1024];
        let mut written = 0u64;
        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digester.update(&buf[..n]);
            sniffer.write(&buf[..n]);
            written += n as u64;
        }

        let computed = digester.finish();
        if computed != *br {
            return Err(IndexError::CorruptBlob {
                declared: br.clone(),
                computed,
            });
        }

        sniffer.parse();
        debug!(%br, written, mime = ?sniffer.mime(), truncated = sniffer.is_truncated(), "received blob");

        if let Some(ss) = sniffer.superset().cloned() {
            match ss.kind.as_str() {
                "claim" => self.populate_claim(br, &ss, &sniffer).await?,
                "permanode" => self.populate_permanode(br, &ss)?,
                "file" => self.populate_file(br, &ss).await?,
                _ => {}
            }
        }

        self.store.insert_blob_row(
            br,
            &BlobRow {
                size: written,
                mime: sniffer.mime().map(str::to_owned),
            },
        )?;

        Ok(br.clone().with_size(written))
    }

    async fn populate_claim(
        &self,
        claim_ref: &BlobRef,
        ss: &Superset,
        sniffer: &Sniffer,
    ) -> Result<(), IndexError> {
        // Skip bogus claims with a missing or malformed permanode.
        let Some(permanode) = &ss.permanode else {
            warn!(claim = %claim_ref, "claim without permanode, skipping");
            return Ok(());
        };
        let permanode = permanode.to_string();

        // Verification failure stores the row anyway, with an empty key
        // id, so clients can reconcile after the key arrives.
        let mut verified_key_id = String::new();
        if let Some(body) = sniffer.body()
            && let Ok(raw_json) = std::str::from_utf8(body)
        {
            match VerifyRequest::new(raw_json, &*self.fetcher).verify().await {
                Ok(result) => {
                    verified_key_id = result.key_id;
                    info!(claim = %claim_ref, key_id = %verified_key_id, "verified claim");
                    self.store
                        .insert_signer_key_id(&result.signer, &verified_key_id)?;
                }
                Err(e) => {
                    warn!(claim = %claim_ref, error = %e, "claim verification failure");
                }
            }
        }

        let claim_date = ss.claim_date.clone().unwrap_or_default();
        let claim_type = ss.claim_type.clone().unwrap_or_default();
        self.store.insert_claim_row(
            claim_ref,
            &ClaimRow {
                signer: ss.signer.as_ref().map(|s| s.to_string()),
                verified_key_id: verified_key_id.clone(),
                claim_type: claim_type.clone(),
                claim_date: claim_date.clone(),
                permanode: permanode.clone(),
                attribute: ss.attribute.clone(),
                value: ss.value.clone(),
            },
        )?;

        if !verified_key_id.is_empty() {
            let date_nanos = nanos_from_rfc3339(&claim_date).unwrap_or_default();

            if let Some(attribute) = &ss.attribute {
                if INDEXED_ATTRIBUTES.contains(&attribute.as_str()) {
                    let fulltext = attribute == "tag" || attribute == "title";
                    self.store.insert_attr_row(
                        &permanode,
                        attribute,
                        date_nanos,
                        &AttrRow {
                            key_id: verified_key_id.clone(),
                            claim_type: claim_type.clone(),
                            claim_date: claim_date.clone(),
                            claim_ref: claim_ref.to_string(),
                            value: ss.value.clone(),
                        },
                        fulltext,
                    )?;
                }

                if let Some(suffix) = attribute.strip_prefix(PATH_ATTRIBUTE_PREFIX) {
                    self.store.insert_path_row(
                        date_nanos,
                        &PathRow {
                            claim_ref: claim_ref.to_string(),
                            claim_date: claim_date.clone(),
                            key_id: verified_key_id.clone(),
                            base_ref: permanode.clone(),
                            suffix: suffix.to_owned(),
                            target_ref: ss.value.clone(),
                            active: claim_type != "del-attribute",
                        },
                    )?;
                }
            }
        }

        self.store.touch_permanode(&permanode, &claim_date)?;
        Ok(())
    }

    fn populate_permanode(&self, br: &BlobRef, ss: &Superset) -> Result<(), IndexError> {
        self.store.upsert_permanode(
            &br.to_string(),
            ss.signer.as_ref().map(|s| s.to_string()).as_deref(),
            true,
        )
    }

    async fn populate_file(&self, br: &BlobRef, ss: &Superset) -> Result<(), IndexError> {
        // File reassembly failures are logged, not fatal: the blob row is
        // still written and indexing can be retried by a later receive.
        let reader = match FileReader::new(&*self.fetcher, br).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(file = %br, error = %e, "error indexing file");
                return Ok(());
            }
        };
        let content = match reader.read_all().await {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %br, error = %e, "error reading file content");
                return Ok(());
            }
        };

        let whole_ref = BlobRef::from_data(HashAlgo::Sha1, &content);
        let mime = magic::mime_type(&content).map(str::to_owned);
        let file_name = ss
            .file_name()
            .map(|raw| String::from_utf8_lossy(&raw).into_owned());

        debug!(file = %br, whole = %whole_ref, size = content.len(), "indexed file");
        self.store.insert_file_row(
            br,
            &FileRow {
                whole_ref: whole_ref.to_string(),
                size: content.len() as u64,
                file_name,
                mime,
            },
        )
    }
}
