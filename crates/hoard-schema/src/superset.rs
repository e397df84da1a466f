//! [`Superset`] — permissive view over any schema blob.

use hoard_types::BlobRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::SchemaError;

/// The superset of common schema keys, as a convenient parse target.
///
/// Any kind of schema blob loads into this structure; fields that the kind
/// doesn't use stay `None`. Keys this struct doesn't know about are
/// preserved in `rest` and emitted again on re-serialization, so signature
/// verification of round-tripped blobs still succeeds across version drift.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Superset {
    /// The ref this blob was loaded from, when known. Not part of the JSON.
    #[serde(skip)]
    pub blob_ref: Option<BlobRef>,

    #[serde(rename = "camliVersion")]
    pub version: u64,
    #[serde(rename = "camliType")]
    pub kind: String,

    #[serde(rename = "camliSigner", default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<BlobRef>,
    #[serde(rename = "camliSig", default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,

    #[serde(rename = "claimType", default, skip_serializing_if = "Option::is_none")]
    pub claim_type: Option<String>,
    #[serde(rename = "claimDate", default, skip_serializing_if = "Option::is_none")]
    pub claim_date: Option<String>,

    #[serde(rename = "permaNode", default, skip_serializing_if = "Option::is_none")]
    pub permanode: Option<BlobRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(rename = "fileNameBytes", default, skip_serializing_if = "Option::is_none")]
    pub file_name_bytes: Option<Vec<Value>>,

    #[serde(rename = "symlinkTarget", default, skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<String>,
    #[serde(
        rename = "symlinkTargetBytes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub symlink_target_bytes: Option<Vec<Value>>,

    #[serde(rename = "unixPermission", default, skip_serializing_if = "Option::is_none")]
    pub unix_permission: Option<String>,
    #[serde(rename = "unixOwnerId", default, skip_serializing_if = "Option::is_none")]
    pub unix_owner_id: Option<u32>,
    #[serde(rename = "unixOwner", default, skip_serializing_if = "Option::is_none")]
    pub unix_owner: Option<String>,
    #[serde(rename = "unixGroupId", default, skip_serializing_if = "Option::is_none")]
    pub unix_group_id: Option<u32>,
    #[serde(rename = "unixGroup", default, skip_serializing_if = "Option::is_none")]
    pub unix_group: Option<String>,
    #[serde(rename = "unixMtime", default, skip_serializing_if = "Option::is_none")]
    pub unix_mtime: Option<String>,
    #[serde(rename = "unixCtime", default, skip_serializing_if = "Option::is_none")]
    pub unix_ctime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<BytesPart>>,

    /// For directories: ref of a `static-set` blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<BlobRef>,
    /// For static sets: refs of the members, in insertion order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<BlobRef>>,

    /// Unknown keys, preserved verbatim for re-serialization.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Superset {
    /// Parse a schema blob from its JSON bytes.
    pub fn parse(data: &[u8]) -> Result<Self, SchemaError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Like [`parse`](Self::parse), recording the ref the bytes came from.
    pub fn parse_at(br: &BlobRef, data: &[u8]) -> Result<Self, SchemaError> {
        let mut ss = Self::parse(data)?;
        ss.blob_ref = Some(br.clone());
        Ok(ss)
    }

    /// The file name, decoding `fileNameBytes` when the UTF-8 field is absent.
    pub fn file_name(&self) -> Option<Vec<u8>> {
        match (&self.file_name, &self.file_name_bytes) {
            (Some(name), _) => Some(name.as_bytes().to_vec()),
            (None, Some(mixed)) => Some(bytes_from_mixed_array(mixed)),
            (None, None) => None,
        }
    }

    /// The symlink target, decoding `symlinkTargetBytes` when needed.
    pub fn symlink_target(&self) -> Option<Vec<u8>> {
        match (&self.symlink_target, &self.symlink_target_bytes) {
            (Some(target), _) => Some(target.as_bytes().to_vec()),
            (None, Some(mixed)) => Some(bytes_from_mixed_array(mixed)),
            (None, None) => None,
        }
    }

    /// Sum of the declared part sizes.
    pub fn sum_parts_size(&self) -> u64 {
        self.parts
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|p| p.size)
            .sum()
    }
}

/// One piece of a `file`/`bytes` blob's content.
///
/// Exactly one of `blob_ref` (a raw leaf) or `bytes_ref` (another `bytes`
/// schema blob, enabling trees of chunks) must be set. The part contributes
/// `size` bytes from its referent starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytesPart {
    pub size: u64,

    #[serde(rename = "blobRef", default, skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<BlobRef>,
    #[serde(rename = "bytesRef", default, skip_serializing_if = "Option::is_none")]
    pub bytes_ref: Option<BlobRef>,

    #[serde(default, skip_serializing_if = "offset_is_zero")]
    pub offset: u64,
}

fn offset_is_zero(offset: &u64) -> bool {
    *offset == 0
}

impl BytesPart {
    /// Leaf part referencing a raw blob.
    pub fn leaf(blob_ref: BlobRef, size: u64) -> Self {
        Self {
            size,
            blob_ref: Some(blob_ref),
            bytes_ref: None,
            offset: 0,
        }
    }

    /// Interior part referencing a `bytes` schema blob.
    pub fn bytes(bytes_ref: BlobRef, size: u64) -> Self {
        Self {
            size,
            blob_ref: None,
            bytes_ref: Some(bytes_ref),
            offset: 0,
        }
    }

    /// The single referent, rejecting both-set and neither-set parts.
    pub fn referent(&self) -> Result<(&BlobRef, bool), SchemaError> {
        match (&self.blob_ref, &self.bytes_ref) {
            (Some(_), Some(_)) => Err(SchemaError::ConflictingPart),
            (Some(br), None) => Ok((br, false)),
            (None, Some(br)) => Ok((br, true)),
            (None, None) => Err(SchemaError::MissingPartRef),
        }
    }
}

/// Reconstruct a byte string from a mixed array of UTF-8 strings and
/// integers 0–255.
pub fn bytes_from_mixed_array(parts: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        match part {
            Value::String(s) => out.extend_from_slice(s.as_bytes()),
            Value::Number(n) => {
                if let Some(b) = n.as_u64().filter(|b| *b <= 255) {
                    out.push(b as u8);
                }
            }
            _ => {}
        }
    }
    out
}

/// Encode a possibly non-UTF-8 byte string as a mixed array: maximal valid
/// UTF-8 runs become strings, stray bytes become integers.
pub fn mixed_array_from_bytes(mut bytes: &[u8]) -> Vec<Value> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                out.push(Value::String(s.to_owned()));
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if valid > 0 {
                    // Safe: from_utf8 just validated this prefix.
                    let s = std::str::from_utf8(&bytes[..valid]).expect("validated prefix");
                    out.push(Value::String(s.to_owned()));
                }
                out.push(Value::from(bytes[valid] as u64));
                bytes = &bytes[valid + 1..];
            }
        }
    }
    out
}
