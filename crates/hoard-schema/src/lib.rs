//! Schema blobs: the JSON metadata layer of the hoard store.
//!
//! A schema blob is a JSON object carrying at least `camliVersion: 1` and
//! `camliType: <kind>`. This crate provides:
//!
//! - [`Superset`] — a permissive parser that loads any kind into a common
//!   structure for inspection, preserving unknown fields for byte-stable
//!   re-serialization.
//! - Typed builders for every kind (`file`, `bytes`, `directory`,
//!   `symlink`, `static-set`, `permanode`, `claim`, `share`).
//! - [`map_to_json`] — the canonical serialization (the `camliVersion`
//!   line first, then a stable two-space-indented body), so signed bytes
//!   are reproducible.
//! - [`write_file_map`] — chunk a byte stream, upload the chunks through a
//!   [`BlobSink`](hoard_store::BlobSink), and emit the `file` blob.
//! - [`FileReader`] — reassemble a `file`/`bytes` blob's parts back into
//!   the original byte stream.
//! - RFC3339 timestamp helpers used by claims and unix metadata.

mod build;
mod dates;
mod error;
mod filereader;
mod filewriter;
mod superset;

pub use build::{
    SHARE_HAVE_REF, StaticSet, new_bytes_map, new_claim, new_common_file_map, new_file_map,
    new_share_map, new_unsigned_permanode, populate_directory_map, populate_parts,
    populate_symlink_map,
};
pub use build::{new_add_attribute_claim, new_del_attribute_claim, new_set_attribute_claim};
pub use dates::{nanos_from_rfc3339, now_nanos, rfc3339_from_nanos};
pub use error::SchemaError;
pub use filereader::FileReader;
pub use filewriter::{upload_blob, write_file_from_reader, write_file_map};
pub use superset::{BytesPart, Superset, bytes_from_mixed_array, mixed_array_from_bytes};

use serde_json::{Map, Value};

/// Canonical serialization of a schema map.
///
/// Emits the `camliVersion` key on the first line byte-exactly, followed by
/// the remaining keys as stable, alphabetically ordered, two-space-indented
/// JSON, terminated with a newline. Signing depends on this byte stability.
pub fn map_to_json(m: &Map<String, Value>) -> Result<String, SchemaError> {
    let version = m.get("camliVersion").ok_or(SchemaError::NoVersion)?;

    let mut rest = m.clone();
    rest.remove("camliVersion");
    let body = serde_json::to_string_pretty(&sort_keys(Value::Object(rest)))?;

    // `body` is `{\n  ...\n}`; splice our version line in place of the `{\n`.
    Ok(format!("{{\"camliVersion\": {version},\n{}\n", &body[2..]))
}

/// Recursively order object keys so serialization is deterministic.
fn sort_keys(v: Value) -> Value {
    match v {
        Value::Object(m) => {
            let mut entries: Vec<(String, Value)> = m.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_map_to_json_version_first_line() {
        let m = map(json!({"camliVersion": 1, "camliType": "bytes", "parts": []}));
        let out = map_to_json(&m).unwrap();
        assert!(out.starts_with("{\"camliVersion\": 1,\n"));
        assert!(out.ends_with("}\n"));
    }

    #[test]
    fn test_map_to_json_deterministic_across_insertion_order() {
        let mut a = Map::new();
        a.insert("camliVersion".into(), json!(1));
        a.insert("camliType".into(), json!("file"));
        a.insert("fileName".into(), json!("x"));

        let mut b = Map::new();
        b.insert("fileName".into(), json!("x"));
        b.insert("camliType".into(), json!("file"));
        b.insert("camliVersion".into(), json!(1));

        assert_eq!(map_to_json(&a).unwrap(), map_to_json(&b).unwrap());
    }

    #[test]
    fn test_map_to_json_missing_version() {
        let m = map(json!({"camliType": "bytes"}));
        assert!(matches!(map_to_json(&m), Err(SchemaError::NoVersion)));
    }

    #[test]
    fn test_map_to_json_round_trips_through_parser() {
        let m = map(json!({
            "camliVersion": 1,
            "camliType": "file",
            "fileName": "hello.txt",
            "parts": [{"blobRef": "sha1-f572d396fae9206628714fb2ce00f72e94f2258f", "size": 6}],
        }));
        let out = map_to_json(&m).unwrap();
        let back: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(back["camliVersion"], 1);
        assert_eq!(back["camliType"], "file");
        assert_eq!(back["parts"][0]["size"], 6);
    }
}
