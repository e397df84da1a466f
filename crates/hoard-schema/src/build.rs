//! Typed constructors for each schema blob kind.

use std::path::Path;
use std::sync::OnceLock;

use hoard_types::BlobRef;
use rand::Rng;
use serde_json::{Map, Value, json};

use crate::superset::{BytesPart, mixed_array_from_bytes};
use crate::{SchemaError, rfc3339_from_nanos};

/// The share auth type granting access by knowledge of the ref.
pub const SHARE_HAVE_REF: &str = "haveref";

fn new_map(kind: &str) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("camliVersion".into(), json!(1));
    m.insert("camliType".into(), json!(kind));
    m
}

/// An ordered, immutable collection of refs, later referenced by a
/// `directory` blob. Members keep insertion order.
#[derive(Debug, Default)]
pub struct StaticSet {
    refs: Vec<BlobRef>,
}

impl StaticSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, br: BlobRef) {
        self.refs.push(br);
    }

    /// Emit the `static-set` schema map.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut m = new_map("static-set");
        let members: Vec<String> = self.refs.iter().map(|r| r.to_string()).collect();
        m.insert("members".into(), json!(members));
        m
    }
}

/// A new unsigned permanode map: 20 random printable ASCII bytes.
///
/// The randomness only has to make the ref unique; the blob is signed
/// before upload, which is what makes it trustworthy.
pub fn new_unsigned_permanode() -> Map<String, Value> {
    let mut m = new_map("permanode");
    let mut rng = rand::rng();
    let chars: String = (0..20)
        .map(|_| rng.random_range(0x20u8..=0x7e) as char)
        .collect();
    m.insert("random".into(), json!(chars));
    m
}

/// A `file` map carrying the base name of `path`.
pub fn new_file_map(path: &Path) -> Map<String, Value> {
    let mut m = new_common_filename_map(path);
    m.insert("camliType".into(), json!("file"));
    m
}

fn new_common_filename_map(path: &Path) -> Map<String, Value> {
    let mut m = new_map("");
    if let Some(base) = path.file_name() {
        let raw = base.as_encoded_bytes();
        match std::str::from_utf8(raw) {
            Ok(name) => {
                m.insert("fileName".into(), json!(name));
            }
            Err(_) => {
                m.insert("fileNameBytes".into(), Value::Array(mixed_array_from_bytes(raw)));
            }
        }
    }
    m
}

/// A common map for any directory entry, capturing the file name and unix
/// metadata from `meta`. The caller fills in `camliType`.
pub fn new_common_file_map(path: &Path, meta: &std::fs::Metadata) -> Map<String, Value> {
    let mut m = new_common_filename_map(path);

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        if !meta.file_type().is_symlink() {
            m.insert(
                "unixPermission".into(),
                json!(format!("0{:o}", meta.mode() & 0o7777)),
            );
        }
        m.insert("unixOwnerId".into(), json!(meta.uid()));
        if let Some(user) = lookup_user(meta.uid()) {
            m.insert("unixOwner".into(), json!(user));
        }
        m.insert("unixGroupId".into(), json!(meta.gid()));
        if let Some(group) = lookup_group(meta.gid()) {
            m.insert("unixGroup".into(), json!(group));
        }

        let mtime = meta.mtime() * 1_000_000_000 + meta.mtime_nsec();
        if mtime != 0 {
            m.insert("unixMtime".into(), json!(rfc3339_from_nanos(mtime)));
        }
        // Include ctime only when it differs.
        let ctime = meta.ctime() * 1_000_000_000 + meta.ctime_nsec();
        if ctime != 0 && ctime != mtime {
            m.insert("unixCtime".into(), json!(rfc3339_from_nanos(ctime)));
        }
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
    }

    m
}

/// Fill in the `parts` list, validating the size invariant and part
/// exclusivity.
pub fn populate_parts(
    m: &mut Map<String, Value>,
    size: u64,
    parts: &[BytesPart],
) -> Result<(), SchemaError> {
    let mut sum = 0u64;
    for part in parts {
        part.referent()?;
        sum += part.size;
    }
    if sum != size {
        return Err(SchemaError::SizeMismatch {
            declared: size,
            sum,
        });
    }
    m.insert("parts".into(), serde_json::to_value(parts)?);
    Ok(())
}

/// Turn `m` into a `symlink` map pointing at `target`.
pub fn populate_symlink_map(m: &mut Map<String, Value>, target: &[u8]) {
    m.insert("camliType".into(), json!("symlink"));
    match std::str::from_utf8(target) {
        Ok(t) => {
            m.insert("symlinkTarget".into(), json!(t));
        }
        Err(_) => {
            m.insert(
                "symlinkTargetBytes".into(),
                Value::Array(mixed_array_from_bytes(target)),
            );
        }
    }
}

/// Turn `m` into a `directory` map referencing its `static-set`.
pub fn populate_directory_map(m: &mut Map<String, Value>, static_set_ref: &BlobRef) {
    m.insert("camliType".into(), json!("directory"));
    m.insert("entries".into(), json!(static_set_ref.to_string()));
}

/// An empty `bytes` map; the caller populates `parts`.
pub fn new_bytes_map() -> Map<String, Value> {
    new_map("bytes")
}

/// A `share` map granting access to `target`.
pub fn new_share_map(auth_type: &str, target: &BlobRef, transitive: bool) -> Map<String, Value> {
    let mut m = new_map("share");
    m.insert("authType".into(), json!(auth_type));
    m.insert("target".into(), json!(target.to_string()));
    m.insert("transitive".into(), json!(transitive));
    m
}

/// A bare `claim` map on `permanode`, timestamped now.
pub fn new_claim(permanode: &BlobRef, claim_type: &str) -> Map<String, Value> {
    let mut m = new_map("claim");
    m.insert("permaNode".into(), json!(permanode.to_string()));
    m.insert("claimType".into(), json!(claim_type));
    m.insert("claimDate".into(), json!(rfc3339_from_nanos(crate::now_nanos())));
    m
}

fn new_attr_change_claim(
    permanode: &BlobRef,
    claim_type: &str,
    attribute: &str,
    value: &str,
) -> Map<String, Value> {
    let mut m = new_claim(permanode, claim_type);
    m.insert("attribute".into(), json!(attribute));
    m.insert("value".into(), json!(value));
    m
}

pub fn new_set_attribute_claim(
    permanode: &BlobRef,
    attribute: &str,
    value: &str,
) -> Map<String, Value> {
    new_attr_change_claim(permanode, "set-attribute", attribute, value)
}

pub fn new_add_attribute_claim(
    permanode: &BlobRef,
    attribute: &str,
    value: &str,
) -> Map<String, Value> {
    new_attr_change_claim(permanode, "add-attribute", attribute, value)
}

pub fn new_del_attribute_claim(permanode: &BlobRef, attribute: &str) -> Map<String, Value> {
    let mut m = new_attr_change_claim(permanode, "del-attribute", attribute, "");
    m.remove("value");
    m
}

#[cfg(unix)]
fn lookup_user(uid: u32) -> Option<String> {
    static MAP: OnceLock<std::collections::HashMap<u32, String>> = OnceLock::new();
    MAP.get_or_init(|| parse_id_table("/etc/passwd")).get(&uid).cloned()
}

#[cfg(unix)]
fn lookup_group(gid: u32) -> Option<String> {
    static MAP: OnceLock<std::collections::HashMap<u32, String>> = OnceLock::new();
    MAP.get_or_init(|| parse_id_table("/etc/group")).get(&gid).cloned()
}

/// Parse `name:x:id:` tables (passwd, group) into id → name.
#[cfg(unix)]
fn parse_id_table(path: &str) -> std::collections::HashMap<u32, String> {
    let mut map = std::collections::HashMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return map;
    };
    for line in content.lines() {
        let mut fields = line.splitn(4, ':');
        let name = fields.next();
        let _pass = fields.next();
        let id = fields.next().and_then(|s| s.parse::<u32>().ok());
        if let (Some(name), Some(id)) = (name, id) {
            map.entry(id).or_insert_with(|| name.to_owned());
        }
    }
    map
}
