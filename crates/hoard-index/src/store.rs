//! [`IndexStore`] — secondary indexes on Fjall keyspaces.
//!
//! Every write is insert-ignore: the first row for a key wins, and
//! re-receiving a blob changes nothing. Range scans drive the claim
//! replay that produces the current-value attribute view.

use std::path::Path;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use hoard_schema::nanos_from_rfc3339;
use hoard_types::BlobRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::IndexError;

/// Row for every received blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRow {
    pub size: u64,
    pub mime: Option<String>,
}

/// Row per claim blob, stored whether or not verification succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRow {
    pub signer: Option<String>,
    /// Empty when the signature did not verify.
    pub verified_key_id: String,
    pub claim_type: String,
    pub claim_date: String,
    pub permanode: String,
    pub attribute: Option<String>,
    pub value: Option<String>,
}

/// Row in the per-(permanode, attribute) value index. Verified claims only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrRow {
    pub key_id: String,
    pub claim_type: String,
    pub claim_date: String,
    pub claim_ref: String,
    pub value: Option<String>,
}

/// Row per `camliPath:<suffix>` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRow {
    pub claim_ref: String,
    pub claim_date: String,
    pub key_id: String,
    pub base_ref: String,
    pub suffix: String,
    pub target_ref: Option<String>,
    /// `del-attribute` claims write inactive rows.
    pub active: bool,
}

/// Row per permanode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermanodeRow {
    pub signer: Option<String>,
    pub unverified: bool,
    /// Greatest claimDate seen for this permanode.
    pub lastmod: String,
}

/// Row per indexed `file` schema blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRow {
    /// Ref of the whole reassembled content.
    pub whole_ref: String,
    pub size: u64,
    pub file_name: Option<String>,
    pub mime: Option<String>,
}

/// The secondary-index store.
pub struct IndexStore {
    #[allow(dead_code)]
    db: Database,
    blobs: Keyspace,
    claims: Keyspace,
    signerkeyid: Keyspace,
    signerattrvalue: Keyspace,
    signerattrvalueft: Keyspace,
    paths: Keyspace,
    permanodes: Keyspace,
    files: Keyspace,
}

impl IndexStore {
    /// Open a persistent index at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let db = Database::builder(path).open()?;
        Self::init(db)
    }

    /// Open a temporary index (cleaned up on drop). For tests and servers
    /// that don't persist their index.
    pub fn open_temporary() -> Result<Self, IndexError> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, IndexError> {
        let blobs = db.keyspace("blobs", KeyspaceCreateOptions::default)?;
        let claims = db.keyspace("claims", KeyspaceCreateOptions::default)?;
        let signerkeyid = db.keyspace("signerkeyid", KeyspaceCreateOptions::default)?;
        let signerattrvalue = db.keyspace("signerattrvalue", KeyspaceCreateOptions::default)?;
        let signerattrvalueft =
            db.keyspace("signerattrvalueft", KeyspaceCreateOptions::default)?;
        let paths = db.keyspace("paths", KeyspaceCreateOptions::default)?;
        let permanodes = db.keyspace("permanodes", KeyspaceCreateOptions::default)?;
        let files = db.keyspace("files", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            blobs,
            claims,
            signerkeyid,
            signerattrvalue,
            signerattrvalueft,
            paths,
            permanodes,
            files,
        })
    }

    fn insert_ignore(ks: &Keyspace, key: &[u8], value: &[u8]) -> Result<bool, IndexError> {
        if ks.get(key)?.is_some() {
            return Ok(false);
        }
        ks.insert(key, value)?;
        Ok(true)
    }

    // -- blobs ----------------------------------------------------------

    pub fn insert_blob_row(&self, br: &BlobRef, row: &BlobRow) -> Result<(), IndexError> {
        let value = postcard::to_allocvec(row)?;
        Self::insert_ignore(&self.blobs, br.to_string().as_bytes(), &value)?;
        Ok(())
    }

    pub fn get_blob_row(&self, br: &BlobRef) -> Result<Option<BlobRow>, IndexError> {
        match self.blobs.get(br.to_string().as_bytes())? {
            Some(raw) => Ok(Some(postcard::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    // -- claims ---------------------------------------------------------

    pub fn insert_claim_row(&self, claim_ref: &BlobRef, row: &ClaimRow) -> Result<(), IndexError> {
        let value = postcard::to_allocvec(row)?;
        if Self::insert_ignore(&self.claims, claim_ref.to_string().as_bytes(), &value)? {
            debug!(claim = %claim_ref, permanode = %row.permanode, "indexed claim");
        }
        Ok(())
    }

    pub fn get_claim_row(&self, claim_ref: &BlobRef) -> Result<Option<ClaimRow>, IndexError> {
        match self.claims.get(claim_ref.to_string().as_bytes())? {
            Some(raw) => Ok(Some(postcard::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    // -- signer key ids -------------------------------------------------

    pub fn insert_signer_key_id(&self, signer: &BlobRef, key_id: &str) -> Result<(), IndexError> {
        Self::insert_ignore(
            &self.signerkeyid,
            signer.to_string().as_bytes(),
            key_id.as_bytes(),
        )?;
        Ok(())
    }

    pub fn get_signer_key_id(&self, signer: &BlobRef) -> Result<Option<String>, IndexError> {
        match self.signerkeyid.get(signer.to_string().as_bytes())? {
            Some(raw) => Ok(Some(String::from_utf8_lossy(&raw).into_owned())),
            None => Ok(None),
        }
    }

    // -- attribute values ----------------------------------------------

    /// Scan key: `permanode \0 attribute \0 date_nanos_be claim_ref`, so a
    /// prefix scan yields claimDate order with ref tiebreak.
    fn attr_key(permanode: &str, attribute: &str, date_nanos: i64, claim_ref: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(permanode.len() + attribute.len() + claim_ref.len() + 10);
        key.extend_from_slice(permanode.as_bytes());
        key.push(0);
        key.extend_from_slice(attribute.as_bytes());
        key.push(0);
        key.extend_from_slice(&(date_nanos as u64).to_be_bytes());
        key.extend_from_slice(claim_ref.as_bytes());
        key
    }

    fn attr_prefix(permanode: &str, attribute: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(permanode.len() + attribute.len() + 2);
        key.extend_from_slice(permanode.as_bytes());
        key.push(0);
        key.extend_from_slice(attribute.as_bytes());
        key.push(0);
        key
    }

    pub fn insert_attr_row(
        &self,
        permanode: &str,
        attribute: &str,
        date_nanos: i64,
        row: &AttrRow,
        fulltext_twin: bool,
    ) -> Result<(), IndexError> {
        let key = Self::attr_key(permanode, attribute, date_nanos, &row.claim_ref);
        let value = postcard::to_allocvec(row)?;
        Self::insert_ignore(&self.signerattrvalue, &key, &value)?;
        if fulltext_twin {
            Self::insert_ignore(&self.signerattrvalueft, &key, &value)?;
        }
        Ok(())
    }

    /// All value rows for `(permanode, attribute)` in claimDate order.
    pub fn attr_rows(&self, permanode: &str, attribute: &str) -> Result<Vec<AttrRow>, IndexError> {
        let mut rows = Vec::new();
        for guard in self
            .signerattrvalue
            .prefix(Self::attr_prefix(permanode, attribute))
        {
            let value = guard.value()?;
            rows.push(postcard::from_bytes(&value)?);
        }
        Ok(rows)
    }

    /// Current values for `(permanode, attribute)`: replay the verified
    /// claims in claimDate order.
    ///
    /// `set-attribute` replaces the value set, `add-attribute` appends,
    /// `del-attribute` removes the named value or clears when no value is
    /// given.
    pub fn current_attr_values(
        &self,
        permanode: &str,
        attribute: &str,
    ) -> Result<Vec<String>, IndexError> {
        let mut values: Vec<String> = Vec::new();
        for row in self.attr_rows(permanode, attribute)? {
            match row.claim_type.as_str() {
                "set-attribute" => {
                    values.clear();
                    if let Some(v) = row.value {
                        values.push(v);
                    }
                }
                "add-attribute" => {
                    if let Some(v) = row.value
                        && !values.contains(&v)
                    {
                        values.push(v);
                    }
                }
                "del-attribute" => match row.value {
                    Some(v) => values.retain(|existing| *existing != v),
                    None => values.clear(),
                },
                _ => {}
            }
        }
        Ok(values)
    }

    // -- paths ----------------------------------------------------------

    pub fn insert_path_row(&self, date_nanos: i64, row: &PathRow) -> Result<(), IndexError> {
        let mut key = Vec::new();
        key.extend_from_slice(row.key_id.as_bytes());
        key.push(0);
        key.extend_from_slice(row.base_ref.as_bytes());
        key.push(0);
        key.extend_from_slice(row.suffix.as_bytes());
        key.push(0);
        key.extend_from_slice(&(date_nanos as u64).to_be_bytes());
        key.extend_from_slice(row.claim_ref.as_bytes());
        let value = postcard::to_allocvec(row)?;
        Self::insert_ignore(&self.paths, &key, &value)?;
        Ok(())
    }

    /// All path rows under `(key_id, base_ref)` in claimDate order.
    pub fn path_rows(&self, key_id: &str, base_ref: &str) -> Result<Vec<PathRow>, IndexError> {
        let mut prefix = Vec::new();
        prefix.extend_from_slice(key_id.as_bytes());
        prefix.push(0);
        prefix.extend_from_slice(base_ref.as_bytes());
        prefix.push(0);

        let mut rows = Vec::new();
        for guard in self.paths.prefix(prefix) {
            let value = guard.value()?;
            rows.push(postcard::from_bytes(&value)?);
        }
        Ok(rows)
    }

    // -- permanodes -----------------------------------------------------

    /// Upsert the permanode row: signer and unverified flag always take
    /// the latest write; `lastmod` only moves forward.
    pub fn upsert_permanode(
        &self,
        br: &str,
        signer: Option<&str>,
        unverified: bool,
    ) -> Result<(), IndexError> {
        let row = PermanodeRow {
            signer: signer.map(str::to_owned),
            unverified,
            lastmod: self
                .get_permanode_raw(br)?
                .map(|r| r.lastmod)
                .unwrap_or_default(),
        };
        self.permanodes
            .insert(br.as_bytes(), postcard::to_allocvec(&row)?.as_slice())?;
        Ok(())
    }

    /// Bump `lastmod` when `claim_date` is chronologically later than the
    /// stored value.
    ///
    /// Compared as nanoseconds, not as strings: trimmed fractions don't
    /// byte-sort chronologically (`…01.5Z` < `…01Z`).
    pub fn touch_permanode(&self, br: &str, claim_date: &str) -> Result<(), IndexError> {
        let mut row = self.get_permanode_raw(br)?.unwrap_or(PermanodeRow {
            signer: None,
            unverified: true,
            lastmod: String::new(),
        });
        if let Ok(new_nanos) = nanos_from_rfc3339(claim_date) {
            let old_nanos = nanos_from_rfc3339(&row.lastmod).ok();
            if old_nanos.is_none_or(|old| new_nanos > old) {
                row.lastmod = claim_date.to_owned();
            }
        }
        self.permanodes
            .insert(br.as_bytes(), postcard::to_allocvec(&row)?.as_slice())?;
        Ok(())
    }

    fn get_permanode_raw(&self, br: &str) -> Result<Option<PermanodeRow>, IndexError> {
        match self.permanodes.get(br.as_bytes())? {
            Some(raw) => Ok(Some(postcard::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn get_permanode(&self, br: &BlobRef) -> Result<Option<PermanodeRow>, IndexError> {
        self.get_permanode_raw(&br.to_string())
    }

    // -- files ----------------------------------------------------------

    pub fn insert_file_row(&self, schema_ref: &BlobRef, row: &FileRow) -> Result<(), IndexError> {
        let value = postcard::to_allocvec(row)?;
        Self::insert_ignore(&self.files, schema_ref.to_string().as_bytes(), &value)?;
        Ok(())
    }

    pub fn get_file_row(&self, schema_ref: &BlobRef) -> Result<Option<FileRow>, IndexError> {
        match self.files.get(schema_ref.to_string().as_bytes())? {
            Some(raw) => Ok(Some(postcard::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_types::HashAlgo;

    fn store() -> IndexStore {
        IndexStore::open_temporary().unwrap()
    }

    fn attr_row(claim_type: &str, value: Option<&str>, claim_ref: &str) -> AttrRow {
        AttrRow {
            key_id: "k".into(),
            claim_type: claim_type.into(),
            claim_date: "2011-01-01T00:00:00Z".into(),
            claim_ref: claim_ref.into(),
            value: value.map(str::to_owned),
        }
    }

    #[test]
    fn test_blob_row_insert_ignore() {
        let s = store();
        let br = BlobRef::from_data(HashAlgo::Sha1, b"x");
        s.insert_blob_row(
            &br,
            &BlobRow {
                size: 1,
                mime: Some("text/plain".into()),
            },
        )
        .unwrap();
        // Second insert with different data is ignored.
        s.insert_blob_row(&br, &BlobRow { size: 99, mime: None }).unwrap();
        assert_eq!(s.get_blob_row(&br).unwrap().unwrap().size, 1);
    }

    #[test]
    fn test_attr_replay_set_then_del() {
        let s = store();
        let pn = "sha1-0000000000000000000000000000000000000001";
        s.insert_attr_row(pn, "tag", 100, &attr_row("set-attribute", Some("foo"), "c1"), true)
            .unwrap();
        s.insert_attr_row(pn, "tag", 200, &attr_row("del-attribute", None, "c2"), true)
            .unwrap();

        assert!(s.current_attr_values(pn, "tag").unwrap().is_empty());
        // Both rows remain in the table.
        assert_eq!(s.attr_rows(pn, "tag").unwrap().len(), 2);
    }

    #[test]
    fn test_attr_replay_add_and_targeted_del() {
        let s = store();
        let pn = "sha1-0000000000000000000000000000000000000002";
        s.insert_attr_row(pn, "tag", 100, &attr_row("add-attribute", Some("a"), "c1"), true)
            .unwrap();
        s.insert_attr_row(pn, "tag", 200, &attr_row("add-attribute", Some("b"), "c2"), true)
            .unwrap();
        s.insert_attr_row(pn, "tag", 300, &attr_row("del-attribute", Some("a"), "c3"), true)
            .unwrap();

        assert_eq!(s.current_attr_values(pn, "tag").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_attr_replay_respects_date_order_not_insert_order() {
        let s = store();
        let pn = "sha1-0000000000000000000000000000000000000003";
        // Inserted out of order; the later set must win.
        s.insert_attr_row(pn, "title", 500, &attr_row("set-attribute", Some("new"), "c2"), true)
            .unwrap();
        s.insert_attr_row(pn, "title", 100, &attr_row("set-attribute", Some("old"), "c1"), true)
            .unwrap();

        assert_eq!(s.current_attr_values(pn, "title").unwrap(), vec!["new"]);
    }

    #[test]
    fn test_attr_rows_isolated_by_permanode_and_attr() {
        let s = store();
        let pn_a = "sha1-000000000000000000000000000000000000000a";
        let pn_b = "sha1-000000000000000000000000000000000000000b";
        s.insert_attr_row(pn_a, "tag", 1, &attr_row("set-attribute", Some("x"), "c1"), false)
            .unwrap();
        s.insert_attr_row(pn_b, "tag", 1, &attr_row("set-attribute", Some("y"), "c2"), false)
            .unwrap();
        s.insert_attr_row(pn_a, "title", 1, &attr_row("set-attribute", Some("z"), "c3"), false)
            .unwrap();

        assert_eq!(s.current_attr_values(pn_a, "tag").unwrap(), vec!["x"]);
        assert_eq!(s.current_attr_values(pn_b, "tag").unwrap(), vec!["y"]);
        assert_eq!(s.current_attr_values(pn_a, "title").unwrap(), vec!["z"]);
    }

    #[test]
    fn test_permanode_lastmod_moves_forward_only() {
        let s = store();
        let pn = "sha1-0000000000000000000000000000000000000004";
        s.upsert_permanode(pn, Some("sha1-aaa"), true).unwrap();
        s.touch_permanode(pn, "2011-06-01T00:00:00Z").unwrap();
        s.touch_permanode(pn, "2011-01-01T00:00:00Z").unwrap();

        let row = s
            .get_permanode(&BlobRef::parse(pn).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(row.lastmod, "2011-06-01T00:00:00Z");
    }

    #[test]
    fn test_permanode_lastmod_compares_nanos_not_strings() {
        let s = store();
        let pn = "sha1-0000000000000000000000000000000000000005";
        // A sub-second-later claim string-sorts BEFORE the whole second
        // ('.' < any digit or 'Z'); the comparison must be chronological.
        s.touch_permanode(pn, "2011-06-01T00:00:01Z").unwrap();
        s.touch_permanode(pn, "2011-06-01T00:00:01.5Z").unwrap();

        let row = s
            .get_permanode(&BlobRef::parse(pn).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(row.lastmod, "2011-06-01T00:00:01.5Z");

        // And the earlier fractional must not displace a later whole second.
        s.touch_permanode(pn, "2011-06-01T00:00:02Z").unwrap();
        s.touch_permanode(pn, "2011-06-01T00:00:01.9Z").unwrap();
        let row = s
            .get_permanode(&BlobRef::parse(pn).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(row.lastmod, "2011-06-01T00:00:02Z");
    }

    #[test]
    fn test_upsert_permanode_overwrites_signer() {
        let s = store();
        let pn = "sha1-0000000000000000000000000000000000000006";
        s.touch_permanode(pn, "2011-06-01T00:00:00Z").unwrap();
        s.upsert_permanode(pn, Some("sha1-bbb"), true).unwrap();
        // A later permanode receive with no signer clears the field; only
        // lastmod survives the upsert.
        s.upsert_permanode(pn, None, true).unwrap();

        let row = s
            .get_permanode(&BlobRef::parse(pn).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(row.signer, None);
        assert_eq!(row.lastmod, "2011-06-01T00:00:00Z");
    }

    #[test]
    fn test_path_rows_in_date_order() {
        let s = store();
        let mk = |claim_ref: &str, active: bool| PathRow {
            claim_ref: claim_ref.into(),
            claim_date: "d".into(),
            key_id: "key".into(),
            base_ref: "sha1-base".into(),
            suffix: "sub/dir".into(),
            target_ref: Some("sha1-target".into()),
            active,
        };
        s.insert_path_row(200, &mk("c2", false)).unwrap();
        s.insert_path_row(100, &mk("c1", true)).unwrap();

        let rows = s.path_rows("key", "sha1-base").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].claim_ref, "c1");
        assert!(rows[0].active);
        assert!(!rows[1].active);
    }

    #[test]
    fn test_file_row_roundtrip() {
        let s = store();
        let br = BlobRef::from_data(HashAlgo::Sha1, b"schema");
        let row = FileRow {
            whole_ref: "sha1-whole".into(),
            size: 42,
            file_name: Some("photo.jpg".into()),
            mime: Some("image/jpeg".into()),
        };
        s.insert_file_row(&br, &row).unwrap();
        assert_eq!(s.get_file_row(&br).unwrap(), Some(row));
    }
}
