//! The two local caches that make repeat ingests cheap.
//!
//! - **Stat cache**: `(working dir, path, file fingerprint)` → the
//!   `PutResult` of the top-level `file` blob previously produced for that
//!   file. A hit skips all chunking and network I/O. Regular files only.
//! - **Have cache**: refs known to exist on the server, noted as uploads
//!   complete.
//!
//! Both are process-wide with internal mutual exclusion; writers are
//! idempotent, and cache write failures are logged rather than surfaced
//! (the upload is still correct without them).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use hoard_types::BlobRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::PutResult;
use crate::error::ClientError;

/// Identity of a regular file for change detection.
///
/// `ctime`/`inode` are zero on platforms that lack them; `size` + `mtime`
/// still catch ordinary rewrites, and on unix the extra fields catch
/// metadata-only changes and replace-by-rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub size: u64,
    pub mtime_nanos: i64,
    pub ctime_nanos: i64,
    pub inode: u64,
}

impl FileFingerprint {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                size: meta.len(),
                mtime_nanos: meta.mtime() * 1_000_000_000 + meta.mtime_nsec(),
                ctime_nanos: meta.ctime() * 1_000_000_000 + meta.ctime_nsec(),
                inode: meta.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            let mtime_nanos = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i64)
                .unwrap_or_default();
            Self {
                size: meta.len(),
                mtime_nanos,
                ctime_nanos: 0,
                inode: 0,
            }
        }
    }
}

#[derive(Serialize)]
struct StatKey<'a> {
    pwd: &'a str,
    path: &'a str,
    fingerprint: &'a FileFingerprint,
}

fn stat_key(pwd: &Path, path: &Path, fingerprint: &FileFingerprint) -> Vec<u8> {
    postcard::to_allocvec(&StatKey {
        pwd: &pwd.to_string_lossy(),
        path: &path.to_string_lossy(),
        fingerprint,
    })
    .expect("stat key serializes")
}

/// Memoizes the top-level `file` blob for unchanged regular files.
pub trait StatCache: Send + Sync {
    fn cached_put_result(
        &self,
        pwd: &Path,
        path: &Path,
        fingerprint: &FileFingerprint,
    ) -> Option<PutResult>;

    fn add_cached_put_result(
        &self,
        pwd: &Path,
        path: &Path,
        fingerprint: &FileFingerprint,
        result: &PutResult,
    );
}

/// Tracks refs known to exist on the server.
pub trait HaveCache: Send + Sync {
    fn blob_exists(&self, br: &BlobRef) -> bool;
    fn note_blob_exists(&self, br: &BlobRef);
}

/// In-memory stat + have cache, for tests and cache-less runs.
#[derive(Default)]
pub struct MemCache {
    stats: Mutex<HashMap<Vec<u8>, PutResult>>,
    have: Mutex<HashSet<String>>,
}

impl MemCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatCache for MemCache {
    fn cached_put_result(
        &self,
        pwd: &Path,
        path: &Path,
        fingerprint: &FileFingerprint,
    ) -> Option<PutResult> {
        self.stats
            .lock()
            .expect("stat cache poisoned")
            .get(&stat_key(pwd, path, fingerprint))
            .cloned()
    }

    fn add_cached_put_result(
        &self,
        pwd: &Path,
        path: &Path,
        fingerprint: &FileFingerprint,
        result: &PutResult,
    ) {
        self.stats
            .lock()
            .expect("stat cache poisoned")
            .insert(stat_key(pwd, path, fingerprint), result.clone());
    }
}

impl HaveCache for MemCache {
    fn blob_exists(&self, br: &BlobRef) -> bool {
        self.have
            .lock()
            .expect("have cache poisoned")
            .contains(&br.to_string())
    }

    fn note_blob_exists(&self, br: &BlobRef) {
        self.have
            .lock()
            .expect("have cache poisoned")
            .insert(br.to_string());
    }
}

/// Disk-backed stat + have cache on a Fjall database.
pub struct FjallCache {
    #[allow(dead_code)]
    db: Database,
    statcache: Keyspace,
    havecache: Keyspace,
}

impl FjallCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let db = Database::builder(path)
            .open()
            .map_err(|e| ClientError::Cache(e.to_string()))?;
        let statcache = db
            .keyspace("statcache", KeyspaceCreateOptions::default)
            .map_err(|e| ClientError::Cache(e.to_string()))?;
        let havecache = db
            .keyspace("havecache", KeyspaceCreateOptions::default)
            .map_err(|e| ClientError::Cache(e.to_string()))?;
        Ok(Self {
            db,
            statcache,
            havecache,
        })
    }
}

impl StatCache for FjallCache {
    fn cached_put_result(
        &self,
        pwd: &Path,
        path: &Path,
        fingerprint: &FileFingerprint,
    ) -> Option<PutResult> {
        match self.statcache.get(stat_key(pwd, path, fingerprint)) {
            Ok(Some(raw)) => match postcard::from_bytes(&raw) {
                Ok(pr) => {
                    debug!(path = %path.display(), "stat cache hit");
                    Some(pr)
                }
                Err(e) => {
                    warn!(error = %e, "stat cache entry corrupt, ignoring");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "stat cache read failed");
                None
            }
        }
    }

    fn add_cached_put_result(
        &self,
        pwd: &Path,
        path: &Path,
        fingerprint: &FileFingerprint,
        result: &PutResult,
    ) {
        let value = postcard::to_allocvec(result).expect("put result serializes");
        if let Err(e) = self
            .statcache
            .insert(stat_key(pwd, path, fingerprint), value.as_slice())
        {
            warn!(error = %e, "stat cache write failed");
        }
    }
}

impl HaveCache for FjallCache {
    fn blob_exists(&self, br: &BlobRef) -> bool {
        match self.havecache.get(br.to_string().as_bytes()) {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                warn!(error = %e, "have cache read failed");
                false
            }
        }
    }

    fn note_blob_exists(&self, br: &BlobRef) {
        if let Err(e) = self.havecache.insert(br.to_string().as_bytes(), []) {
            warn!(error = %e, "have cache write failed");
        }
    }
}
