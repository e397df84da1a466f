//! [`BlobRef`] — canonical identity of an immutable byte string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Errors from parsing or computing blob references.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    /// The hash algorithm name is not supported.
    #[error("unknown hash algorithm: {0:?}")]
    UnknownAlgo(String),

    /// The digest part is not lowercase hex of the expected length.
    #[error("malformed digest: {0:?}")]
    MalformedDigest(String),

    /// The string lacks the `<algo>-<digest>` shape.
    #[error("malformed blobref: {0:?}")]
    MalformedRef(String),

    /// I/O failure while hashing a stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported content-hash algorithms.
///
/// The representation is open-ended; only SHA-1 is defined at version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgo {
    Sha1,
}

impl HashAlgo {
    /// Algorithm name as it appears in the string form.
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
        }
    }

    /// Hex digest length for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgo::Sha1 => 40,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(HashAlgo::Sha1),
            _ => None,
        }
    }
}

/// Content-addressed identity of a blob: `{algo, lowercase-hex-digest}`.
///
/// String form is `"<algo>-<digest>"`. Two refs are equal iff both fields
/// are equal. A `BlobRef` is immutable for its entire lifetime; the
/// receive path enforces that a blob's bytes hash to exactly its ref.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobRef {
    algo: HashAlgo,
    digest: String,
}

impl BlobRef {
    /// Parse the `<algo>-<digest>` string form.
    ///
    /// Rejects unknown algorithms and digests that are not lowercase hex
    /// of the algorithm's length.
    pub fn parse(s: &str) -> Result<Self, RefError> {
        let Some((algo_str, digest)) = s.split_once('-') else {
            return Err(RefError::MalformedRef(s.to_owned()));
        };
        let algo = HashAlgo::from_name(algo_str)
            .ok_or_else(|| RefError::UnknownAlgo(algo_str.to_owned()))?;
        if digest.len() != algo.hex_len()
            || !digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(RefError::MalformedDigest(digest.to_owned()));
        }
        Ok(Self {
            algo,
            digest: digest.to_owned(),
        })
    }

    /// Compute the ref of a byte slice.
    pub fn from_data(algo: HashAlgo, data: &[u8]) -> Self {
        let mut d = Digester::new(algo);
        d.update(data);
        d.finish()
    }

    /// Compute the ref of an async byte stream.
    ///
    /// Streams the reader through the hash state; no buffering beyond a
    /// fixed read buffer.
    pub async fn from_stream(
        algo: HashAlgo,
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<(Self, u64), RefError> {
        let mut digester = Digester::new(algo);
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digester.update(&buf[..n]);
            total += n as u64;
        }
        Ok((digester.finish(), total))
    }

    /// Whether `data` hashes to exactly this ref.
    ///
    /// Used by the receive path to confirm on-the-wire integrity.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::from_data(self.algo, data) == *self
    }

    /// The hash algorithm.
    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    /// The lowercase hex digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Attach a byte length.
    pub fn with_size(self, size: u64) -> SizedBlobRef {
        SizedBlobRef {
            blob_ref: self,
            size,
        }
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algo.name(), self.digest)
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({self})")
    }
}

impl FromStr for BlobRef {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for BlobRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlobRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A [`BlobRef`] plus the exact byte length of the blob it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedBlobRef {
    #[serde(rename = "blobRef")]
    pub blob_ref: BlobRef,
    pub size: u64,
}

/// Incremental hash state producing a [`BlobRef`].
///
/// Used where bytes arrive in pieces: the receive path tees the body
/// into a `Digester` while also filling the sniff buffer.
pub struct Digester {
    algo: HashAlgo,
    inner: Sha1,
}

impl Digester {
    pub fn new(algo: HashAlgo) -> Self {
        Self {
            algo,
            inner: Sha1::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> BlobRef {
        BlobRef {
            algo: self.algo,
            digest: hex::encode(self.inner.finalize()),
        }
    }
}
