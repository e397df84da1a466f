//! Server-side receive and indexing.
//!
//! Incoming blobs are streamed through the expected-hash accumulator and a
//! capped sniff buffer; a hash mismatch rejects the blob with no state
//! written. Schema blobs are classified and fan out into secondary
//! indexes: claims (with signature verification), permanodes, and files.
//!
//! Receiving the same blob twice is a no-op for every index — all writes
//! use insert-ignore semantics.

mod error;
mod magic;
mod receive;
mod store;

pub use error::IndexError;
pub use magic::mime_type;
pub use receive::{Indexer, Sniffer};
pub use store::{
    AttrRow, BlobRow, ClaimRow, FileRow, IndexStore, PathRow, PermanodeRow,
};

/// Attributes that feed the secondary value indexes when the claim is
/// verified.
pub const INDEXED_ATTRIBUTES: &[&str] = &["camliRoot", "tag", "title"];

/// Prefix of path claims (`camliPath:<suffix>`).
pub const PATH_ATTRIBUTE_PREFIX: &str = "camliPath:";
