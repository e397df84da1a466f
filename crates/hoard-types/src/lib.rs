//! Blob identity types for hoard.
//!
//! This crate defines the content-addressed identifier used everywhere in
//! the workspace: [`BlobRef`] (an algorithm name plus a lowercase hex
//! digest), [`SizedBlobRef`] (a ref with its exact byte length), and
//! [`Digester`] for computing refs incrementally over streamed data.

mod blobref;

pub use blobref::{BlobRef, Digester, HashAlgo, RefError, SizedBlobRef};
