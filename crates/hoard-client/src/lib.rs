//! Client side of the hoard blob protocol.
//!
//! - [`UploadClient`] — HTTP client for a remote blob server: stat, upload,
//!   streaming fetch, enumerate, remove. Implements the storage capability
//!   traits, so the file writer and coordinator treat a remote server like
//!   any other [`BlobSink`](hoard_store::BlobSink).
//! - [`StatCache`] / [`HaveCache`] — the two local caches that let repeat
//!   ingests skip work entirely.
//! - [`Uploader`] — the ingestion coordinator: walks a file tree, applies
//!   the caches, bounds concurrency, and produces exactly one top-level
//!   ref for the whole tree.

mod cache;
mod client;
mod error;
mod uploader;

pub use cache::{FileFingerprint, FjallCache, HaveCache, MemCache, StatCache};
pub use client::{EnumerateResponse, PutResult, StatResponse, UploadClient, UploadHandle};
pub use error::ClientError;
pub use uploader::{Uploader, UploaderConfig};
