//! Local file handling for p2pshare peers.
//!
//! Provides streamed BLAKE3 content hashing, the catalog scanner that turns a
//! shared directory into the list of [`FileRecord`](p2pshare_types::FileRecord)s
//! a peer registers, and safe resolution of requested names against the
//! shared root.

pub mod catalog;
pub mod hash;
pub mod paths;

pub use catalog::{CatalogScanner, ScanReport, SkippedEntry};
pub use hash::{hash_file, hash_reader, ContentHash, HASH_BUFFER_SIZE};
pub use paths::{resolve_shared_path, PathError};
