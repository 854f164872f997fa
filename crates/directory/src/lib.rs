//! Central directory for p2pshare.
//!
//! [`DirectoryIndex`] is the system of record for registered peers and the
//! files they share. [`DirectoryService`] wraps it with an ordered mutation
//! queue and a periodic liveness sweep; the HTTP surface lives in
//! `p2pshare-rpc`.

pub mod config;
pub mod error;
pub mod index;
pub mod service;

pub use config::{DirectoryConfig, MIN_MISSED_INTERVALS};
pub use error::DirectoryError;
pub use index::DirectoryIndex;
pub use service::{validate_registration, DirectoryService};
