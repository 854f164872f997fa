//! HTTP surfaces of p2pshare.
//!
//! - [`directory`]: the directory API (`/register`, `/search`, ...).
//! - [`transfer`]: each peer's `GET /file` endpoint.
//! - [`control`]: a peer's local JSON control API.
//!
//! All routers are plain axum [`Router`](axum::Router)s carrying a
//! `TraceLayer`; [`server::serve`] runs one with connect info and graceful
//! shutdown.

pub mod control;
pub mod directory;
pub mod error;
pub mod server;
pub mod transfer;

pub use control::{control_router, ControlState};
pub use directory::{directory_router, DirectoryState};
pub use error::{ApiError, ErrorResponse};
pub use server::{bind_listener, serve};
pub use transfer::{transfer_router, TRANSFER_CHUNK_SIZE};
