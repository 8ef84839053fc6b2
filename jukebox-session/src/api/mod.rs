//! HTTP API
//!
//! Refresh, playback control, suggestion queries, session status and the
//! SSE event stream.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run, AppContext};
