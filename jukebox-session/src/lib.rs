//! # Jukebox Playback Session & Recovery Engine (jukebox-session)
//!
//! Keeps a jukebox's playback device connected and its playlist stocked.
//!
//! **Components:**
//! - [`token`]: credential cache with single-flight refresh and a proactive timer
//! - [`device`]: device session state machine around the playback SDK
//! - [`recovery`]: bounded reconnection engine and connection-quality tracking
//! - [`health`]: composite health polling with adaptive cadence
//! - [`refresh`]: playlist refresh orchestrator, driven by [`scheduler`]
//! - [`api`]: HTTP/SSE surface

pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod device;
pub mod engine;
pub mod error;
pub mod health;
pub mod playback;
pub mod recovery;
pub mod refresh;
pub mod scheduler;
pub mod token;

pub use engine::{Collaborators, SessionEngine, SessionStatus};
pub use error::{Error, Result};
