//! Playback SDK seam
//!
//! The device session owns exactly one [`PlaybackSdk`] at a time and is the
//! only consumer of its event stream. Raw SDK events never reach clients;
//! the session translates them into lifecycle transitions.

use crate::clients::PlayerState;
use crate::error::SdkError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Raw events emitted by the playback SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    Ready { device_id: String },
    NotReady { device_id: String },
    /// `None` means the device is no longer the active player
    StateChanged(Option<PlayerState>),
    InitializationError(String),
    AuthenticationError(String),
    AccountError(String),
    PlaybackError(String),
}

/// A live SDK instance
#[async_trait]
pub trait PlaybackSdk: Send + Sync {
    /// Connect with the given credential; `Ok(false)` is a transport failure
    async fn connect(&self, token: &str) -> Result<bool, SdkError>;

    /// Take the event stream; only the first call returns `Some`
    fn take_events(&self) -> Option<mpsc::Receiver<SdkEvent>>;

    /// Disconnect and stop emitting events; safe to call twice
    async fn disconnect(&self);
}

/// Creates SDK instances
#[async_trait]
pub trait SdkLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn PlaybackSdk>, SdkError>;
}
