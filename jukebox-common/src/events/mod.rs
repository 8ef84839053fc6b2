//! Event types for the jukebox event system
//!
//! Provides shared event definitions and the EventBus used by the session
//! engine and its SSE stream.

mod health_types;
mod session_types;
mod suggestion_types;

pub use health_types::{
    ConnectionQuality, DeviceHealth, HealthStatus, PlaybackHealth, TokenHealth,
};
pub use session_types::{LifecycleState, RecoveryCause};
pub use suggestion_types::LastSuggestedTrack;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Jukebox event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JukeboxEvent {
    /// Device session moved between lifecycle states
    DeviceStateChanged {
        old_state: LifecycleState,
        new_state: LifecycleState,
        device_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Post-ready verification or transfer did not confirm the device
    ///
    /// The session still reports ready, flagged degraded.
    DeviceVerificationFailed {
        device_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Recovery engine started an attempt
    RecoveryAttempted {
        attempt: u32,
        max_attempts: u32,
        cause: RecoveryCause,
        timestamp: DateTime<Utc>,
    },

    /// Device confirmed active again
    RecoverySucceeded {
        device_id: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Attempt budget consumed; no more reconnection calls until reset
    RecoveryExhausted {
        attempts: u32,
        cause: RecoveryCause,
        timestamp: DateTime<Utc>,
    },

    /// Connection quality upgraded or downgraded
    ConnectionQualityChanged {
        old_quality: ConnectionQuality,
        new_quality: ConnectionQuality,
        timestamp: DateTime<Utc>,
    },

    /// New credential cached
    TokenRefreshed {
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// Credential refresh failed after all retries
    TokenRefreshFailed {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Health monitor tick
    HealthUpdated {
        status: HealthStatus,
    },

    /// Player state reported by the playback SDK
    PlayerStateChanged {
        is_playing: bool,
        track_uri: Option<String>,
        position_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Playlist refresh finished (successfully or not)
    PlaylistRefreshed {
        success: bool,
        message: String,
        added_track: bool,
        removed_track: bool,
        timestamp: DateTime<Utc>,
    },

    /// Playlist snapshot fingerprint changed since the last refresh
    PlaylistChangedExternally {
        snapshot_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A suggested track was appended to the playlist
    TrackSuggested {
        track: LastSuggestedTrack,
        timestamp: DateTime<Utc>,
    },
}

impl JukeboxEvent {
    /// Event type name, used as the SSE event field
    pub fn event_type(&self) -> &'static str {
        match self {
            JukeboxEvent::DeviceStateChanged { .. } => "DeviceStateChanged",
            JukeboxEvent::DeviceVerificationFailed { .. } => "DeviceVerificationFailed",
            JukeboxEvent::RecoveryAttempted { .. } => "RecoveryAttempted",
            JukeboxEvent::RecoverySucceeded { .. } => "RecoverySucceeded",
            JukeboxEvent::RecoveryExhausted { .. } => "RecoveryExhausted",
            JukeboxEvent::ConnectionQualityChanged { .. } => "ConnectionQualityChanged",
            JukeboxEvent::TokenRefreshed { .. } => "TokenRefreshed",
            JukeboxEvent::TokenRefreshFailed { .. } => "TokenRefreshFailed",
            JukeboxEvent::HealthUpdated { .. } => "HealthUpdated",
            JukeboxEvent::PlayerStateChanged { .. } => "PlayerStateChanged",
            JukeboxEvent::PlaylistRefreshed { .. } => "PlaylistRefreshed",
            JukeboxEvent::PlaylistChangedExternally { .. } => "PlaylistChangedExternally",
            JukeboxEvent::TrackSuggested { .. } => "TrackSuggested",
        }
    }
}

/// Broadcast bus for `JukeboxEvent`
///
/// Cloning the bus shares the underlying channel.
///
/// # Examples
///
/// ```
/// use jukebox_common::events::{EventBus, JukeboxEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(JukeboxEvent::TokenRefreshFailed {
///     reason: "offline".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JukeboxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<JukeboxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: JukeboxEvent,
    ) -> Result<usize, broadcast::error::SendError<JukeboxEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: JukeboxEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
