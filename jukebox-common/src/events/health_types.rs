//! Health status type definitions
//!
//! The composite `HealthStatus` is the unit observed by clients; each
//! sub-field is recomputed independently on every monitor tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device health
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceHealth {
    Healthy,
    Unresponsive,
    Disconnected,
}

/// Playback health
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackHealth {
    Playing,
    Paused,
    Stopped,
    Error,
}

/// Credential health
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenHealth {
    Valid,
    Expired,
    Error,
}

/// Connection quality derived from consecutive network failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Good,
    Unstable,
    Poor,
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionQuality::Good => write!(f, "good"),
            ConnectionQuality::Unstable => write!(f, "unstable"),
            ConnectionQuality::Poor => write!(f, "poor"),
        }
    }
}

/// Composite health view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub device: DeviceHealth,
    pub playback: PlaybackHealth,
    pub token: TokenHealth,
    pub connection: ConnectionQuality,
    /// When this record was computed
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    /// Status before the first monitor tick
    pub fn initial() -> Self {
        Self {
            device: DeviceHealth::Disconnected,
            playback: PlaybackHealth::Stopped,
            token: TokenHealth::Expired,
            connection: ConnectionQuality::Good,
            checked_at: Utc::now(),
        }
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::initial()
    }
}
