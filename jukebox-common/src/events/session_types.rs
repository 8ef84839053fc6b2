//! Device session type definitions
//!
//! Lifecycle states of the playback device session and the causes that can
//! start a recovery cycle.

use serde::{Deserialize, Serialize};

/// Device session lifecycle state
///
/// Canonical edges:
/// `Uninitialized → Initializing → AwaitingSdkReady → Verifying → Ready`,
/// `Ready ⇄ NotReady`, `NotReady → Reconnecting → (Verifying | Error)`,
/// `* → Error`, and `Error → Initializing` (explicit reset only).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No SDK handle exists
    Uninitialized,
    /// Loading the SDK and acquiring a credential
    Initializing,
    /// Connected, waiting for the SDK ready signal
    AwaitingSdkReady,
    /// Ready signal received, checking the device against the remote API
    Verifying,
    /// Device confirmed (possibly degraded) and usable
    Ready,
    /// Device reported not ready past the grace window
    NotReady,
    /// Recovery engine is working on the device
    Reconnecting,
    /// Terminal until explicitly reset
    Error,
}

impl LifecycleState {
    /// Whether `self → next` is an allowed edge of the state machine
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        if next == Error || next == Uninitialized {
            return true;
        }

        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Initializing, AwaitingSdkReady)
                | (AwaitingSdkReady, Verifying)
                | (Verifying, Ready)
                | (Ready, NotReady)
                | (NotReady, Ready)
                | (NotReady, Reconnecting)
                | (Ready, Reconnecting)
                | (Reconnecting, Verifying)
                | (Error, Initializing)
                // credential retry during initialization restarts the SDK
                | (AwaitingSdkReady, Initializing)
                | (Initializing, Initializing)
        )
    }

    /// Whether an SDK handle may be live in this state
    pub fn is_active(self) -> bool {
        !matches!(self, LifecycleState::Uninitialized | LifecycleState::Error)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Initializing => write!(f, "initializing"),
            LifecycleState::AwaitingSdkReady => write!(f, "awaiting_sdk_ready"),
            LifecycleState::Verifying => write!(f, "verifying"),
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::NotReady => write!(f, "not_ready"),
            LifecycleState::Reconnecting => write!(f, "reconnecting"),
            LifecycleState::Error => write!(f, "error"),
        }
    }
}

/// Why a recovery cycle was requested
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryCause {
    /// Device stayed not-ready past the grace window
    NotReady,
    /// Health monitor saw no device or a different active device
    Disconnected,
    /// SDK reported an empty player state
    DeviceInactive,
    /// Post-ready verification or transfer failed
    VerificationFailed,
    /// A play/skip/transfer call failed
    PlaybackControlFailed,
    /// Repeated playback errors from the SDK
    PlaybackErrors,
    /// SDK rejected the credential after ready
    Authentication,
}

impl std::fmt::Display for RecoveryCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryCause::NotReady => write!(f, "not_ready"),
            RecoveryCause::Disconnected => write!(f, "disconnected"),
            RecoveryCause::DeviceInactive => write!(f, "device_inactive"),
            RecoveryCause::VerificationFailed => write!(f, "verification_failed"),
            RecoveryCause::PlaybackControlFailed => write!(f, "playback_control_failed"),
            RecoveryCause::PlaybackErrors => write!(f, "playback_errors"),
            RecoveryCause::Authentication => write!(f, "authentication"),
        }
    }
}
