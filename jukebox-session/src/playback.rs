//! Playback control surface
//!
//! Play and skip requests against the session's device. Control failures
//! are reported to the recovery engine's playback-control channel; the
//! request itself still fails with a control error.

use crate::clients::{PlayRequest, PlayerApi, PlayerState};
use crate::device::DeviceSession;
use crate::error::ApiError;
use crate::recovery::RecoveryHandle;
use jukebox_common::events::RecoveryCause;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const TRANSFER_ATTEMPTS: u32 = 3;
const TRANSFER_RETRY_DELAY: Duration = Duration::from_secs(1);
const TRANSFER_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackAction {
    Play,
    Skip,
}

/// `POST /playback` body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackCommand {
    pub action: PlaybackAction,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub context_uri: Option<String>,
    #[serde(default, alias = "position_ms")]
    pub position_ms: Option<u64>,
}

/// Who holds playback when a play request is refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetails {
    pub current_device: Option<String>,
    pub current_track: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("No active device found. Please wait for the player to initialize.")]
    NoDevice,

    #[error("The player is no longer active. Please refresh and try again.")]
    DeviceNotActive,

    #[error("Music is already playing on another device")]
    Conflict(ConflictDetails),

    #[error("Failed to control playback: {0}")]
    ControlFailed(String),
}

pub struct PlaybackController {
    session: DeviceSession,
    player: Arc<dyn PlayerApi>,
    recovery: RecoveryHandle,
}

impl PlaybackController {
    pub fn new(session: DeviceSession, player: Arc<dyn PlayerApi>, recovery: RecoveryHandle) -> Self {
        Self {
            session,
            player,
            recovery,
        }
    }

    pub async fn execute(&self, command: PlaybackCommand) -> Result<(), PlaybackError> {
        let device_id = command
            .device_id
            .clone()
            .or_else(|| self.session.device_id())
            .ok_or(PlaybackError::NoDevice)?;

        if self.session.ready_device_id().as_deref() != Some(device_id.as_str()) {
            warn!(device_id = %device_id, state = %self.session.lifecycle(), "Playback request for inactive device");
            return Err(PlaybackError::DeviceNotActive);
        }

        let result = match command.action {
            PlaybackAction::Play => self.play(&device_id, &command).await,
            PlaybackAction::Skip => self
                .player
                .next(&device_id)
                .await
                .map_err(|e| PlaybackError::ControlFailed(e.to_string())),
        };

        if let Err(PlaybackError::ControlFailed(reason)) = &result {
            warn!(device_id = %device_id, action = ?command.action, reason = %reason, "Playback control failed");
            self.recovery.signal(RecoveryCause::PlaybackControlFailed);
        }
        result
    }

    async fn play(&self, device_id: &str, command: &PlaybackCommand) -> Result<(), PlaybackError> {
        let current = self.player_state().await?;
        if let Some(state) = current.as_ref().filter(|s| s.is_playing && !s.is_on_device(device_id)) {
            let details = ConflictDetails {
                current_device: state.device.as_ref().map(|d| d.name.clone()),
                current_track: state.item.as_ref().map(|t| t.name.clone()),
            };
            info!(device = ?details.current_device, "Play refused, another device is playing");
            return Err(PlaybackError::Conflict(details));
        }

        self.transfer_with_retry(device_id).await?;
        tokio::time::sleep(TRANSFER_SETTLE).await;

        let latest = self.player_state().await?;
        let request = PlayRequest {
            context_uri: command.context_uri.clone(),
            offset_uri: latest.and_then(|s| s.item).map(|t| t.uri),
            position_ms: command.position_ms,
        };
        debug!(device_id = %device_id, request = ?request, "Starting playback");

        self.player
            .play(device_id, &request)
            .await
            .map_err(|e| PlaybackError::ControlFailed(e.to_string()))
    }

    /// Transfer and confirm, up to three attempts one second apart
    async fn transfer_with_retry(&self, device_id: &str) -> Result<(), PlaybackError> {
        let mut last_error = String::new();
        for attempt in 1..=TRANSFER_ATTEMPTS {
            match self.transfer_once(device_id).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, device_id = %device_id, error = %e, "Transfer attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt < TRANSFER_ATTEMPTS {
                tokio::time::sleep(TRANSFER_RETRY_DELAY).await;
            }
        }
        Err(PlaybackError::ControlFailed(last_error))
    }

    async fn transfer_once(&self, device_id: &str) -> Result<(), ApiError> {
        self.player.transfer_playback(device_id, false).await?;
        match self.player.player_state().await? {
            Some(state) if state.is_on_device(device_id) => Ok(()),
            _ => Err(ApiError::Status {
                status: 409,
                message: "Device transfer verification failed".to_string(),
            }),
        }
    }

    async fn player_state(&self) -> Result<Option<PlayerState>, PlaybackError> {
        self.player
            .player_state()
            .await
            .map_err(|e| PlaybackError::ControlFailed(e.to_string()))
    }
}
