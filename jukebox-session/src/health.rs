//! Health Monitor
//!
//! Periodically recomputes the composite [`HealthStatus`]. The polling period
//! follows connection quality, and a quality change wakes the loop early so
//! the new cadence applies immediately. The monitor only observes: a lost
//! device is reported to the recovery engine, never repaired here.

use crate::clients::{PlayerApi, PlayerState};
use crate::config::HealthConfig;
use crate::device::DeviceSession;
use crate::error::ApiError;
use crate::recovery::{ConnectionTracker, RecoveryHandle};
use crate::token::TokenManager;
use chrono::Utc;
use jukebox_common::events::{
    DeviceHealth, EventBus, HealthStatus, JukeboxEvent, PlaybackHealth, RecoveryCause,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct HealthMonitor {
    session: DeviceSession,
    player: Arc<dyn PlayerApi>,
    tokens: TokenManager,
    connection: Arc<ConnectionTracker>,
    recovery: RecoveryHandle,
    events: EventBus,
    config: HealthConfig,
    status_tx: watch::Sender<HealthStatus>,
}

impl HealthMonitor {
    pub fn new(
        session: DeviceSession,
        player: Arc<dyn PlayerApi>,
        tokens: TokenManager,
        connection: Arc<ConnectionTracker>,
        recovery: RecoveryHandle,
        events: EventBus,
        config: HealthConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(HealthStatus::initial());
        Self {
            session,
            player,
            tokens,
            connection,
            recovery,
            events,
            config,
            status_tx,
        }
    }

    /// Latest published status
    pub fn current(&self) -> HealthStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status_tx.subscribe()
    }

    /// Poll forever; the owner aborts the task on shutdown
    pub async fn run(self: Arc<Self>) {
        let mut quality_rx = self.connection.subscribe();
        info!("Health monitor started");

        loop {
            self.tick().await;

            let quality = *quality_rx.borrow_and_update();
            let interval = self.config.interval_for(quality);
            debug!(quality = %quality, interval_secs = interval.as_secs(), "Next health check scheduled");

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = quality_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Recompute and publish the status once
    pub async fn tick(&self) -> HealthStatus {
        let status = self.check().await;
        self.status_tx.send_replace(status.clone());
        self.events.emit_lossy(JukeboxEvent::HealthUpdated {
            status: status.clone(),
        });
        status
    }

    async fn check(&self) -> HealthStatus {
        let player_state = self.player.player_state().await;
        let device = self.device_health(&player_state);

        if device == DeviceHealth::Disconnected {
            warn!(device_id = ?self.session.device_id(), "Device not confirmed active");
            self.recovery.signal(RecoveryCause::Disconnected);
        }

        HealthStatus {
            device,
            playback: playback_health(&player_state),
            token: self.tokens.status().health,
            connection: self.connection.quality(),
            checked_at: Utc::now(),
        }
    }

    fn device_health(&self, player_state: &Result<Option<PlayerState>, ApiError>) -> DeviceHealth {
        let Some(device_id) = self.session.device_id() else {
            return DeviceHealth::Disconnected;
        };

        match player_state {
            Ok(Some(state)) if state.is_on_device(&device_id) => {
                if self.session.consecutive_failures() >= self.session.max_consecutive_failures() {
                    DeviceHealth::Unresponsive
                } else {
                    DeviceHealth::Healthy
                }
            }
            Ok(_) => DeviceHealth::Disconnected,
            Err(e) => {
                debug!(error = %e, "Player state unavailable");
                DeviceHealth::Unresponsive
            }
        }
    }
}

fn playback_health(player_state: &Result<Option<PlayerState>, ApiError>) -> PlaybackHealth {
    match player_state {
        Ok(Some(state)) if state.is_playing => PlaybackHealth::Playing,
        Ok(Some(state)) if state.item.is_some() => PlaybackHealth::Paused,
        Ok(_) => PlaybackHealth::Stopped,
        Err(_) => PlaybackHealth::Error,
    }
}
