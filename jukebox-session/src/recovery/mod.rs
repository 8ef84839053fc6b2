//! Recovery / Reconnection Engine
//!
//! Components that notice trouble (the device session, the health monitor,
//! the playback controller) only send a [`RecoveryCause`] through a
//! [`RecoveryHandle`]. A single engine task consumes the triggers, so at most
//! one recovery sequence runs at a time and triggers that arrive while one is
//! running are folded into it.

mod budget;
mod connection;

pub use budget::{BudgetExhausted, RecoveryAttempt, RecoveryBudget, RecoveryBudgetStatus};
pub use connection::ConnectionTracker;

use crate::clients::PlayerApi;
use crate::config::RecoveryConfig;
use crate::device::DeviceSession;
use chrono::Utc;
use jukebox_common::events::{EventBus, JukeboxEvent, LifecycleState, RecoveryCause};
use jukebox_common::InFlight;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Sends recovery triggers to the engine
#[derive(Clone)]
pub struct RecoveryHandle {
    tx: mpsc::UnboundedSender<RecoveryCause>,
}

impl RecoveryHandle {
    pub fn signal(&self, cause: RecoveryCause) {
        debug!(cause = %cause, "Recovery triggered");
        if self.tx.send(cause).is_err() {
            debug!("Recovery engine not running, trigger dropped");
        }
    }
}

/// Create a trigger handle and the receiver the engine consumes
pub fn channel() -> (RecoveryHandle, mpsc::UnboundedReceiver<RecoveryCause>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RecoveryHandle { tx }, rx)
}

pub struct RecoveryEngine {
    session: DeviceSession,
    player: Arc<dyn PlayerApi>,
    budget: Arc<RecoveryBudget>,
    events: EventBus,
    config: RecoveryConfig,
    cycle: InFlight,
}

impl RecoveryEngine {
    pub fn new(
        session: DeviceSession,
        player: Arc<dyn PlayerApi>,
        budget: Arc<RecoveryBudget>,
        events: EventBus,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            session,
            player,
            budget,
            events,
            config,
            cycle: InFlight::new(),
        }
    }

    /// Consume triggers until every [`RecoveryHandle`] is dropped
    pub async fn run(&self, mut triggers: mpsc::UnboundedReceiver<RecoveryCause>) {
        info!("Recovery engine started");
        while let Some(cause) = triggers.recv().await {
            self.recover(cause).await;

            // triggers raised while recovering describe the same outage
            let mut folded = 0;
            while triggers.try_recv().is_ok() {
                folded += 1;
            }
            if folded > 0 {
                debug!(folded, "Dropped triggers queued during recovery");
            }
        }
        info!("Recovery engine stopped");
    }

    /// Run one bounded recovery sequence
    pub async fn recover(&self, cause: RecoveryCause) {
        let Some(_cycle) = self.cycle.try_acquire() else {
            debug!(cause = %cause, "Recovery already running, trigger folded");
            return;
        };
        if self.budget.is_exhausted() {
            debug!(cause = %cause, "Recovery budget exhausted, ignoring trigger");
            return;
        }

        match self.session.lifecycle() {
            LifecycleState::Initializing
            | LifecycleState::AwaitingSdkReady
            | LifecycleState::Verifying => {
                debug!(cause = %cause, "Session is transitioning, ignoring trigger");
                return;
            }
            LifecycleState::Ready if !self.needs_recovery(cause).await => {
                debug!(cause = %cause, "Session healthy, ignoring trigger");
                return;
            }
            _ => {}
        }

        let max_attempts = self.budget.max_attempts();
        loop {
            let attempt = match self.budget.try_begin(cause) {
                Ok(attempt) => attempt,
                Err(exhausted) => {
                    self.give_up(exhausted.attempts, cause).await;
                    return;
                }
            };

            info!(attempt, max_attempts, cause = %cause, "Recovery attempt");
            self.events.emit_lossy(JukeboxEvent::RecoveryAttempted {
                attempt,
                max_attempts,
                cause,
                timestamp: Utc::now(),
            });

            match self.attempt().await {
                Ok(device_id) => {
                    info!(attempt, device_id = %device_id, "Recovery succeeded");
                    self.budget.reset();
                    self.events.emit_lossy(JukeboxEvent::RecoverySucceeded {
                        device_id,
                        attempts: attempt,
                        timestamp: Utc::now(),
                    });
                    return;
                }
                Err(reason) => {
                    warn!(attempt, max_attempts, reason = %reason, "Recovery attempt failed");
                    if attempt >= max_attempts {
                        self.give_up(attempt, cause).await;
                        return;
                    }
                }
            }

            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    pub fn status(&self) -> RecoveryBudgetStatus {
        self.budget.status()
    }

    /// A `Ready` session only needs work when the device is actually gone
    async fn needs_recovery(&self, cause: RecoveryCause) -> bool {
        match cause {
            RecoveryCause::VerificationFailed | RecoveryCause::PlaybackErrors => true,
            _ => {
                let Some(device_id) = self.session.device_id() else {
                    return true;
                };
                !matches!(
                    self.player.player_state().await,
                    Ok(Some(state)) if state.is_on_device(&device_id)
                )
            }
        }
    }

    async fn attempt(&self) -> Result<String, String> {
        match self.session.lifecycle() {
            LifecycleState::Error | LifecycleState::Uninitialized => {
                return self.session.reinitialize().await.map_err(|e| e.to_string());
            }
            LifecycleState::Initializing
            | LifecycleState::AwaitingSdkReady
            | LifecycleState::Verifying => {
                return self.session.initialize().await.map_err(|e| e.to_string());
            }
            LifecycleState::Ready | LifecycleState::NotReady | LifecycleState::Reconnecting => {}
        }

        let device_id = self
            .session
            .device_id()
            .ok_or_else(|| "no device id".to_string())?;

        if !self.session.begin_reconnecting() {
            return Err(format!("cannot reconnect from {}", self.session.lifecycle()));
        }

        if self.is_active(&device_id).await {
            return self.confirm(&device_id);
        }

        let resume = self
            .session
            .last_player_state()
            .map(|s| s.is_playing)
            .unwrap_or(false);
        self.player
            .transfer_playback(&device_id, resume)
            .await
            .map_err(|e| format!("transfer failed: {}", e))?;

        if self.is_active(&device_id).await {
            self.confirm(&device_id)
        } else {
            Err("device not active after transfer".to_string())
        }
    }

    async fn is_active(&self, device_id: &str) -> bool {
        match self.player.player_state().await {
            Ok(Some(state)) => state.is_on_device(device_id),
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "Player state unavailable during recovery");
                false
            }
        }
    }

    fn confirm(&self, device_id: &str) -> Result<String, String> {
        if self.session.confirm_recovered(device_id)
            || self.session.lifecycle() == LifecycleState::Ready
        {
            Ok(device_id.to_string())
        } else {
            Err(format!("session left reconnecting ({})", self.session.lifecycle()))
        }
    }

    async fn give_up(&self, attempts: u32, cause: RecoveryCause) {
        error!(attempts, cause = %cause, "Recovery exhausted, session needs a reset");
        self.budget.exhaust();
        self.events.emit_lossy(JukeboxEvent::RecoveryExhausted {
            attempts,
            cause,
            timestamp: Utc::now(),
        });
        self.session.fail_recovery(attempts).await;
    }
}
