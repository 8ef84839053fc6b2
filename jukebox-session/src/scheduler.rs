//! Refresh scheduler
//!
//! Drives the refresh orchestrator from a periodic timer and from debounced
//! "track added" signals. A burst of signals inside the debounce window
//! produces a single refresh once the window goes quiet.

use crate::config::RefreshConfig;
use crate::refresh::PlaylistRefresher;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Sends "track added" signals to the scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl SchedulerHandle {
    pub fn notify_track_added(&self) {
        if self.tx.send(()).is_err() {
            debug!("Refresh scheduler not running, track-added signal dropped");
        }
    }
}

pub fn channel() -> (SchedulerHandle, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SchedulerHandle { tx }, rx)
}

pub struct RefreshScheduler {
    refresher: Arc<PlaylistRefresher>,
    config: RefreshConfig,
}

impl RefreshScheduler {
    pub fn new(refresher: Arc<PlaylistRefresher>, config: RefreshConfig) -> Self {
        Self { refresher, config }
    }

    pub async fn run(self, mut signals: mpsc::UnboundedReceiver<()>) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.config.interval(), self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_run: Option<Instant> = None;
        let mut debounce_deadline: Option<Instant> = None;

        info!(
            interval_secs = self.config.interval_secs,
            debounce_ms = self.config.debounce_ms,
            "Refresh scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let cooling = last_run
                        .map(|t| t.elapsed() < self.config.cooldown())
                        .unwrap_or(false);
                    if cooling {
                        debug!("Skipping periodic refresh inside cooldown");
                        continue;
                    }
                    self.run_once("timer").await;
                    last_run = Some(Instant::now());
                }
                signal = signals.recv() => {
                    match signal {
                        Some(()) => {
                            debounce_deadline = Some(Instant::now() + self.config.debounce());
                        }
                        None => break,
                    }
                }
                _ = wait_until(debounce_deadline), if debounce_deadline.is_some() => {
                    debounce_deadline = None;
                    self.run_once("track added").await;
                    last_run = Some(Instant::now());
                }
            }
        }
        info!("Refresh scheduler stopped");
    }

    async fn run_once(&self, trigger: &str) {
        debug!(trigger, "Scheduled refresh");
        let result = self.refresher.refresh(false, None).await;
        debug!(trigger, success = result.success, status = ?result.status, "Scheduled refresh done");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
