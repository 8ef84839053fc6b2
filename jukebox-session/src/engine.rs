//! Session engine assembly
//!
//! Builds every component from the configuration, wires the recovery and
//! scheduler channels, and owns the background tasks.

use crate::clients::{
    CredentialSource, HttpCredentialSource, HttpTrackSuggester, PlayerApi, PlaylistApi,
    TrackSuggester, WebApiClient,
};
use crate::config::Config;
use crate::device::{ConnectDeviceLoader, DeviceSession, SdkLoader, SessionSnapshot};
use crate::error::{Error, Result};
use crate::health::HealthMonitor;
use crate::playback::PlaybackController;
use crate::recovery::{
    self, ConnectionTracker, RecoveryBudget, RecoveryBudgetStatus, RecoveryEngine, RecoveryHandle,
};
use crate::refresh::PlaylistRefresher;
use crate::scheduler::{self, RefreshScheduler, SchedulerHandle};
use crate::token::{TokenManager, TokenStatus};
use jukebox_common::events::{ConnectionQuality, EventBus, HealthStatus, RecoveryCause};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{info, warn};

const EVENT_BUS_CAPACITY: usize = 256;

/// Remote collaborators the engine drives
pub struct Collaborators {
    pub player: Arc<dyn PlayerApi>,
    pub playlists: Arc<dyn PlaylistApi>,
    pub suggester: Arc<dyn TrackSuggester>,
    pub sdk_loader: Arc<dyn SdkLoader>,
}

/// Composite status for `GET /session/status`
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session: SessionSnapshot,
    pub recovery: RecoveryBudgetStatus,
    pub token: TokenStatus,
    pub health: HealthStatus,
    pub connection: ConnectionQuality,
    pub refresh_in_progress: bool,
}

struct Pending {
    recovery_rx: mpsc::UnboundedReceiver<RecoveryCause>,
    scheduler_rx: mpsc::UnboundedReceiver<()>,
}

pub struct SessionEngine {
    config: Config,
    events: EventBus,
    tokens: TokenManager,
    connection: Arc<ConnectionTracker>,
    session: DeviceSession,
    recovery: Arc<RecoveryEngine>,
    recovery_handle: RecoveryHandle,
    health: Arc<HealthMonitor>,
    refresher: Arc<PlaylistRefresher>,
    playback: Arc<PlaybackController>,
    scheduler: SchedulerHandle,
    pending: Mutex<Option<Pending>>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl SessionEngine {
    /// Production wiring: HTTP collaborators and the connect-device SDK
    pub fn from_config(config: Config, db: Option<Pool<Sqlite>>) -> Result<Self> {
        let credentials = Arc::new(HttpCredentialSource::new(
            config.api.token_url.clone(),
            config.api.request_timeout(),
        )?);

        let api_config = config.api.clone();
        let device_config = config.device.clone();
        let suggestion_config = config.suggestion.clone();

        Self::assemble(config, db, credentials, move |tokens, connection| {
            let api = Arc::new(WebApiClient::new(
                api_config.base_url.clone(),
                api_config.request_timeout(),
                api_config.coalesce_ttl(),
                api_config.coalesce_max_entries,
                tokens.clone(),
                Arc::clone(connection),
            )?);
            let suggester = HttpTrackSuggester::new(suggestion_config.url.clone(), suggestion_config.timeout())
                .map_err(|e| Error::Config(format!("Suggestion client: {}", e)))?;
            let sdk_loader = ConnectDeviceLoader::new(
                Arc::clone(&api),
                device_config.name.clone(),
                device_config.poll_interval(),
            );

            Ok(Collaborators {
                player: api.clone(),
                playlists: api,
                suggester: Arc::new(suggester),
                sdk_loader: Arc::new(sdk_loader),
            })
        })
    }

    /// Wire the engine around the given collaborators
    ///
    /// `build` receives the token manager and connection tracker so remote
    /// clients can share them.
    pub fn assemble<F>(
        config: Config,
        db: Option<Pool<Sqlite>>,
        credentials: Arc<dyn CredentialSource>,
        build: F,
    ) -> Result<Self>
    where
        F: FnOnce(&TokenManager, &Arc<ConnectionTracker>) -> Result<Collaborators>,
    {
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let connection = Arc::new(ConnectionTracker::new(
            config.recovery.network_failure_threshold,
            events.clone(),
        ));
        let tokens = TokenManager::new(credentials, config.token.clone(), events.clone());
        let collaborators = build(&tokens, &connection)?;

        let budget = Arc::new(RecoveryBudget::new(config.recovery.max_attempts));
        let (recovery_handle, recovery_rx) = recovery::channel();
        let (scheduler_handle, scheduler_rx) = scheduler::channel();

        let session = DeviceSession::new(
            collaborators.sdk_loader,
            tokens.clone(),
            Arc::clone(&collaborators.player),
            Arc::clone(&budget),
            recovery_handle.clone(),
            events.clone(),
            config.device.clone(),
        );

        let recovery = Arc::new(RecoveryEngine::new(
            session.clone(),
            Arc::clone(&collaborators.player),
            budget,
            events.clone(),
            config.recovery.clone(),
        ));

        let health = Arc::new(HealthMonitor::new(
            session.clone(),
            Arc::clone(&collaborators.player),
            tokens.clone(),
            Arc::clone(&connection),
            recovery_handle.clone(),
            events.clone(),
            config.health.clone(),
        ));

        let refresher = Arc::new(PlaylistRefresher::new(
            collaborators.playlists,
            Arc::clone(&collaborators.player),
            collaborators.suggester,
            recovery_handle.clone(),
            events.clone(),
            db,
            config.refresh.clone(),
            config.playlist.name.clone(),
            config.playlist.market.clone(),
        ));

        let playback = Arc::new(PlaybackController::new(
            session.clone(),
            collaborators.player,
            recovery_handle.clone(),
        ));

        Ok(Self {
            config,
            events,
            tokens,
            connection,
            session,
            recovery,
            recovery_handle,
            health,
            refresher,
            playback,
            scheduler: scheduler_handle,
            pending: Mutex::new(Some(Pending {
                recovery_rx,
                scheduler_rx,
            })),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the background tasks and start device initialization
    ///
    /// A second call is a no-op.
    pub fn start(&self) {
        let Some(pending) = self.lock_pending().take() else {
            warn!("Session engine already started");
            return;
        };

        let Pending {
            recovery_rx,
            scheduler_rx,
        } = pending;

        let recovery = Arc::clone(&self.recovery);
        let recovery_task = tokio::spawn(async move { recovery.run(recovery_rx).await });

        let health = Arc::clone(&self.health);
        let health_task = tokio::spawn(health.run());

        let scheduler = RefreshScheduler::new(Arc::clone(&self.refresher), self.config.refresh.clone());
        let scheduler_task = tokio::spawn(scheduler.run(scheduler_rx));

        let session = self.session.clone();
        let init_task = tokio::spawn(async move {
            match session.initialize().await {
                Ok(device_id) => info!(device_id = %device_id, "Device session ready"),
                Err(e) => warn!(error = %e, "Initial device session setup failed"),
            }
        });

        self.lock_tasks().extend([
            recovery_task.abort_handle(),
            health_task.abort_handle(),
            scheduler_task.abort_handle(),
            init_task.abort_handle(),
        ]);
        info!("Session engine started");
    }

    /// Stop background tasks and tear the device session down
    pub async fn shutdown(&self) {
        let tasks: Vec<AbortHandle> = self.lock_tasks().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.tokens.shutdown();
        self.session.destroy().await;
        info!("Session engine stopped");
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session: self.session.snapshot(),
            recovery: self.recovery.status(),
            token: self.tokens.status(),
            health: self.health.current(),
            connection: self.connection.quality(),
            refresh_in_progress: self.refresher.is_running(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn recovery(&self) -> &RecoveryHandle {
        &self.recovery_handle
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn refresher(&self) -> &Arc<PlaylistRefresher> {
        &self.refresher
    }

    pub fn playback(&self) -> &Arc<PlaybackController> {
        &self.playback
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<AbortHandle>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
