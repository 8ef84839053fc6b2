//! Pre-wired components around the fakes

use super::fakes::{
    FakeCredentialSource, FakePlayerApi, FakePlaylistApi, FakeSdkLoader, FakeSuggester,
    PLAYLIST_NAME,
};
use jukebox_common::events::{EventBus, JukeboxEvent, RecoveryCause};
use jukebox_session::api::{create_router, AppContext};
use jukebox_session::config::{Config, DeviceConfig, RecoveryConfig};
use jukebox_session::device::DeviceSession;
use jukebox_session::recovery::{self, RecoveryBudget, RecoveryEngine, RecoveryHandle};
use jukebox_session::token::TokenManager;
use jukebox_session::{Collaborators, SessionEngine};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub const DEVICE_ID: &str = "device-1";

/// Engine configuration with test-friendly names
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.playlist.name = PLAYLIST_NAME.to_string();
    config.playlist.market = "VN".to_string();
    config.token.retry_delays_ms = vec![10, 30];
    config
}

/// In-memory settings database
///
/// One connection, so every query sees the same memory database.
pub async fn memory_pool() -> Pool<Sqlite> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    jukebox_session::db::init_database(&pool)
        .await
        .expect("Failed to create schema");
    pool
}

/// Let spawned tasks run; under a paused clock this also advances time
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Device session alone
// ============================================================================

/// A device session with its recovery trigger receiver exposed
pub struct SessionRig {
    pub session: DeviceSession,
    pub loader: Arc<FakeSdkLoader>,
    pub player: Arc<FakePlayerApi>,
    pub credentials: Arc<FakeCredentialSource>,
    pub tokens: TokenManager,
    pub budget: Arc<RecoveryBudget>,
    pub events: EventBus,
    pub recovery: RecoveryHandle,
    pub triggers: mpsc::UnboundedReceiver<RecoveryCause>,
}

impl SessionRig {
    pub fn new(loader: FakeSdkLoader, player: FakePlayerApi) -> Self {
        Self::with_config(loader, player, DeviceConfig::default(), 3)
    }

    pub fn with_config(
        loader: FakeSdkLoader,
        player: FakePlayerApi,
        config: DeviceConfig,
        max_attempts: u32,
    ) -> Self {
        let events = EventBus::new(256);
        let credentials = Arc::new(FakeCredentialSource::new(3600));
        let tokens = TokenManager::new(
            credentials.clone(),
            test_config().token,
            events.clone(),
        );
        let loader = Arc::new(loader);
        let player = Arc::new(player);
        let budget = Arc::new(RecoveryBudget::new(max_attempts));
        let (recovery, triggers) = recovery::channel();

        let session = DeviceSession::new(
            loader.clone(),
            tokens.clone(),
            player.clone(),
            Arc::clone(&budget),
            recovery.clone(),
            events.clone(),
            config,
        );

        Self {
            session,
            loader,
            player,
            credentials,
            tokens,
            budget,
            events,
            recovery,
            triggers,
        }
    }

    /// Recovery engine driving this rig's session
    pub fn recovery_engine(&self, config: RecoveryConfig) -> RecoveryEngine {
        RecoveryEngine::new(
            self.session.clone(),
            self.player.clone(),
            Arc::clone(&self.budget),
            self.events.clone(),
            config,
        )
    }

    /// Recovery triggers raised so far
    pub fn drain_triggers(&mut self) -> Vec<RecoveryCause> {
        let mut causes = Vec::new();
        while let Ok(cause) = self.triggers.try_recv() {
            causes.push(cause);
        }
        causes
    }
}

// ============================================================================
// Full engine
// ============================================================================

/// A fully wired engine plus handles to every fake behind it
pub struct EngineRig {
    pub engine: Arc<SessionEngine>,
    pub loader: Arc<FakeSdkLoader>,
    pub player: Arc<FakePlayerApi>,
    pub playlists: Arc<FakePlaylistApi>,
    pub suggester: Arc<FakeSuggester>,
    pub credentials: Arc<FakeCredentialSource>,
}

impl EngineRig {
    pub fn new(
        config: Config,
        db: Option<Pool<Sqlite>>,
        loader: FakeSdkLoader,
        player: FakePlayerApi,
        playlists: FakePlaylistApi,
    ) -> Self {
        let loader = Arc::new(loader);
        let player = Arc::new(player);
        let playlists = Arc::new(playlists);
        let suggester = Arc::new(FakeSuggester::new());
        let credentials = Arc::new(FakeCredentialSource::new(3600));

        let collaborators = Collaborators {
            player: player.clone(),
            playlists: playlists.clone(),
            suggester: suggester.clone(),
            sdk_loader: loader.clone(),
        };
        let engine = SessionEngine::assemble(config, db, credentials.clone(), move |_, _| {
            Ok(collaborators)
        })
        .expect("Failed to assemble engine");

        Self {
            engine: Arc::new(engine),
            loader,
            player,
            playlists,
            suggester,
            credentials,
        }
    }

    pub fn router(&self) -> axum::Router {
        create_router(AppContext::new(Arc::clone(&self.engine)))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JukeboxEvent> {
        self.engine.events().subscribe()
    }
}

/// Collect the events currently buffered on a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<JukeboxEvent>) -> Vec<JukeboxEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait (bounded) until `check` holds
pub async fn wait_for(mut check: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
