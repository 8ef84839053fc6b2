//! Device Session State Machine
//!
//! Wraps the single live playback SDK instance and turns its event stream
//! into the lifecycle states of [`LifecycleState`]. The session is the only
//! owner of the SDK handle; everything else observes it through this API.
//!
//! Concurrent `initialize()` callers share one pending initialization. Work
//! that completes after the session was destroyed or re-initialized checks
//! the session generation before writing anything.

mod connect;
mod sdk;

pub use connect::{ConnectDeviceLoader, ConnectDeviceSdk};
pub use sdk::{PlaybackSdk, SdkEvent, SdkLoader};

use crate::clients::{PlayerApi, PlayerState};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, SdkError};
use crate::recovery::{RecoveryBudget, RecoveryHandle};
use crate::token::TokenManager;
use chrono::Utc;
use jukebox_common::events::{EventBus, JukeboxEvent, LifecycleState, RecoveryCause};
use jukebox_common::SingleFlight;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Session snapshot for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: LifecycleState,
    pub device_id: Option<String>,
    pub consecutive_failures: u32,
    pub degraded: bool,
    pub sdk_loaded: bool,
    pub last_error: Option<String>,
}

struct GraceTimer {
    id: u64,
    handle: AbortHandle,
}

struct SessionState {
    lifecycle: LifecycleState,
    device_id: Option<String>,
    sdk: Option<Arc<dyn PlaybackSdk>>,
    consecutive_failures: u32,
    degraded: bool,
    last_error: Option<DeviceError>,
    last_player_state: Option<PlayerState>,
    grace: Option<GraceTimer>,
    next_grace_id: u64,
    pump: Option<AbortHandle>,
}

/// Resources detached from the session, released outside the lock
struct Detached {
    sdk: Option<Arc<dyn PlaybackSdk>>,
    pump: Option<AbortHandle>,
    grace: Option<GraceTimer>,
}

impl Detached {
    async fn release(self) {
        if let Some(grace) = self.grace {
            grace.handle.abort();
        }
        if let Some(sdk) = self.sdk {
            sdk.disconnect().await;
        }
        // may be the calling task; it stops at its next suspension point
        if let Some(pump) = self.pump {
            pump.abort();
        }
    }
}

enum ReadyWait {
    Ready(String),
    AuthenticationError(String),
    Failed(DeviceError),
    Closed,
}

struct SessionInner {
    loader: Arc<dyn SdkLoader>,
    tokens: TokenManager,
    player: Arc<dyn PlayerApi>,
    budget: Arc<RecoveryBudget>,
    recovery: RecoveryHandle,
    events: EventBus,
    config: DeviceConfig,
    state: Mutex<SessionState>,
    state_tx: watch::Sender<LifecycleState>,
    init: SingleFlight<Result<String, DeviceError>>,
    generation: AtomicU64,
}

/// Handle to the process-wide device session
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

impl DeviceSession {
    pub fn new(
        loader: Arc<dyn SdkLoader>,
        tokens: TokenManager,
        player: Arc<dyn PlayerApi>,
        budget: Arc<RecoveryBudget>,
        recovery: RecoveryHandle,
        events: EventBus,
        config: DeviceConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Uninitialized);
        Self {
            inner: Arc::new(SessionInner {
                loader,
                tokens,
                player,
                budget,
                recovery,
                events,
                config,
                state: Mutex::new(SessionState {
                    lifecycle: LifecycleState::Uninitialized,
                    device_id: None,
                    sdk: None,
                    consecutive_failures: 0,
                    degraded: false,
                    last_error: None,
                    last_player_state: None,
                    grace: None,
                    next_grace_id: 0,
                    pump: None,
                }),
                state_tx,
                init: SingleFlight::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Bring the session to `Ready` and return the device id
    ///
    /// Idempotent: an existing session returns its device id, and concurrent
    /// callers join the pending initialization instead of creating a second
    /// SDK instance. A session in `Error` needs [`reinitialize`](Self::reinitialize).
    pub async fn initialize(&self) -> Result<String, DeviceError> {
        if !self.inner.init.is_pending() {
            let state = self.inner.lock();
            match state.lifecycle {
                LifecycleState::Error => {
                    let reason = state
                        .last_error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(DeviceError::SessionFailed(reason));
                }
                LifecycleState::Ready
                | LifecycleState::NotReady
                | LifecycleState::Reconnecting
                | LifecycleState::Verifying => {
                    if let Some(device_id) = &state.device_id {
                        return Ok(device_id.clone());
                    }
                }
                _ => {}
            }
        }

        self.run_initialization().await
    }

    /// Explicit recovery action: leave `Error` (or `Uninitialized`) and initialize
    pub async fn reinitialize(&self) -> Result<String, DeviceError> {
        {
            let mut state = self.inner.lock();
            if matches!(state.lifecycle, LifecycleState::Error | LifecycleState::Uninitialized) {
                state.last_error = None;
                self.inner.transition(&mut state, LifecycleState::Initializing);
            }
        }
        self.initialize().await
    }

    /// Operator reset: zero the recovery budget, tear down, initialize again
    pub async fn reset(&self) -> Result<String, DeviceError> {
        info!("Device session reset requested");
        self.inner.budget.reset();
        self.destroy().await;
        self.reinitialize().await
    }

    /// Disconnect the SDK, drop the handle, cancel owned timers
    ///
    /// Always safe, including twice in a row or during initialization.
    pub async fn destroy(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.init.forget();

        let detached = {
            let mut state = self.inner.lock();
            let detached = SessionInner::detach(&mut state);
            state.device_id = None;
            state.degraded = false;
            state.consecutive_failures = 0;
            state.last_player_state = None;
            self.inner.transition(&mut state, LifecycleState::Uninitialized);
            detached
        };

        detached.release().await;
        debug!("Device session destroyed");
    }

    async fn run_initialization(&self) -> Result<String, DeviceError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .init
            .run(move || async move { SessionInner::initialize(inner).await })
            .await
    }

    // ------------------------------------------------------------------
    // Recovery engine hooks
    // ------------------------------------------------------------------

    /// Enter `Reconnecting` from `Ready`/`NotReady`; true if now reconnecting
    pub fn begin_reconnecting(&self) -> bool {
        let mut state = self.inner.lock();
        let lifecycle = state.lifecycle;
        match lifecycle {
            LifecycleState::Reconnecting => true,
            LifecycleState::Ready | LifecycleState::NotReady => {
                self.inner.transition(&mut state, LifecycleState::Reconnecting)
            }
            _ => false,
        }
    }

    /// Device confirmed active again: `Reconnecting → Verifying → Ready`
    pub fn confirm_recovered(&self, device_id: &str) -> bool {
        let confirmed = {
            let mut state = self.inner.lock();
            if state.lifecycle != LifecycleState::Reconnecting {
                false
            } else {
                state.device_id = Some(device_id.to_string());
                self.inner.transition(&mut state, LifecycleState::Verifying);
                state.degraded = false;
                state.consecutive_failures = 0;
                self.inner.transition(&mut state, LifecycleState::Ready)
            }
        };

        if confirmed {
            self.inner.budget.reset();
        }
        confirmed
    }

    /// Recovery budget consumed: terminal `Error`
    pub async fn fail_recovery(&self, attempts: u32) {
        self.inner.fail(DeviceError::RecoveryExhausted(attempts)).await;
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.lock().lifecycle
    }

    pub fn device_id(&self) -> Option<String> {
        self.inner.lock().device_id.clone()
    }

    /// Device id if the session is `Ready`
    pub fn ready_device_id(&self) -> Option<String> {
        let state = self.inner.lock();
        match state.lifecycle {
            LifecycleState::Ready => state.device_id.clone(),
            _ => None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.lock().degraded
    }

    pub fn last_player_state(&self) -> Option<PlayerState> {
        self.inner.lock().last_player_state.clone()
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.inner.config.max_consecutive_failures
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock();
        SessionSnapshot {
            state: state.lifecycle,
            device_id: state.device_id.clone(),
            consecutive_failures: state.consecutive_failures,
            degraded: state.degraded,
            sdk_loaded: state.sdk.is_some(),
            last_error: state.last_error.as_ref().map(|e| e.to_string()),
        }
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Apply a transition if the edge is allowed
    fn transition(&self, state: &mut SessionState, next: LifecycleState) -> bool {
        let current = state.lifecycle;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Rejected lifecycle transition");
            return false;
        }

        state.lifecycle = next;
        self.state_tx.send_replace(next);
        info!(from = %current, to = %next, device_id = ?state.device_id, "Device session state changed");
        self.events.emit_lossy(JukeboxEvent::DeviceStateChanged {
            old_state: current,
            new_state: next,
            device_id: state.device_id.clone(),
            timestamp: Utc::now(),
        });
        true
    }

    fn set_state(&self, generation: u64, next: LifecycleState) -> bool {
        let mut state = self.lock();
        self.is_current(generation) && self.transition(&mut state, next)
    }

    fn detach(state: &mut SessionState) -> Detached {
        Detached {
            sdk: state.sdk.take(),
            pump: state.pump.take(),
            grace: state.grace.take(),
        }
    }

    /// Move to `Error` and release the SDK
    async fn fail(&self, err: DeviceError) {
        let detached = {
            let mut state = self.lock();
            error!(error = %err, "Device session failed");
            state.last_error = Some(err);
            state.device_id = None;
            state.last_player_state = None;
            self.transition(&mut state, LifecycleState::Error);
            Self::detach(&mut state)
        };
        detached.release().await;
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    async fn initialize(self: Arc<Self>) -> Result<String, DeviceError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let result = self.initialize_attempts(generation).await;

        if let Err(e) = &result {
            if self.is_current(generation) {
                self.fail(e.clone()).await;
            }
        }
        result
    }

    async fn initialize_attempts(self: &Arc<Self>, generation: u64) -> Result<String, DeviceError> {
        loop {
            // at most one SDK instance: release any previous handle first
            let previous = Self::detach(&mut self.lock());
            previous.release().await;

            self.set_state(generation, LifecycleState::Initializing);

            let sdk = match tokio::time::timeout(self.config.sdk_load_timeout(), self.loader.load()).await {
                Err(_) => {
                    return Err(DeviceError::SdkUnavailable(format!(
                        "SDK not loaded within {}ms",
                        self.config.sdk_load_timeout_ms
                    )))
                }
                Ok(Err(e)) => return Err(DeviceError::SdkUnavailable(e.to_string())),
                Ok(Ok(sdk)) => sdk,
            };

            let token = match self.tokens.get_token().await {
                Ok(token) => token,
                Err(e) => {
                    sdk.disconnect().await;
                    return Err(e.into());
                }
            };

            let Some(mut events) = sdk.take_events() else {
                sdk.disconnect().await;
                return Err(DeviceError::InitializationError(
                    "SDK event stream unavailable".to_string(),
                ));
            };

            if !self.install_sdk(generation, Arc::clone(&sdk)) {
                sdk.disconnect().await;
                return Err(DeviceError::Destroyed);
            }

            match sdk.connect(&token).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(DeviceError::ConnectError(
                        "SDK connect returned failure".to_string(),
                    ))
                }
                Err(SdkError::Authentication(message)) => {
                    self.retry_authentication(message).await?;
                    continue;
                }
                Err(e) => return Err(DeviceError::ConnectError(e.to_string())),
            }

            self.set_state(generation, LifecycleState::AwaitingSdkReady);

            let waited =
                tokio::time::timeout(self.config.ready_timeout(), wait_for_ready(&mut events)).await;
            match waited {
                Err(_) => return Err(DeviceError::ReadyTimeout(self.config.ready_timeout_ms)),
                Ok(ReadyWait::Ready(device_id)) => {
                    if !self.is_current(generation) {
                        return Err(DeviceError::Destroyed);
                    }
                    self.confirm_ready(generation, device_id.clone()).await;
                    if !self.is_current(generation) {
                        return Err(DeviceError::Destroyed);
                    }
                    self.spawn_event_pump(generation, events);
                    return Ok(device_id);
                }
                Ok(ReadyWait::AuthenticationError(message)) => {
                    self.retry_authentication(message).await?;
                    continue;
                }
                Ok(ReadyWait::Failed(e)) => return Err(e),
                Ok(ReadyWait::Closed) => {
                    return Err(DeviceError::InitializationError(
                        "SDK event stream closed before ready".to_string(),
                    ))
                }
            }
        }
    }

    fn install_sdk(&self, generation: u64, sdk: Arc<dyn PlaybackSdk>) -> bool {
        let mut state = self.lock();
        if !self.is_current(generation) {
            return false;
        }
        state.sdk = Some(sdk);
        true
    }

    /// Clear the credential, refresh it, and allow one more pass
    async fn retry_authentication(&self, message: String) -> Result<(), DeviceError> {
        let attempt = self
            .budget
            .try_begin(RecoveryCause::Authentication)
            .map_err(|_| DeviceError::AuthenticationError(message.clone()))?;

        warn!(attempt, error = %message, "SDK rejected credential, refreshing and retrying");
        self.tokens.clear_cache();
        self.tokens.refresh().await?;
        Ok(())
    }

    /// `Verifying → Ready`, verification failure flags the session degraded
    async fn confirm_ready(self: &Arc<Self>, generation: u64, device_id: String) {
        {
            let mut state = self.lock();
            if !self.is_current(generation) {
                return;
            }
            if let Some(grace) = state.grace.take() {
                grace.handle.abort();
            }
            state.device_id = Some(device_id.clone());
            self.transition(&mut state, LifecycleState::Verifying);
        }

        let verification = self.verify_and_transfer(&device_id).await;

        {
            let mut state = self.lock();
            if !self.is_current(generation) || state.lifecycle != LifecycleState::Verifying {
                return;
            }
            state.degraded = verification.is_err();
            state.consecutive_failures = 0;
            self.transition(&mut state, LifecycleState::Ready);
        }
        self.budget.reset();

        if let Err(reason) = verification {
            warn!(device_id = %device_id, reason = %reason, "Device verification failed, continuing degraded");
            self.events.emit_lossy(JukeboxEvent::DeviceVerificationFailed {
                device_id,
                reason,
                timestamp: Utc::now(),
            });
            self.recovery.signal(RecoveryCause::VerificationFailed);
        }
    }

    /// Device is listed and unrestricted, then (optionally) receives playback
    async fn verify_and_transfer(&self, device_id: &str) -> Result<(), String> {
        let devices = tokio::time::timeout(self.config.verification_timeout(), self.player.devices())
            .await
            .map_err(|_| {
                format!(
                    "verification timed out after {}ms",
                    self.config.verification_timeout_ms
                )
            })?
            .map_err(|e| e.to_string())?;

        match devices.iter().find(|d| d.has_id(device_id)) {
            None => return Err("device not listed by remote API".to_string()),
            Some(device) if device.is_restricted => return Err("device is restricted".to_string()),
            Some(_) => {}
        }

        if self.config.transfer_on_ready {
            self.player
                .transfer_playback(device_id, false)
                .await
                .map_err(|e| format!("transfer to ready device failed: {}", e))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event pump
    // ------------------------------------------------------------------

    fn spawn_event_pump(self: &Arc<Self>, generation: u64, mut events: mpsc::Receiver<SdkEvent>) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.is_current(generation) || inner.lock().lifecycle == LifecycleState::Error {
                    break;
                }
                inner.handle_event(generation, event).await;
            }
            debug!("SDK event pump stopped");
        });

        let mut state = self.lock();
        if let Some(previous) = state.pump.replace(task.abort_handle()) {
            previous.abort();
        }
    }

    async fn handle_event(self: &Arc<Self>, generation: u64, event: SdkEvent) {
        match event {
            SdkEvent::Ready { device_id } => self.on_ready_event(generation, device_id).await,
            SdkEvent::NotReady { device_id } => self.on_not_ready(generation, device_id),
            SdkEvent::StateChanged(player_state) => self.on_state_changed(player_state),
            SdkEvent::PlaybackError(message) => {
                let (failures, ready) = {
                    let mut state = self.lock();
                    state.consecutive_failures += 1;
                    (state.consecutive_failures, state.lifecycle == LifecycleState::Ready)
                };
                warn!(failures, error = %message, "Playback error reported by SDK");
                if ready && failures == self.config.max_consecutive_failures {
                    self.recovery.signal(RecoveryCause::PlaybackErrors);
                }
            }
            SdkEvent::AccountError(message) => {
                self.fail(DeviceError::AccountError(message)).await;
            }
            SdkEvent::InitializationError(message) => {
                self.fail(DeviceError::InitializationError(message)).await;
            }
            SdkEvent::AuthenticationError(message) => {
                warn!(error = %message, "SDK rejected credential after ready");
                self.tokens.clear_cache();
                self.fail(DeviceError::AuthenticationError(message)).await;
                self.recovery.signal(RecoveryCause::Authentication);
            }
        }
    }

    async fn on_ready_event(self: &Arc<Self>, generation: u64, device_id: String) {
        let needs_verification = {
            let mut state = self.lock();
            let same_device = state.device_id.as_deref() == Some(device_id.as_str());
            let lifecycle = state.lifecycle;

            match lifecycle {
                LifecycleState::Ready if same_device => {
                    if let Some(grace) = state.grace.take() {
                        grace.handle.abort();
                        info!(device_id = %device_id, "Device ready again within grace window");
                    }
                    false
                }
                LifecycleState::NotReady if same_device => {
                    state.consecutive_failures = 0;
                    self.transition(&mut state, LifecycleState::Ready);
                    drop(state);
                    self.budget.reset();
                    false
                }
                LifecycleState::Ready | LifecycleState::NotReady => {
                    info!(device_id = %device_id, "SDK reported a different device id");
                    self.transition(&mut state, LifecycleState::Reconnecting)
                }
                LifecycleState::Reconnecting => true,
                other => {
                    debug!(state = %other, device_id = %device_id, "Ignoring ready event");
                    false
                }
            }
        };

        if needs_verification {
            self.confirm_ready(generation, device_id).await;
        }
    }

    fn on_not_ready(self: &Arc<Self>, generation: u64, device_id: String) {
        let mut state = self.lock();
        if state.lifecycle != LifecycleState::Ready
            || state.device_id.as_deref() != Some(device_id.as_str())
        {
            debug!(device_id = %device_id, "Ignoring not-ready event");
            return;
        }
        if state.grace.is_some() {
            return;
        }

        state.next_grace_id += 1;
        let grace_id = state.next_grace_id;
        let grace = self.config.not_ready_grace();
        let weak: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_grace_expired(generation, grace_id);
            }
        });

        debug!(device_id = %device_id, grace_ms = self.config.not_ready_grace_ms, "Device not ready, grace window started");
        state.grace = Some(GraceTimer {
            id: grace_id,
            handle: task.abort_handle(),
        });
    }

    fn on_grace_expired(&self, generation: u64, grace_id: u64) {
        {
            let mut state = self.lock();
            if !self.is_current(generation) {
                return;
            }
            match &state.grace {
                Some(grace) if grace.id == grace_id => {
                    state.grace = None;
                }
                _ => return,
            }
            if state.lifecycle != LifecycleState::Ready
                || !self.transition(&mut state, LifecycleState::NotReady)
            {
                return;
            }
        }

        warn!("Device still not ready after grace window");
        self.recovery.signal(RecoveryCause::NotReady);
    }

    fn on_state_changed(&self, player_state: Option<PlayerState>) {
        let became_inactive = {
            let mut state = self.lock();
            let was_active = state.last_player_state.is_some();
            state.last_player_state = player_state.clone();
            if player_state.as_ref().map(|s| s.is_playing).unwrap_or(false) {
                state.consecutive_failures = 0;
            }
            was_active && player_state.is_none() && state.lifecycle == LifecycleState::Ready
        };

        match player_state {
            Some(player_state) => {
                self.events.emit_lossy(JukeboxEvent::PlayerStateChanged {
                    is_playing: player_state.is_playing,
                    track_uri: player_state.item.as_ref().map(|t| t.uri.clone()),
                    position_ms: player_state.progress_ms.unwrap_or(0),
                    timestamp: Utc::now(),
                });
            }
            None if became_inactive => {
                info!("Device became inactive");
                self.recovery.signal(RecoveryCause::DeviceInactive);
            }
            None => {}
        }
    }
}

async fn wait_for_ready(events: &mut mpsc::Receiver<SdkEvent>) -> ReadyWait {
    while let Some(event) = events.recv().await {
        match event {
            SdkEvent::Ready { device_id } => return ReadyWait::Ready(device_id),
            SdkEvent::AuthenticationError(message) => return ReadyWait::AuthenticationError(message),
            SdkEvent::AccountError(message) => {
                return ReadyWait::Failed(DeviceError::AccountError(message))
            }
            SdkEvent::InitializationError(message) => {
                return ReadyWait::Failed(DeviceError::InitializationError(message))
            }
            other => debug!(event = ?other, "Ignoring SDK event before ready"),
        }
    }
    ReadyWait::Closed
}
