//! Token Lifecycle Manager
//!
//! Acquires and caches the bearer credential, refreshes it ahead of expiry,
//! and keeps exactly one refresh in flight at a time.
//!
//! Each cached [`Credential`] is superseded, never mutated. The proactive
//! refresh timer belongs to the credential that armed it: storing a new
//! credential aborts the previous timer before arming the next one, and
//! [`TokenManager::clear_cache`] aborts it outright.
//!
//! A refresh that started before `clear_cache` may still complete. Its result
//! is returned to the callers that were waiting on it, but it is only written
//! to the cache if the cache generation is unchanged.

use crate::clients::CredentialSource;
use crate::config::TokenConfig;
use crate::error::TokenError;
use chrono::{DateTime, Utc};
use jukebox_common::events::{EventBus, JukeboxEvent, TokenHealth};
use jukebox_common::SingleFlight;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cached bearer credential
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
    /// Wall-clock expiry, for reporting
    pub expires_at_utc: DateTime<Utc>,
}

impl Credential {
    fn lifetime(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.issued_at)
    }

    /// Refresh margin clamped to half the lifetime
    ///
    /// A margin longer than the lifetime would make every credential stale
    /// the moment it is issued.
    pub fn effective_margin(&self, configured: Duration) -> Duration {
        configured.min(self.lifetime() / 2)
    }

    /// Whether `now` is inside the refresh margin
    pub fn needs_refresh(&self, now: Instant, margin: Duration) -> bool {
        now + self.effective_margin(margin) >= self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Token status snapshot for health and status reporting
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub health: TokenHealth,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_in_flight: bool,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct TokenCache {
    credential: Option<Credential>,
    timer: Option<AbortHandle>,
    last_error: Option<String>,
}

struct TokenInner {
    source: Arc<dyn CredentialSource>,
    config: TokenConfig,
    events: EventBus,
    cache: Mutex<TokenCache>,
    flight: SingleFlight<Result<Credential, TokenError>>,
    generation: AtomicU64,
}

/// Cloneable handle to the process-wide credential cache
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenInner>,
}

impl TokenManager {
    pub fn new(source: Arc<dyn CredentialSource>, config: TokenConfig, events: EventBus) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                source,
                config,
                events,
                cache: Mutex::new(TokenCache::default()),
                flight: SingleFlight::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current valid token, refreshing first if inside the safety margin
    pub async fn get_token(&self) -> Result<String, TokenError> {
        let margin = self.inner.config.refresh_margin();
        {
            let cache = self.inner.lock();
            if let Some(credential) = &cache.credential {
                if !credential.needs_refresh(Instant::now(), margin) {
                    return Ok(credential.token.clone());
                }
            }
        }

        debug!("Cached credential missing or near expiry, refreshing");
        self.refresh().await.map(|credential| credential.token)
    }

    /// Fetch a new credential, joining the in-flight refresh if there is one
    pub async fn refresh(&self) -> Result<Credential, TokenError> {
        TokenInner::refresh(&self.inner).await
    }

    /// Invalidate the cached credential and cancel its timer
    ///
    /// The next `get_token` performs a fresh fetch.
    pub fn clear_cache(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.flight.forget();

        let mut cache = self.inner.lock();
        cache.credential = None;
        if let Some(timer) = cache.timer.take() {
            timer.abort();
        }
        info!("Credential cache cleared");
    }

    pub fn status(&self) -> TokenStatus {
        let cache = self.inner.lock();
        let now = Instant::now();

        let health = match &cache.credential {
            Some(credential) if !credential.is_expired(now) => TokenHealth::Valid,
            _ if cache.last_error.is_some() => TokenHealth::Error,
            _ => TokenHealth::Expired,
        };

        TokenStatus {
            health,
            expires_at: cache.credential.as_ref().map(|c| c.expires_at_utc),
            refresh_in_flight: self.inner.flight.is_pending(),
            last_error: cache.last_error.clone(),
        }
    }

    /// Whether a proactive refresh timer is armed
    pub fn timer_armed(&self) -> bool {
        self.inner
            .lock()
            .timer
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Stop the proactive timer (shutdown)
    pub fn shutdown(&self) {
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.abort();
        }
    }
}

impl TokenInner {
    fn lock(&self) -> MutexGuard<'_, TokenCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn refresh(this: &Arc<Self>) -> Result<Credential, TokenError> {
        let inner = Arc::clone(this);
        this.flight
            .run(move || async move {
                let generation = inner.generation.load(Ordering::Acquire);
                inner.fetch_with_retry(generation).await
            })
            .await
    }

    async fn fetch_with_retry(self: Arc<Self>, generation: u64) -> Result<Credential, TokenError> {
        let delays = self.config.retry_delays();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.source.fetch().await {
                Ok(issued) => {
                    let now = Instant::now();
                    let lifetime = Duration::from_secs(issued.expires_in);
                    let credential = Credential {
                        token: issued.access_token,
                        issued_at: now,
                        expires_at: now + lifetime,
                        expires_at_utc: Utc::now()
                            + chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::zero()),
                    };

                    self.store(generation, credential.clone());
                    return Ok(credential);
                }
                Err(e) => {
                    let Some(delay) = delays.get(attempt - 1).copied() else {
                        warn!(attempt, error = %e, "Credential refresh failed, giving up");
                        self.lock().last_error = Some(e.to_string());
                        self.events.emit_lossy(JukeboxEvent::TokenRefreshFailed {
                            reason: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        if self.generation.load(Ordering::Acquire) == generation {
                            Self::arm_timer(&self, self.config.failure_rearm());
                        }
                        return Err(e);
                    };

                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Credential refresh failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Cache `credential` if no `clear_cache` happened since the refresh began
    fn store(self: &Arc<Self>, generation: u64, credential: Credential) {
        if self.generation.load(Ordering::Acquire) != generation {
            debug!("Discarding credential from a superseded refresh");
            return;
        }

        let margin = credential.effective_margin(self.config.refresh_margin());
        let delay = credential
            .expires_at
            .saturating_duration_since(Instant::now())
            .saturating_sub(margin);
        let expires_at = credential.expires_at_utc;

        {
            let mut cache = self.lock();
            cache.credential = Some(credential);
            cache.last_error = None;
        }
        Self::arm_timer(self, delay);

        info!(refresh_in_secs = delay.as_secs(), "Credential refreshed");
        self.events.emit_lossy(JukeboxEvent::TokenRefreshed {
            expires_at,
            timestamp: Utc::now(),
        });
    }

    /// Replace the proactive refresh timer
    fn arm_timer(this: &Arc<Self>, delay: Duration) {
        let weak = Arc::downgrade(this);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            debug!("Proactive credential refresh");
            if let Err(e) = TokenInner::refresh(&inner).await {
                warn!(error = %e, "Proactive credential refresh failed");
            }
        });

        let mut cache = this.lock();
        if let Some(previous) = cache.timer.replace(task.abort_handle()) {
            previous.abort();
        }
    }
}
