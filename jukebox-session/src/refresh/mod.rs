//! Playlist Refresh Orchestrator
//!
//! Keeps the managed playlist topped up: reads the playlist and the player,
//! detects external edits through the snapshot fingerprint, evicts a stale
//! head-of-queue track, asks the suggestion service for one track when few
//! remain, appends it, and nudges the player when that is warranted.
//!
//! At most one run is in flight; a concurrent call returns
//! [`RefreshStatus::AlreadyInProgress`] immediately without touching state.
//! The whole run and each remote step are bounded by timeouts, and every
//! failure is folded into a [`RefreshResult`].

mod params;
mod result;
mod upcoming;

pub use params::{
    current_year, validate_params, FieldError, MergedSuggestionParams, SuggestionParams,
};
pub use result::{RefreshDiagnostics, RefreshResult, RefreshStatus};
pub use upcoming::upcoming_tracks;

use crate::clients::{
    PlayerApi, PlayerState, PlaylistApi, PlaylistSnapshot, SuggestedTrack, SuggestionRequest,
    TrackSuggester,
};
use crate::config::RefreshConfig;
use crate::db::settings;
use crate::error::{ApiError, Result};
use crate::recovery::RecoveryHandle;
use chrono::Utc;
use jukebox_common::events::{EventBus, JukeboxEvent, LastSuggestedTrack, RecoveryCause};
use jukebox_common::InFlight;
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

type StepResult<T> = std::result::Result<T, (RefreshStatus, String)>;

/// Orchestrator-owned state
#[derive(Default)]
struct RefreshState {
    playlist_id: Option<String>,
    last_snapshot: Option<String>,
    last_suggested: Option<LastSuggestedTrack>,
    last_suggested_hydrated: bool,
    saved_params: Option<SuggestionParams>,
}

pub struct PlaylistRefresher {
    playlists: Arc<dyn PlaylistApi>,
    player: Arc<dyn PlayerApi>,
    suggester: Arc<dyn TrackSuggester>,
    recovery: RecoveryHandle,
    events: EventBus,
    db: Option<Pool<Sqlite>>,
    config: RefreshConfig,
    playlist_name: String,
    market: String,
    in_flight: InFlight,
    state: Mutex<RefreshState>,
}

impl PlaylistRefresher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        playlists: Arc<dyn PlaylistApi>,
        player: Arc<dyn PlayerApi>,
        suggester: Arc<dyn TrackSuggester>,
        recovery: RecoveryHandle,
        events: EventBus,
        db: Option<Pool<Sqlite>>,
        config: RefreshConfig,
        playlist_name: impl Into<String>,
        market: impl Into<String>,
    ) -> Self {
        Self {
            playlists,
            player,
            suggester,
            recovery,
            events,
            db,
            config,
            playlist_name: playlist_name.into(),
            market: market.into(),
            in_flight: InFlight::new(),
            state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.is_busy()
    }

    /// Run one refresh
    ///
    /// `force` marks the result as requiring a client-side refresh even if
    /// nothing changed; `params` are the explicit call-time suggestion
    /// parameters (highest merge priority).
    pub async fn refresh(&self, force: bool, params: Option<SuggestionParams>) -> RefreshResult {
        let Some(_permit) = self.in_flight.try_acquire() else {
            info!("Refresh requested while another run is in flight");
            return RefreshResult::already_in_progress();
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.operation_timeout(), self.run(force, params)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.config.operation_timeout_ms, "Refresh timed out");
                RefreshResult::timed_out(self.config.operation_timeout_ms)
            }
        };

        info!(
            success = result.success,
            status = ?result.status,
            added = result.diagnostics.added_track,
            removed = result.diagnostics.removed_track,
            changed = result.diagnostics.has_playlist_changed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refresh finished: {}",
            result.message
        );
        self.events.emit_lossy(JukeboxEvent::PlaylistRefreshed {
            success: result.success,
            message: result.message.clone(),
            added_track: result.diagnostics.added_track,
            removed_track: result.diagnostics.removed_track,
            timestamp: Utc::now(),
        });
        result
    }

    /// Most recently enqueued suggestion, re-read from storage after a restart
    pub async fn last_suggested_track(&self) -> Option<LastSuggestedTrack> {
        {
            let state = self.lock();
            if state.last_suggested.is_some() || state.last_suggested_hydrated || self.db.is_none() {
                return state.last_suggested.clone();
            }
        }

        let loaded = match &self.db {
            Some(db) => settings::load_last_suggested_track(db).await.unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load last suggested track");
                None
            }),
            None => None,
        };

        let mut state = self.lock();
        state.last_suggested_hydrated = true;
        if state.last_suggested.is_none() {
            state.last_suggested = loaded;
        }
        state.last_suggested.clone()
    }

    /// Last user parameters saved through [`save_params`](Self::save_params)
    pub async fn saved_params(&self) -> Option<SuggestionParams> {
        let cached = self.lock().saved_params.clone();
        if cached.is_some() {
            return cached;
        }
        let db = self.db.as_ref()?;
        match settings::load_suggestion_params(db).await {
            Ok(loaded) => {
                let mut state = self.lock();
                if state.saved_params.is_none() {
                    state.saved_params = loaded;
                }
                state.saved_params.clone()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load saved suggestion parameters");
                None
            }
        }
    }

    pub async fn save_params(&self, params: SuggestionParams) -> Result<()> {
        if let Some(db) = &self.db {
            settings::save_suggestion_params(db, &params).await?;
        }
        self.lock().saved_params = Some(params);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(&self, force: bool, explicit: Option<SuggestionParams>) -> RefreshResult {
        let mut diagnostics = RefreshDiagnostics::default();
        let outcome = self.run_steps(explicit.as_ref(), &mut diagnostics).await;

        let mut result = match outcome {
            Ok(message) => RefreshResult::completed(message, diagnostics),
            Err((status, message)) => RefreshResult::failed(status, message, diagnostics),
        };
        result.force_refresh = force || result.diagnostics.has_playlist_changed;
        result.player_state_refresh = result.diagnostics.resumed_playback;
        result
    }

    async fn run_steps(
        &self,
        explicit: Option<&SuggestionParams>,
        diagnostics: &mut RefreshDiagnostics,
    ) -> StepResult<String> {
        // 1. managed playlist and its fingerprint
        let playlist = self.fetch_playlist().await?;
        let playlist_id = playlist.id.clone();

        // 2. external change detection
        let changed = self.observe_snapshot(&playlist.snapshot_id);
        diagnostics.has_playlist_changed = changed;
        if changed {
            info!(snapshot_id = %playlist.snapshot_id, "Playlist changed externally");
            self.events.emit_lossy(JukeboxEvent::PlaylistChangedExternally {
                snapshot_id: playlist.snapshot_id.clone(),
                timestamp: Utc::now(),
            });
        }

        // 3. what is playing
        let player_state = self.fetch_player_state().await?;
        let is_playing = player_state.as_ref().map(|s| s.is_playing).unwrap_or(false);
        let current = player_state
            .as_ref()
            .and_then(|s| s.current_track_id())
            .map(str::to_string);
        diagnostics.is_playing = is_playing;
        diagnostics.current_track_id = current.clone();

        // 4. upcoming view, taken from the playlist as fetched
        let track_ids = playlist.track_ids();
        let upcoming = upcoming_tracks(&track_ids, current.as_deref()).to_vec();
        diagnostics.total_tracks = track_ids.len();
        diagnostics.upcoming_tracks_count = upcoming.len();
        diagnostics.playlist_track_ids = track_ids.clone();
        diagnostics.upcoming_track_ids = upcoming.clone();
        debug!(
            total = track_ids.len(),
            upcoming = upcoming.len(),
            current = ?current,
            "Computed upcoming tracks"
        );

        let saved = self.step_saved_params().await?;
        let params = MergedSuggestionParams::merge(explicit, saved.as_ref(), current_year());

        // 5. evict the head when the queue is long enough
        if track_ids.len() > params.songs_between_repeats as usize {
            diagnostics.removed_track = self.evict_head(&playlist, current.as_deref()).await;
        }

        // 6. enqueue one suggestion when few tracks remain
        let enqueue = if upcoming.len() <= self.config.upcoming_threshold {
            self.enqueue_suggestion(&playlist_id, &track_ids, current, params, diagnostics)
                .await
                .map(|_| "Added suggested track to playlist".to_string())
        } else {
            Ok("Enough tracks remaining".to_string())
        };

        // 7 + 8. nudge the player at most once
        let should_resume = is_playing
            && (diagnostics.added_track
                || (changed && upcoming.len() <= self.config.resume_threshold));
        if should_resume {
            let device_id = player_state.as_ref().and_then(|s| s.device_id()).map(str::to_string);
            self.resume(device_id.as_deref(), diagnostics).await;
        }

        enqueue
    }

    async fn step<T>(&self, name: &str, call: impl Future<Output = std::result::Result<T, ApiError>>) -> StepResult<T> {
        match tokio::time::timeout(self.config.step_timeout(), call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(api_failure(name, e)),
            Err(_) => Err(self.step_timed_out(name)),
        }
    }

    async fn step_saved_params(&self) -> StepResult<Option<SuggestionParams>> {
        tokio::time::timeout(self.config.step_timeout(), self.saved_params())
            .await
            .map_err(|_| self.step_timed_out("load saved params"))
    }

    fn step_timed_out(&self, name: &str) -> (RefreshStatus, String) {
        (
            RefreshStatus::TimedOut,
            format!("{} timed out after {}ms", name, self.config.step_timeout_ms),
        )
    }

    async fn fetch_playlist(&self) -> StepResult<PlaylistSnapshot> {
        let cached = self.lock().playlist_id.clone();
        let playlist_id = match cached {
            Some(id) => id,
            None => {
                let found = self
                    .step("find playlist", self.playlists.find_playlist_by_name(&self.playlist_name))
                    .await?;
                let Some(summary) = found else {
                    return Err(self.playlist_not_found());
                };
                info!(playlist_id = %summary.id, name = %self.playlist_name, "Located managed playlist");
                self.lock().playlist_id = Some(summary.id.clone());
                summary.id
            }
        };

        match tokio::time::timeout(self.config.step_timeout(), self.playlists.playlist(&playlist_id)).await {
            Ok(Err(ApiError::NotFound(_))) => {
                self.lock().playlist_id = None;
                Err(self.playlist_not_found())
            }
            Ok(Ok(playlist)) => Ok(playlist),
            Ok(Err(e)) => Err(api_failure("fetch playlist", e)),
            Err(_) => Err(self.step_timed_out("fetch playlist")),
        }
    }

    fn playlist_not_found(&self) -> (RefreshStatus, String) {
        (
            RefreshStatus::PlaylistNotFound,
            format!("Playlist '{}' not found", self.playlist_name),
        )
    }

    /// Record the fingerprint; true if it differs from the last one seen
    fn observe_snapshot(&self, snapshot_id: &str) -> bool {
        let mut state = self.lock();
        let previous = state.last_snapshot.replace(snapshot_id.to_string());
        matches!(previous, Some(previous) if previous != snapshot_id)
    }

    /// Our own edits produce new fingerprints too; remember them
    fn remember_snapshot(&self, snapshot_id: Option<String>) {
        if let Some(snapshot_id) = snapshot_id {
            self.lock().last_snapshot = Some(snapshot_id);
        }
    }

    /// Authorization failure is a hard stop; anything else reads as idle
    async fn fetch_player_state(&self) -> StepResult<Option<PlayerState>> {
        match self.step("fetch player state", self.player.player_state()).await {
            Ok(state) => Ok(state),
            Err((RefreshStatus::AuthorizationFailed, message)) => {
                Err((RefreshStatus::AuthorizationFailed, message))
            }
            Err((_, message)) => {
                warn!(reason = %message, "Player state unavailable, treating as not playing");
                Ok(None)
            }
        }
    }

    async fn evict_head(&self, playlist: &PlaylistSnapshot, current: Option<&str>) -> bool {
        let Some(head) = playlist.tracks.first() else {
            return false;
        };
        let head_id = head.key().to_string();
        if current == Some(head_id.as_str()) {
            debug!(track_id = %head_id, "Head track is playing, not evicting");
            return false;
        }

        match self.step("remove track", self.playlists.remove_track(&playlist.id, &head.uri)).await {
            Ok(snapshot_id) => {
                info!(track_id = %head_id, "Evicted head-of-queue track");
                self.remember_snapshot(snapshot_id);
                true
            }
            Err((_, message)) => {
                warn!(track_id = %head_id, reason = %message, "Failed to evict head track");
                false
            }
        }
    }

    async fn enqueue_suggestion(
        &self,
        playlist_id: &str,
        track_ids: &[String],
        current: Option<String>,
        params: MergedSuggestionParams,
        diagnostics: &mut RefreshDiagnostics,
    ) -> StepResult<()> {
        let mut excluded = track_ids.to_vec();
        excluded.sort();
        excluded.dedup();

        let request = SuggestionRequest {
            excluded_track_ids: excluded,
            current_track_id: current,
            market: self.market.clone(),
            params,
        };

        let response = match tokio::time::timeout(self.config.step_timeout(), self.suggester.suggest(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err((RefreshStatus::Unknown, format!("Track suggestion failed: {}", e))),
            Err(_) => return Err(self.step_timed_out("track suggestion")),
        };
        diagnostics.search_details = Some(response.search_details.clone());

        let Some(track) = response.track else {
            return Err((
                RefreshStatus::NoSuggestionFound,
                "No suitable track found after trying all genres".to_string(),
            ));
        };

        let snapshot_id = match self.step("add track", self.playlists.add_track(playlist_id, &track.uri)).await {
            Ok(snapshot_id) => snapshot_id,
            Err((RefreshStatus::AuthorizationFailed, message)) => {
                return Err((RefreshStatus::AuthorizationFailed, message))
            }
            Err((status, message)) => {
                let status = match status {
                    RefreshStatus::TimedOut => RefreshStatus::TimedOut,
                    _ => RefreshStatus::EnqueueFailed,
                };
                return Err((status, format!("Failed to add suggested track: {}", message)));
            }
        };

        self.remember_snapshot(snapshot_id);
        diagnostics.added_track = true;
        info!(track_id = %track.id, uri = %track.uri, "Enqueued suggested track");

        let genre = response.search_details.genres_tried.last().cloned();
        self.record_suggestion(&track, genre).await;
        Ok(())
    }

    async fn record_suggestion(&self, track: &SuggestedTrack, genre: Option<String>) {
        let suggested = LastSuggestedTrack {
            name: track.name.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            uri: track.uri.clone(),
            popularity: track.popularity,
            duration_ms: track.duration_ms,
            preview_url: track.preview_url.clone(),
            genres: genre.into_iter().collect(),
        };

        {
            let mut state = self.lock();
            state.last_suggested = Some(suggested.clone());
            state.last_suggested_hydrated = true;
        }

        if let Some(db) = &self.db {
            if let Err(e) = settings::save_last_suggested_track(db, &suggested).await {
                warn!(error = %e, "Failed to persist last suggested track");
            }
        }

        self.events.emit_lossy(JukeboxEvent::TrackSuggested {
            track: suggested,
            timestamp: Utc::now(),
        });
    }

    async fn resume(&self, device_id: Option<&str>, diagnostics: &mut RefreshDiagnostics) {
        match self.step("resume playback", self.player.resume(device_id)).await {
            Ok(()) => {
                debug!(device_id = ?device_id, "Resumed playback after refresh");
                diagnostics.resumed_playback = true;
            }
            Err((_, message)) => {
                warn!(reason = %message, "Resume after refresh failed");
                self.recovery.signal(RecoveryCause::PlaybackControlFailed);
            }
        }
    }
}

fn api_failure(name: &str, error: ApiError) -> (RefreshStatus, String) {
    match error {
        ApiError::Unauthorized(message) => (
            RefreshStatus::AuthorizationFailed,
            format!("{}: authorization failed: {}", name, message),
        ),
        other => (RefreshStatus::Unknown, format!("{} failed: {}", name, other)),
    }
}
