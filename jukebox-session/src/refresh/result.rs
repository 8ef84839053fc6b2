//! Refresh outcome types

use crate::clients::SearchDetails;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome taxonomy of a refresh run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Completed,
    /// Advisory: another run holds the in-flight guard
    AlreadyInProgress,
    PlaylistNotFound,
    AuthorizationFailed,
    NoSuggestionFound,
    EnqueueFailed,
    TimedOut,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshDiagnostics {
    pub current_track_id: Option<String>,
    pub total_tracks: usize,
    pub upcoming_tracks_count: usize,
    pub playlist_track_ids: Vec<String>,
    pub upcoming_track_ids: Vec<String>,
    pub removed_track: bool,
    pub added_track: bool,
    pub has_playlist_changed: bool,
    pub is_playing: bool,
    pub resumed_playback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_details: Option<SearchDetails>,
}

/// Structured result; refresh never fails past its public boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResult {
    pub success: bool,
    pub message: String,
    pub status: RefreshStatus,
    pub timestamp: DateTime<Utc>,
    pub force_refresh: bool,
    pub player_state_refresh: bool,
    pub diagnostics: RefreshDiagnostics,
}

impl RefreshResult {
    pub fn completed(message: impl Into<String>, diagnostics: RefreshDiagnostics) -> Self {
        Self::new(true, RefreshStatus::Completed, message, diagnostics)
    }

    pub fn failed(status: RefreshStatus, message: impl Into<String>, diagnostics: RefreshDiagnostics) -> Self {
        Self::new(false, status, message, diagnostics)
    }

    pub fn already_in_progress() -> Self {
        Self::failed(
            RefreshStatus::AlreadyInProgress,
            "Refresh operation already in progress",
            RefreshDiagnostics::default(),
        )
    }

    pub fn timed_out(after_ms: u64) -> Self {
        Self::failed(
            RefreshStatus::TimedOut,
            format!("Refresh timed out after {}ms", after_ms),
            RefreshDiagnostics::default(),
        )
    }

    fn new(success: bool, status: RefreshStatus, message: impl Into<String>, diagnostics: RefreshDiagnostics) -> Self {
        Self {
            success,
            message: message.into(),
            status,
            timestamp: Utc::now(),
            force_refresh: false,
            player_state_refresh: false,
            diagnostics,
        }
    }

    pub fn added_track(&self) -> bool {
        self.diagnostics.added_track
    }
}
