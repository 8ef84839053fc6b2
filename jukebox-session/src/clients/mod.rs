//! External collaborator seams
//!
//! The session engine only talks to the outside world through these traits.
//! Production implementations live beside them: [`WebApiClient`] for the
//! player and playlist endpoints, [`HttpCredentialSource`] for the token
//! endpoint, and [`HttpTrackSuggester`] for the suggestion service.

mod credentials;
mod suggester;
mod types;
mod web_api;

pub use credentials::HttpCredentialSource;
pub use suggester::HttpTrackSuggester;
pub use types::{
    ArtistRef, Device, IssuedCredential, PlayRequest, PlaybackContext, PlayerState,
    PlaylistSnapshot, PlaylistSummary, SearchDetails, SuggestedTrack, SuggestionResponse,
    TrackRef,
};
pub use web_api::WebApiClient;

use crate::error::{ApiError, SuggestionError, TokenError};
use crate::refresh::MergedSuggestionParams;
use async_trait::async_trait;
use serde::Serialize;

/// Source of bearer credentials
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<IssuedCredential, TokenError>;
}

/// Remote playback-control API
#[async_trait]
pub trait PlayerApi: Send + Sync {
    /// Current player state; `None` when nothing is active
    async fn player_state(&self) -> Result<Option<PlayerState>, ApiError>;

    async fn devices(&self) -> Result<Vec<Device>, ApiError>;

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<(), ApiError>;

    async fn play(&self, device_id: &str, request: &PlayRequest) -> Result<(), ApiError>;

    /// Resume whatever is loaded, without changing context
    async fn resume(&self, device_id: Option<&str>) -> Result<(), ApiError>;

    async fn next(&self, device_id: &str) -> Result<(), ApiError>;

    async fn pause(&self, device_id: &str) -> Result<(), ApiError>;
}

/// Remote playlist API
#[async_trait]
pub trait PlaylistApi: Send + Sync {
    async fn find_playlist_by_name(&self, name: &str) -> Result<Option<PlaylistSummary>, ApiError>;

    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistSnapshot, ApiError>;

    /// Append a track; returns the new snapshot fingerprint when reported
    async fn add_track(&self, playlist_id: &str, uri: &str) -> Result<Option<String>, ApiError>;

    /// Remove every occurrence of a track; returns the new snapshot fingerprint
    async fn remove_track(&self, playlist_id: &str, uri: &str) -> Result<Option<String>, ApiError>;
}

/// Suggestion request sent to the collaborator
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub excluded_track_ids: Vec<String>,
    pub current_track_id: Option<String>,
    pub market: String,
    pub params: MergedSuggestionParams,
}

/// Picks which track to enqueue
#[async_trait]
pub trait TrackSuggester: Send + Sync {
    async fn suggest(&self, request: &SuggestionRequest) -> Result<SuggestionResponse, SuggestionError>;
}
