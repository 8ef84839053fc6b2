//! Wire types shared by the remote API clients and their callers

use serde::{Deserialize, Serialize};

/// Playback device as listed by the remote API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(rename = "type", default)]
    pub device_type: Option<String>,
}

impl Device {
    pub fn has_id(&self, device_id: &str) -> bool {
        self.id.as_deref() == Some(device_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtistRef {
    pub name: String,
}

/// Track reference inside player state or a playlist
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackRef {
    /// Absent for local files
    #[serde(default)]
    pub id: Option<String>,
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
}

impl TrackRef {
    /// Track id, falling back to the uri for id-less tracks
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.uri)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackContext {
    pub uri: String,
}

/// Current player state (`GET /me/player`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerState {
    #[serde(default)]
    pub device: Option<Device>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub item: Option<TrackRef>,
    #[serde(default)]
    pub context: Option<PlaybackContext>,
}

impl PlayerState {
    pub fn device_id(&self) -> Option<&str> {
        self.device.as_ref().and_then(|d| d.id.as_deref())
    }

    pub fn is_on_device(&self, device_id: &str) -> bool {
        self.device_id() == Some(device_id)
    }

    pub fn current_track_id(&self) -> Option<&str> {
        self.item.as_ref().map(|t| t.key())
    }
}

/// Playlist as listed among the account's playlists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

/// Playlist contents with its change fingerprint
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlaylistSnapshot {
    pub id: String,
    pub snapshot_id: String,
    pub tracks: Vec<TrackRef>,
}

impl PlaylistSnapshot {
    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.key().to_string()).collect()
    }
}

/// Start or resume playback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayRequest {
    pub context_uri: Option<String>,
    pub offset_uri: Option<String>,
    pub position_ms: Option<u64>,
}

/// Credential as issued by the credential source
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IssuedCredential {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    /// Lifetime in seconds
    #[serde(alias = "expiresIn")]
    pub expires_in: u64,
}

/// Track returned by the suggestion collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedTrack {
    pub id: String,
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub popularity: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub preview_url: Option<String>,
}

/// How the suggestion collaborator arrived at its answer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchDetails {
    #[serde(default)]
    pub genres_tried: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionResponse {
    #[serde(default)]
    pub track: Option<SuggestedTrack>,
    #[serde(default)]
    pub search_details: SearchDetails,
}
