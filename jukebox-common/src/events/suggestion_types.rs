//! Track suggestion type definitions

use serde::{Deserialize, Serialize};

/// Projection of the most recently enqueued suggestion
///
/// Served by the "last suggested track" query and persisted so it survives
/// restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastSuggestedTrack {
    pub name: String,
    pub artist: String,
    pub album: String,
    pub uri: String,
    pub popularity: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
}
