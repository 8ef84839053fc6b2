//! HTTP client for the track-suggestion collaborator

use super::{SuggestionRequest, SuggestionResponse, TrackSuggester};
use crate::error::SuggestionError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// POSTs the suggestion request as JSON and decodes `{ track, searchDetails }`
pub struct HttpTrackSuggester {
    client: reqwest::Client,
    url: String,
}

impl HttpTrackSuggester {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SuggestionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SuggestionError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TrackSuggester for HttpTrackSuggester {
    async fn suggest(&self, request: &SuggestionRequest) -> Result<SuggestionResponse, SuggestionError> {
        debug!(
            excluded = request.excluded_track_ids.len(),
            genres = ?request.params.genres,
            "Requesting track suggestion"
        );

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| SuggestionError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(SuggestionError::Unavailable(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| SuggestionError::InvalidResponse(e.to_string()))
    }
}
