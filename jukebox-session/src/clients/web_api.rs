//! Remote Web API client
//!
//! Implements [`PlayerApi`] and [`PlaylistApi`] over reqwest. Every request is
//! signed with the current credential from the [`TokenManager`]; a 401 clears
//! the credential cache so the next call refreshes. Transport failures and 5xx
//! answers are reported to the [`ConnectionTracker`], everything else counts
//! as a successful round trip. Idempotent GETs go through a
//! [`RequestCoalescer`] keyed by URL; any mutating call flushes it.

use super::{
    Device, PlayRequest, PlayerApi, PlayerState, PlaylistApi, PlaylistSnapshot, PlaylistSummary,
    TrackRef,
};
use crate::error::ApiError;
use crate::recovery::ConnectionTracker;
use crate::token::TokenManager;
use async_trait::async_trait;
use jukebox_common::RequestCoalescer;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type GetResult = Result<Option<Value>, ApiError>;

/// Upper bound on playlist pages followed in one read
const MAX_PAGES: usize = 50;

/// Shared request plumbing, cloned into coalesced futures
struct Transport {
    client: reqwest::Client,
    tokens: TokenManager,
    connection: Arc<ConnectionTracker>,
}

impl Transport {
    async fn send(&self, method: Method, url: &str, body: Option<Value>) -> GetResult {
        let token = self
            .tokens
            .get_token()
            .await
            .map_err(|e| ApiError::Credential(e.to_string()))?;
        self.send_with_token(method, url, body, &token).await
    }

    async fn send_with_token(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        token: &str,
    ) -> GetResult {
        debug!(method = %method, url = %url, "Web API request");

        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.connection.record_failure();
                return Err(ApiError::Network(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        if status >= 500 {
            self.connection.record_failure();
        } else {
            self.connection.record_success();
        }

        match status {
            204 => Ok(None),
            200..=299 => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| ApiError::Network(e.to_string()))?;
                if text.trim().is_empty() {
                    return Ok(None);
                }
                serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|e| ApiError::Parse(e.to_string()))
            }
            401 => {
                warn!(url = %url, "Credential rejected by Web API, clearing cache");
                self.tokens.clear_cache();
                Err(ApiError::Unauthorized(error_message(response).await))
            }
            404 => Err(ApiError::NotFound(error_message(response).await)),
            429 => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                Err(ApiError::RateLimited { retry_after_secs })
            }
            _ => Err(ApiError::Status {
                status,
                message: error_message(response).await,
            }),
        }
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text)
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Parse(e.to_string()))
}

#[derive(Deserialize)]
struct DevicesPage {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Deserialize)]
struct PlaylistsPage {
    #[serde(default)]
    items: Vec<PlaylistSummary>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    #[serde(default)]
    track: Option<TrackRef>,
}

#[derive(Deserialize)]
struct TracksPage {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistBody {
    id: String,
    snapshot_id: String,
    tracks: TracksPage,
}

#[derive(Deserialize)]
struct SnapshotBody {
    #[serde(default)]
    snapshot_id: Option<String>,
}

/// reqwest-backed player and playlist client
pub struct WebApiClient {
    transport: Arc<Transport>,
    base_url: String,
    gets: RequestCoalescer<String, GetResult>,
}

impl WebApiClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        coalesce_ttl: Duration,
        coalesce_max_entries: usize,
        tokens: TokenManager,
        connection: Arc<ConnectionTracker>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            transport: Arc::new(Transport {
                client,
                tokens,
                connection,
            }),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            gets: RequestCoalescer::new(coalesce_ttl, coalesce_max_entries),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Coalesced GET of an absolute URL
    async fn get(&self, url: String) -> GetResult {
        let transport = Arc::clone(&self.transport);
        let key = url.clone();
        let result = self
            .gets
            .get_or_run(key.clone(), move || async move {
                transport.send(Method::GET, &url, None).await
            })
            .await;

        if result.is_err() {
            self.gets.invalidate(&key);
        }
        result
    }

    /// Mutating request; flushes coalesced reads
    async fn mutate(&self, method: Method, url: String, body: Option<Value>) -> GetResult {
        let result = self.transport.send(method, &url, body).await;
        self.gets.clear();
        result
    }

    /// Device list signed with an explicit credential
    ///
    /// Used by the playback SDK to validate the credential it was handed.
    pub async fn devices_with_token(&self, token: &str) -> Result<Vec<Device>, ApiError> {
        let url = self.url("/me/player/devices");
        let body = self
            .transport
            .send_with_token(Method::GET, &url, None, token)
            .await?;
        match body {
            Some(value) => Ok(decode::<DevicesPage>(value)?.devices),
            None => Ok(Vec::new()),
        }
    }

    fn device_query(device_id: Option<&str>) -> String {
        device_id
            .map(|id| format!("?device_id={}", id))
            .unwrap_or_default()
    }
}

#[async_trait]
impl PlayerApi for WebApiClient {
    async fn player_state(&self) -> Result<Option<PlayerState>, ApiError> {
        match self.get(self.url("/me/player")).await? {
            Some(value) => decode(value).map(Some),
            None => Ok(None),
        }
    }

    async fn devices(&self) -> Result<Vec<Device>, ApiError> {
        match self.get(self.url("/me/player/devices")).await? {
            Some(value) => Ok(decode::<DevicesPage>(value)?.devices),
            None => Ok(Vec::new()),
        }
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<(), ApiError> {
        let body = json!({ "device_ids": [device_id], "play": play });
        self.mutate(Method::PUT, self.url("/me/player"), Some(body)).await?;
        Ok(())
    }

    async fn play(&self, device_id: &str, request: &PlayRequest) -> Result<(), ApiError> {
        let mut body = serde_json::Map::new();
        if let Some(context_uri) = &request.context_uri {
            body.insert("context_uri".to_string(), json!(context_uri));
        }
        if let Some(offset_uri) = &request.offset_uri {
            body.insert("offset".to_string(), json!({ "uri": offset_uri }));
        }
        if let Some(position_ms) = request.position_ms {
            body.insert("position_ms".to_string(), json!(position_ms));
        }

        let url = self.url(&format!("/me/player/play{}", Self::device_query(Some(device_id))));
        self.mutate(Method::PUT, url, Some(Value::Object(body))).await?;
        Ok(())
    }

    async fn resume(&self, device_id: Option<&str>) -> Result<(), ApiError> {
        let url = self.url(&format!("/me/player/play{}", Self::device_query(device_id)));
        self.mutate(Method::PUT, url, None).await?;
        Ok(())
    }

    async fn next(&self, device_id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("/me/player/next{}", Self::device_query(Some(device_id))));
        self.mutate(Method::POST, url, None).await?;
        Ok(())
    }

    async fn pause(&self, device_id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("/me/player/pause{}", Self::device_query(Some(device_id))));
        self.mutate(Method::PUT, url, None).await?;
        Ok(())
    }
}

#[async_trait]
impl PlaylistApi for WebApiClient {
    async fn find_playlist_by_name(&self, name: &str) -> Result<Option<PlaylistSummary>, ApiError> {
        let mut next = Some(self.url("/me/playlists?limit=50"));
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            let page: PlaylistsPage = match self.get(url).await? {
                Some(value) => decode(value)?,
                None => return Ok(None),
            };

            if let Some(found) = page.items.into_iter().find(|p| p.name == name) {
                return Ok(Some(found));
            }
            if pages < MAX_PAGES {
                next = page.next;
            }
        }

        Ok(None)
    }

    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistSnapshot, ApiError> {
        let url = self.url(&format!(
            "/playlists/{}?fields=id,snapshot_id,tracks(items(track(id,uri,name,artists(name))),next)",
            playlist_id
        ));
        let body: PlaylistBody = match self.get(url).await? {
            Some(value) => decode(value)?,
            None => return Err(ApiError::NotFound(format!("playlist {}", playlist_id))),
        };

        let mut tracks: Vec<TrackRef> = body.tracks.items.into_iter().filter_map(|i| i.track).collect();
        let mut next = body.tracks.next;
        let mut pages = 1;

        while let Some(url) = next.take() {
            pages += 1;
            let page: TracksPage = match self.get(url).await? {
                Some(value) => decode(value)?,
                None => break,
            };
            tracks.extend(page.items.into_iter().filter_map(|i| i.track));
            if pages < MAX_PAGES {
                next = page.next;
            }
        }

        Ok(PlaylistSnapshot {
            id: body.id,
            snapshot_id: body.snapshot_id,
            tracks,
        })
    }

    async fn add_track(&self, playlist_id: &str, uri: &str) -> Result<Option<String>, ApiError> {
        let url = self.url(&format!("/playlists/{}/tracks", playlist_id));
        let body = self
            .mutate(Method::POST, url, Some(json!({ "uris": [uri] })))
            .await?;
        snapshot_of(body)
    }

    async fn remove_track(&self, playlist_id: &str, uri: &str) -> Result<Option<String>, ApiError> {
        let url = self.url(&format!("/playlists/{}/tracks", playlist_id));
        let body = self
            .mutate(Method::DELETE, url, Some(json!({ "tracks": [{ "uri": uri }] })))
            .await?;
        snapshot_of(body)
    }
}

fn snapshot_of(body: Option<Value>) -> Result<Option<String>, ApiError> {
    match body {
        Some(value) => Ok(decode::<SnapshotBody>(value)?.snapshot_id),
        None => Ok(None),
    }
}
