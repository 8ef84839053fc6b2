//! Integration tests for the jukebox-session HTTP API
//!
//! Tests the complete API surface against a fully wired engine:
//! - Health check
//! - Playlist refresh (validation, status mapping, diagnostics)
//! - Playback control (device checks, conflicts, skip)
//! - Suggestion parameters and last suggestion
//! - Session status and reset

mod helpers;

use axum::body::Body;
use axum::http::StatusCode;
use helpers::*;
use http::{Method, Request};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Send one request through the router and decode the JSON body
async fn make_request(
    app: &axum::Router,
    method: Method,
    path: &str,
    body: Option<Body>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(path);
    if body.is_some() {
        request = request.header("content-type", "application/json");
    }
    let request = request.body(body.unwrap_or_else(Body::empty)).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn json_body(value: Value) -> Option<Body> {
    Some(Body::from(value.to_string()))
}

fn rig_with_tracks(tracks: &[&str]) -> EngineRig {
    EngineRig::new(
        test_config(),
        None,
        FakeSdkLoader::new(SdkBehavior::Ready(DEVICE_ID.to_string())),
        FakePlayerApi::new().with_device(DEVICE_ID),
        FakePlaylistApi::new(tracks),
    )
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let rig = rig_with_tracks(&["a"]);
    let (status, body) = make_request(&rig.router(), Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "jukebox-session");
    assert!(body["version"].is_string());
    assert!(!body["git_hash"].as_str().unwrap().is_empty());
    assert!(body["build_timestamp"].as_str().unwrap().contains('T'));
    assert!(!body["build_profile"].as_str().unwrap().is_empty());
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_refresh_site_with_empty_object() {
    let rig = rig_with_tracks(&["a", "b", "c", "d", "e"]);
    let (status, body) =
        make_request(&rig.router(), Method::POST, "/refresh-site", json_body(json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["message"], "Enough tracks remaining");
    assert_eq!(body["forceRefresh"], false);
    assert_eq!(body["playerStateRefresh"], false);
    assert_eq!(body["diagnostics"]["totalTracks"], 5);
    assert_eq!(body["diagnostics"]["upcomingTracksCount"], 5);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_site_without_body() {
    let rig = rig_with_tracks(&["a", "b", "c", "d", "e"]);
    let (status, body) = make_request(&rig.router(), Method::POST, "/refresh-site", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_site_passes_params_to_suggester() {
    let rig = rig_with_tracks(&["a"]);
    let (status, body) = make_request(
        &rig.router(),
        Method::POST,
        "/refresh-site",
        json_body(json!({
            "genres": ["  Jazz ", "Blues"],
            "yearRange": [1970, 1990],
            "popularity": 80,
            "maxOffset": 20
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["diagnostics"]["addedTrack"], true);

    let params = rig.suggester.last_request().unwrap().params;
    assert_eq!(params.genres, vec!["jazz".to_string(), "blues".to_string()]);
    assert_eq!(params.year_range, (1970, 1990));
    assert_eq!(params.popularity, 80);
    assert_eq!(params.max_offset, 20);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_site_keeps_saved_explicit_setting_when_omitted() {
    let rig = rig_with_tracks(&["a"]);
    let app = rig.router();

    let (status, _) = make_request(
        &app,
        Method::PUT,
        "/track-suggestions/params",
        json_body(json!({ "allowExplicit": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        make_request(&app, Method::POST, "/refresh-site", json_body(json!({}))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["diagnostics"]["addedTrack"], true);
    assert!(rig.suggester.last_request().unwrap().params.allow_explicit);

    let (status, _) = make_request(
        &app,
        Method::POST,
        "/refresh-site",
        json_body(json!({ "allowExplicit": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!rig.suggester.last_request().unwrap().params.allow_explicit);
}

#[tokio::test]
async fn test_refresh_site_rejects_invalid_params() {
    let rig = rig_with_tracks(&["a"]);
    let (status, body) = make_request(
        &rig.router(),
        Method::POST,
        "/refresh-site",
        json_body(json!({ "popularity": 150, "yearRange": [1800, 1990] })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid request parameters");
    let fields: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"popularity"));
    assert!(fields.contains(&"yearRange.0"));
    assert_eq!(rig.playlists.count("find:"), 0, "Invalid input must not reach the playlist");
}

#[tokio::test]
async fn test_refresh_site_rejects_malformed_json() {
    let rig = rig_with_tracks(&["a"]);
    let (status, body) = make_request(
        &rig.router(),
        Method::POST,
        "/refresh-site",
        Some(Body::from("{not json")),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_site_failure_maps_to_server_error() {
    let rig = EngineRig::new(
        test_config(),
        None,
        FakeSdkLoader::new(SdkBehavior::Ready(DEVICE_ID.to_string())),
        FakePlayerApi::new(),
        FakePlaylistApi::missing(),
    );
    let (status, body) =
        make_request(&rig.router(), Method::POST, "/refresh-site", json_body(json!({}))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "playlist_not_found");
}

#[tokio::test(start_paused = true)]
async fn test_refresh_site_step_timeout_maps_to_gateway_timeout() {
    let rig = rig_with_tracks(&["a"]);
    rig.suggester.set_delay(std::time::Duration::from_secs(30));

    let (status, body) =
        make_request(&rig.router(), Method::POST, "/refresh-site", json_body(json!({}))).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["status"], "timed_out");
}

#[tokio::test]
async fn test_track_added_is_accepted() {
    let rig = rig_with_tracks(&["a"]);
    let (status, _) = make_request(&rig.router(), Method::POST, "/track-added", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

// ============================================================================
// Playback
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_playback_requires_ready_device() {
    let rig = rig_with_tracks(&["a"]);
    let (status, body) = make_request(
        &rig.router(),
        Method::POST,
        "/playback",
        json_body(json!({ "action": "play" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("No active device"));
}

#[tokio::test(start_paused = true)]
async fn test_playback_on_unknown_device_is_rejected() {
    let rig = rig_with_tracks(&["a"]);
    rig.engine.session().initialize().await.unwrap();

    let (status, body) = make_request(
        &rig.router(),
        Method::POST,
        "/playback",
        json_body(json!({ "action": "skip", "deviceId": "someone-else" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("no longer active"));
}

#[tokio::test(start_paused = true)]
async fn test_play_transfers_then_starts_playback() {
    let rig = rig_with_tracks(&["a"]);
    rig.engine.session().initialize().await.unwrap();
    rig.player.clear_calls();

    let (status, body) = make_request(
        &rig.router(),
        Method::POST,
        "/playback",
        json_body(json!({
            "action": "play",
            "contextUri": "spotify:playlist:playlist-1",
            "position_ms": 1000
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(
        rig.player.calls(),
        vec![
            "transfer:device-1:false".to_string(),
            "play:device-1:spotify:playlist:playlist-1:".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_play_refused_while_another_device_plays() {
    let rig = rig_with_tracks(&["a"]);
    rig.engine.session().initialize().await.unwrap();
    rig.player
        .set_state(Some(player_state("phone", true, Some("t1"))));

    let (status, body) = make_request(
        &rig.router(),
        Method::POST,
        "/playback",
        json_body(json!({ "action": "play" })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["details"]["currentDevice"], "Device phone");
    assert_eq!(body["details"]["currentTrack"], "Song t1");
    assert_eq!(rig.player.count("play:"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_skip_advances_on_session_device() {
    let rig = rig_with_tracks(&["a"]);
    rig.engine.session().initialize().await.unwrap();

    let (status, _) = make_request(
        &rig.router(),
        Method::POST,
        "/playback",
        json_body(json!({ "action": "skip" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(rig.player.count("next:device-1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_play_is_server_error() {
    let rig = rig_with_tracks(&["a"]);
    rig.engine.session().initialize().await.unwrap();
    rig.player
        .fail_play
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let (status, body) = make_request(
        &rig.router(),
        Method::POST,
        "/playback",
        json_body(json!({ "action": "play" })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().starts_with("Failed to control playback"));
}

#[tokio::test]
async fn test_unknown_playback_action_is_rejected() {
    let rig = rig_with_tracks(&["a"]);
    let (status, _) = make_request(
        &rig.router(),
        Method::POST,
        "/playback",
        json_body(json!({ "action": "rewind" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ============================================================================
// Suggestions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_last_suggested_track_endpoint() {
    let rig = rig_with_tracks(&["a"]);
    let app = rig.router();

    let (status, body) =
        make_request(&app, Method::GET, "/track-suggestions/last-suggested", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["track"].is_null());

    rig.suggester.push_track("s1");
    make_request(&app, Method::POST, "/refresh-site", json_body(json!({}))).await;

    let (_, body) = make_request(&app, Method::GET, "/track-suggestions/last-suggested", None).await;
    assert_eq!(body["track"]["uri"], "spotify:track:s1");
    assert_eq!(body["track"]["name"], "Suggested s1");
    assert_eq!(body["track"]["durationMs"], 200_000);
}

#[tokio::test]
async fn test_params_round_trip_through_api() {
    let rig = rig_with_tracks(&["a"]);
    let app = rig.router();

    let (status, body) = make_request(&app, Method::GET, "/track-suggestions/params", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["params"].is_null());

    let (status, body) = make_request(
        &app,
        Method::PUT,
        "/track-suggestions/params",
        json_body(json!({ "genres": ["Rock"], "songsBetweenRepeats": 8 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["params"]["genres"], json!(["rock"]));

    let (_, body) = make_request(&app, Method::GET, "/track-suggestions/params", None).await;
    assert_eq!(body["params"]["songsBetweenRepeats"], 8);
    assert!(body["params"]["allowExplicit"].is_null());

    let (status, _) = make_request(
        &app,
        Method::PUT,
        "/track-suggestions/params",
        json_body(json!({ "songsBetweenRepeats": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Session
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_session_status_and_reset() {
    let rig = rig_with_tracks(&["a"]);
    let app = rig.router();

    let (status, body) = make_request(&app, Method::GET, "/session/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["state"], "uninitialized");
    assert_eq!(body["recovery"]["exhausted"], false);
    assert_eq!(body["refresh_in_progress"], false);

    let (status, body) = make_request(&app, Method::POST, "/session/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["deviceId"], DEVICE_ID);

    let (_, body) = make_request(&app, Method::GET, "/session/status", None).await;
    assert_eq!(body["session"]["state"], "ready");
    assert_eq!(body["session"]["device_id"], DEVICE_ID);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reset_reports_error() {
    let rig = EngineRig::new(
        test_config(),
        None,
        FakeSdkLoader::new(SdkBehavior::ConnectFails),
        FakePlayerApi::new(),
        FakePlaylistApi::new(&["a"]),
    );

    let (status, body) = make_request(&rig.router(), Method::POST, "/session/reset", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("Connect failed"));
}
