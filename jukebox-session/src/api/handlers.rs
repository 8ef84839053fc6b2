//! HTTP request handlers

use crate::api::server::AppContext;
use crate::playback::{ConflictDetails, PlaybackCommand, PlaybackError};
use crate::refresh::{
    current_year, validate_params, FieldError, RefreshDiagnostics, RefreshStatus, SuggestionParams,
};
use crate::engine::SessionStatus;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use jukebox_common::events::LastSuggestedTrack;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
    uptime_secs: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<RefreshStatus>,
    player_state_refresh: bool,
    force_refresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<RefreshDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
}

impl RefreshResponse {
    fn rejected(message: &str, errors: Vec<FieldError>) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            status: None,
            player_state_refresh: false,
            force_refresh: false,
            diagnostics: None,
            errors: Some(errors),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlaybackResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ConflictDetails>,
}

#[derive(Debug, Serialize)]
pub struct LastSuggestedResponse {
    track: Option<LastSuggestedTrack>,
}

#[derive(Debug, Serialize)]
pub struct ParamsResponse {
    params: Option<SuggestionParams>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    success: bool,
    device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Liveness probe
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "jukebox-session".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
        uptime_secs: (Utc::now() - ctx.started_at).num_seconds(),
    })
}

// ============================================================================
// Playlist Refresh
// ============================================================================

/// POST /refresh-site - Validate parameters and run one refresh
pub async fn refresh_site(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> (StatusCode, Json<RefreshResponse>) {
    let raw: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                warn!("Refresh request body is not JSON: {}", e);
                return (
                    StatusCode::BAD_REQUEST,
                    Json(RefreshResponse::rejected(
                        "Invalid request body",
                        vec![FieldError {
                            field: String::new(),
                            message: e.to_string(),
                        }],
                    )),
                );
            }
        }
    };

    let params = match validate_params(&raw, current_year()) {
        Ok(params) => params,
        Err(errors) => {
            warn!(errors = errors.len(), "Refresh request rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(RefreshResponse::rejected("Invalid request parameters", errors)),
            );
        }
    };

    let refresher = ctx.engine.refresher();
    let limit = ctx.engine.config().refresh.endpoint_timeout();
    let result = match tokio::time::timeout(limit, refresher.refresh(false, Some(params))).await {
        Ok(result) => result,
        Err(_) => {
            error!("Refresh endpoint timed out");
            return (
                StatusCode::GATEWAY_TIMEOUT,
                Json(RefreshResponse {
                    success: false,
                    message: "Request timed out. Please try again.".to_string(),
                    status: Some(RefreshStatus::TimedOut),
                    player_state_refresh: false,
                    force_refresh: false,
                    diagnostics: None,
                    errors: None,
                }),
            );
        }
    };

    let status = match result.status {
        RefreshStatus::Completed | RefreshStatus::AlreadyInProgress => StatusCode::OK,
        RefreshStatus::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(RefreshResponse {
            success: result.success,
            message: result.message,
            status: Some(result.status),
            player_state_refresh: result.player_state_refresh,
            force_refresh: result.force_refresh,
            diagnostics: Some(result.diagnostics),
            errors: None,
        }),
    )
}

/// POST /track-added - Debounced refresh trigger
pub async fn track_added(State(ctx): State<AppContext>) -> StatusCode {
    ctx.engine.scheduler().notify_track_added();
    StatusCode::ACCEPTED
}

// ============================================================================
// Playback Control
// ============================================================================

/// POST /playback - Play or skip on the session's device
pub async fn playback(
    State(ctx): State<AppContext>,
    Json(command): Json<PlaybackCommand>,
) -> Result<Json<PlaybackResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!(action = ?command.action, device_id = ?command.device_id, "Playback request");

    match ctx.engine.playback().execute(command).await {
        Ok(()) => Ok(Json(PlaybackResponse { success: true })),
        Err(e) => {
            let (status, details) = match &e {
                PlaybackError::NoDevice | PlaybackError::DeviceNotActive => (StatusCode::BAD_REQUEST, None),
                PlaybackError::Conflict(details) => (StatusCode::CONFLICT, Some(details.clone())),
                PlaybackError::ControlFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
            };
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                    details,
                }),
            ))
        }
    }
}

// ============================================================================
// Track Suggestions
// ============================================================================

/// GET /track-suggestions/last-suggested
pub async fn last_suggested(State(ctx): State<AppContext>) -> Json<LastSuggestedResponse> {
    Json(LastSuggestedResponse {
        track: ctx.engine.refresher().last_suggested_track().await,
    })
}

/// GET /track-suggestions/params - Saved user parameters
pub async fn get_params(State(ctx): State<AppContext>) -> Json<ParamsResponse> {
    Json(ParamsResponse {
        params: ctx.engine.refresher().saved_params().await,
    })
}

/// PUT /track-suggestions/params - Validate and save user parameters
pub async fn put_params(
    State(ctx): State<AppContext>,
    Json(raw): Json<Value>,
) -> Result<Json<ParamsResponse>, (StatusCode, Json<RefreshResponse>)> {
    let params = validate_params(&raw, current_year()).map_err(|errors| {
        (
            StatusCode::BAD_REQUEST,
            Json(RefreshResponse::rejected("Invalid request parameters", errors)),
        )
    })?;

    match ctx.engine.refresher().save_params(params.clone()).await {
        Ok(()) => {
            info!("Saved suggestion parameters");
            Ok(Json(ParamsResponse { params: Some(params) }))
        }
        Err(e) => {
            error!("Failed to save suggestion parameters: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RefreshResponse::rejected("Failed to save parameters", Vec::new())),
            ))
        }
    }
}

// ============================================================================
// Device Session
// ============================================================================

/// GET /session/status - Composite session, recovery, token and health view
pub async fn session_status(State(ctx): State<AppContext>) -> Json<SessionStatus> {
    Json(ctx.engine.status())
}

/// POST /session/reset - Operator reset out of a terminal error
pub async fn session_reset(
    State(ctx): State<AppContext>,
) -> (StatusCode, Json<ResetResponse>) {
    info!("Session reset requested");
    match ctx.engine.session().reset().await {
        Ok(device_id) => (
            StatusCode::OK,
            Json(ResetResponse {
                success: true,
                device_id: Some(device_id),
                error: None,
            }),
        ),
        Err(e) => {
            error!("Session reset failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ResetResponse {
                    success: false,
                    device_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
