//! HTTP request handlers
//!
//! Each handler maps one UI gesture onto a transport operation.

use crate::api::server::AppContext;
use crate::error::Error;
use crate::playback::{ResetOptions, TrackSnapshot, TransportStatus};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use loopstation_common::ClockState;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LevelRequest {
    /// Slider position, 0-100
    percent: f64,
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    track_id: String,
    audible: bool,
}

#[derive(Debug, Serialize)]
pub struct ClockResponse {
    /// `None` while no gesture has created the clock
    clock_state: Option<ClockState>,
    clock_running: bool,
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    devices: Vec<String>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<StatusResponse>)>;

/// Map an engine error onto an HTTP status
pub fn status_code_for(e: &Error) -> StatusCode {
    match e {
        Error::UnknownTrack(_) => StatusCode::NOT_FOUND,
        Error::AssetLoad { .. } => StatusCode::BAD_GATEWAY,
        Error::Decode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::ClockUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: Error) -> (StatusCode, Json<StatusResponse>) {
    let code = status_code_for(&e);
    if code.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    (
        code,
        Json(StatusResponse {
            status: format!("error: {}", e),
        }),
    )
}

/// Reset options from a request body; empty means defaults
pub fn parse_reset_options(body: &[u8]) -> Result<ResetOptions, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ResetOptions::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| Error::InvalidInput(format!("invalid reset body: {}", e)))
}

async fn clock_response(ctx: &AppContext) -> ClockResponse {
    let clock_state = ctx.state.get_clock_state().await;
    ClockResponse {
        clock_state,
        clock_running: clock_state.map_or(false, |s| s.is_running()),
    }
}

// ============================================================================
// Health / Status
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "loopstation-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/v1/status - clock state and per-track snapshots
pub async fn get_status(State(ctx): State<AppContext>) -> ApiResult<TransportStatus> {
    ctx.transport.status().await.map(Json).map_err(error_response)
}

/// GET /api/v1/tracks/:track_id
pub async fn get_track(
    State(ctx): State<AppContext>,
    Path(track_id): Path<String>,
) -> ApiResult<Option<TrackSnapshot>> {
    ctx.transport
        .track_snapshot(&track_id)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Track gestures
// ============================================================================

/// POST /api/v1/tracks/:track_id/toggle - track button
pub async fn toggle_track(
    State(ctx): State<AppContext>,
    Path(track_id): Path<String>,
) -> ApiResult<TrackResponse> {
    let audible = ctx
        .transport
        .toggle_track(&track_id)
        .await
        .map_err(error_response)?;

    info!("Track '{}' toggled (audible={})", track_id, audible);
    Ok(Json(TrackResponse { track_id, audible }))
}

/// POST /api/v1/tracks/:track_id/level - level slider
pub async fn set_track_level(
    State(ctx): State<AppContext>,
    Path(track_id): Path<String>,
    Json(req): Json<LevelRequest>,
) -> ApiResult<TrackResponse> {
    ctx.transport
        .set_track_level_percent(&track_id, req.percent)
        .await
        .map_err(error_response)?;

    let audible = ctx
        .transport
        .is_track_audible(&track_id)
        .await
        .map_err(error_response)?;
    Ok(Json(TrackResponse { track_id, audible }))
}

// ============================================================================
// Transport gestures
// ============================================================================

/// POST /api/v1/mute-all
pub async fn mute_all(State(ctx): State<AppContext>) -> ApiResult<StatusResponse> {
    ctx.transport.mute_all().await.map_err(error_response)?;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/v1/reset - hard reset.
///
/// An empty body resets with every level silenced; a body that does not
/// parse is rejected.
pub async fn reset(State(ctx): State<AppContext>, body: Bytes) -> ApiResult<StatusResponse> {
    let options = parse_reset_options(&body).map_err(error_response)?;
    ctx.transport.reset_all(options).await.map_err(error_response)?;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/v1/master/toggle - master play/pause
pub async fn toggle_master(State(ctx): State<AppContext>) -> ApiResult<ClockResponse> {
    let clock_state = ctx.transport.toggle_master().await.map_err(error_response)?;
    Ok(Json(ClockResponse {
        clock_state: Some(clock_state),
        clock_running: clock_state.is_running(),
    }))
}

/// POST /api/v1/master/pause
pub async fn pause_master(State(ctx): State<AppContext>) -> ApiResult<ClockResponse> {
    ctx.transport.pause_all().await.map_err(error_response)?;
    Ok(Json(clock_response(&ctx).await))
}

/// POST /api/v1/master/resume
pub async fn resume_master(State(ctx): State<AppContext>) -> ApiResult<ClockResponse> {
    ctx.transport.resume_all().await.map_err(error_response)?;
    Ok(Json(clock_response(&ctx).await))
}

// ============================================================================
// Diagnostics
// ============================================================================

/// GET /api/v1/audio/devices - list output devices
pub async fn list_audio_devices() -> ApiResult<DeviceListResponse> {
    use crate::audio::output::AudioOutput;

    let devices = tokio::task::spawn_blocking(AudioOutput::list_devices)
        .await
        .map_err(|e| error_response(Error::Internal(e.to_string())))?
        .map_err(error_response)?;

    info!("Found {} audio devices", devices.len());
    Ok(Json(DeviceListResponse { devices }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(status_code_for(&Error::UnknownTrack("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_code_for(&Error::AssetLoad {
                track_id: "x".into(),
                reason: "404".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_code_for(&Error::Decode {
                track_id: "x".into(),
                reason: "garbage".into()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_code_for(&Error::ClockUnavailable("no device".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_code_for(&Error::InvalidInput("nan".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_code_for(&Error::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_reset_body_parsing() {
        assert_eq!(parse_reset_options(b"").unwrap(), ResetOptions::default());
        assert_eq!(parse_reset_options(b" \n").unwrap(), ResetOptions::default());
        assert!(parse_reset_options(b"{}").unwrap().mute_all);

        let options = parse_reset_options(br#"{ "mute_all": false }"#).unwrap();
        assert!(!options.mute_all);
        assert!(!options.restore_initial_levels);

        assert!(matches!(
            parse_reset_options(b"{ mute_all"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            parse_reset_options(br#"{ "mute_all": "yes" }"#),
            Err(Error::InvalidInput(_))
        ));
    }
}
