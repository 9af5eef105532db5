//! API v0 endpoints.
//!
//! Version 0 signals an unstable API; breaking changes are expected.

use std::path::PathBuf;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::server::SharedState;
use crate::alarm::sound::{self, AlarmSoundResolver};
use crate::api_client::types::{
    AcknowledgeRequest, ErrorBody, MonitorState, SetSoundRequest, SlotInfo, SoundState,
    StartRequest,
};
use crate::error::Error;
use crate::session::Channel;
use crate::slot;
use crate::tracing::prelude::*;

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_slots))
        .routes(routes!(get_monitor))
        .routes(routes!(start_monitor))
        .routes(routes!(stop_monitor))
        .routes(routes!(acknowledge))
        .routes(routes!(get_sound, put_sound, delete_sound))
}

/// Error response: status code plus a JSON message.
struct ApiError(StatusCode, String);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::UnknownSlot(_) => StatusCode::NOT_FOUND,
            e if e.is_state_violation() => StatusCode::CONFLICT,
            Error::InvalidInterval => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_server_error() {
            warn!(status = %self.0, error = %self.1, "Request failed");
        }
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Daemon is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// List the slots that can be monitored.
#[utoipa::path(
    get,
    path = "/slots",
    tag = "monitor",
    responses(
        (status = OK, description = "Slot catalog", body = Vec<SlotInfo>),
    ),
)]
async fn get_slots() -> Json<Vec<SlotInfo>> {
    Json(
        slot::SLOTS
            .iter()
            .map(|slot| SlotInfo {
                id: slot.id.to_string(),
                day: slot.day.to_string(),
                label: slot.label.to_string(),
            })
            .collect(),
    )
}

/// Return the current monitor snapshot.
#[utoipa::path(
    get,
    path = "/monitor",
    tag = "monitor",
    responses(
        (status = OK, description = "Current monitor state", body = MonitorState),
    ),
)]
async fn get_monitor(State(state): State<SharedState>) -> Json<MonitorState> {
    Json(state.coordinator.snapshot())
}

/// Start monitoring a slot on the requested channels.
#[utoipa::path(
    post,
    path = "/monitor/start",
    tag = "monitor",
    request_body = StartRequest,
    responses(
        (status = OK, description = "Monitoring started", body = MonitorState),
        (status = NOT_FOUND, description = "Unknown slot", body = ErrorBody),
        (status = CONFLICT, description = "Another slot is monitored or still stopping", body = ErrorBody),
    ),
)]
async fn start_monitor(
    State(state): State<SharedState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<MonitorState>, ApiError> {
    let channels = req.channels.unwrap_or_else(|| Channel::ALL.to_vec());
    for channel in channels {
        state.coordinator.start_channel(channel, &req.slot)?;
    }
    Ok(Json(state.coordinator.snapshot()))
}

/// Stop all channels and forget the selected slot.
///
/// Returns once in-flight polls have finished.
#[utoipa::path(
    post,
    path = "/monitor/stop",
    tag = "monitor",
    responses(
        (status = OK, description = "Monitoring stopped", body = MonitorState),
    ),
)]
async fn stop_monitor(State(state): State<SharedState>) -> Json<MonitorState> {
    state.coordinator.stop_monitoring().await;
    Json(state.coordinator.snapshot())
}

/// Acknowledge the sounding alarm.
#[utoipa::path(
    post,
    path = "/monitor/acknowledge",
    tag = "monitor",
    request_body = AcknowledgeRequest,
    responses(
        (status = OK, description = "Monitor state after acknowledging", body = MonitorState),
    ),
)]
async fn acknowledge(
    State(state): State<SharedState>,
    Json(req): Json<AcknowledgeRequest>,
) -> Json<MonitorState> {
    let channel = req.channel.unwrap_or(Channel::Interactive);
    state.coordinator.acknowledge(channel);
    Json(state.coordinator.snapshot())
}

fn sound_state(resolver: &AlarmSoundResolver) -> SoundState {
    match resolver.custom_source() {
        Some(source) if source.present => SoundState {
            custom: source.file_path.is_file(),
            name: Some(source.display_name),
            path: Some(source.file_path.display().to_string()),
        },
        _ => SoundState {
            custom: false,
            name: None,
            path: None,
        },
    }
}

/// Return the alarm sound configuration.
#[utoipa::path(
    get,
    path = "/sound",
    tag = "sound",
    responses(
        (status = OK, description = "Alarm sound", body = SoundState),
    ),
)]
async fn get_sound(State(state): State<SharedState>) -> Json<SoundState> {
    Json(sound_state(&state.sounds.lock()))
}

/// Import a sound file as the alarm sound.
#[utoipa::path(
    put,
    path = "/sound",
    tag = "sound",
    request_body = SetSoundRequest,
    responses(
        (status = OK, description = "Sound imported", body = SoundState),
        (status = INTERNAL_SERVER_ERROR, description = "Import failed; previous sound kept", body = ErrorBody),
    ),
)]
async fn put_sound(
    State(state): State<SharedState>,
    Json(req): Json<SetSoundRequest>,
) -> Result<Json<SoundState>, ApiError> {
    let sounds = state.sounds.clone();
    let sounds_dir = sounds.lock().sounds_dir().to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Json<SoundState>, ApiError> {
        // The alarm resolves its sound through the same lock; copy first.
        let staged = sound::stage_sound(&sounds_dir, &PathBuf::from(&req.path))?;
        let mut resolver = sounds.lock();
        resolver.commit_custom_source(staged, &req.name)?;
        Ok(Json(sound_state(&resolver)))
    })
    .await
    .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
}

/// Go back to the bundled alarm sound.
#[utoipa::path(
    delete,
    path = "/sound",
    tag = "sound",
    responses(
        (status = OK, description = "Custom sound cleared", body = SoundState),
        (status = INTERNAL_SERVER_ERROR, description = "Storage failure", body = ErrorBody),
    ),
)]
async fn delete_sound(State(state): State<SharedState>) -> Result<Json<SoundState>, ApiError> {
    let sounds = state.sounds.clone();
    tokio::task::spawn_blocking(move || -> Result<Json<SoundState>, ApiError> {
        let mut resolver = sounds.lock();
        resolver.clear_custom_source()?;
        Ok(Json(sound_state(&resolver)))
    })
    .await
    .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{Router, body::Body, http::Request};
    use http_body_util::BodyExt;
    use parking_lot::Mutex;
    use serde::de::DeserializeOwned;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::alarm::AlarmState;
    use crate::api::router;
    use crate::coordinator::ChannelCoordinator;
    use crate::outputs::{AlarmOutputs, LogNotifier, LogPlayback};
    use crate::status::{FetchError, RawStatus, StatusSource};
    use crate::store::MemoryStore;

    struct ClosedSource;

    #[async_trait]
    impl StatusSource for ClosedSource {
        async fn fetch(&self, _slot_id: &str) -> std::result::Result<RawStatus, FetchError> {
            Ok(RawStatus {
                status: Some("closed".into()),
                is_open: Some(false),
                http_code: 200,
                message: None,
            })
        }
    }

    struct Fixture {
        app: Router,
        state: SharedState,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sounds = Arc::new(Mutex::new(AlarmSoundResolver::new(
            store.clone(),
            dir.path().join("sounds"),
        )));
        let outputs = AlarmOutputs::new(
            Arc::new(LogPlayback),
            Arc::new(LogNotifier),
            sounds.clone(),
        );
        let coordinator = Arc::new(ChannelCoordinator::new(
            Arc::new(ClosedSource),
            outputs,
            store,
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        let state = SharedState {
            coordinator,
            sounds,
        };
        Fixture {
            app: router(state.clone()),
            state,
            dir,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let f = fixture();
        let (status, body) = send(&f.app, "GET", "/api/v0/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn slots_lists_catalog() {
        let f = fixture();
        let (status, body) = send(&f.app, "GET", "/api/v0/slots", None).await;
        assert_eq!(status, StatusCode::OK);
        let slots: Vec<SlotInfo> = parse(&body);
        assert_eq!(slots.len(), slot::SLOTS.len());
        assert!(slots.iter().any(|s| s.id == "tue_930"));
    }

    #[tokio::test]
    async fn start_and_stop_monitoring() {
        let f = fixture();

        let (status, body) = send(
            &f.app,
            "POST",
            "/api/v0/monitor/start",
            Some(r#"{"slot":"tue_930"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let state: MonitorState = parse(&body);
        assert_eq!(state.slot.as_deref(), Some("tue_930"));
        assert_eq!(state.alarm, AlarmState::Monitoring);
        assert!(state.channels.iter().all(|c| c.running));

        let (status, body) = send(&f.app, "POST", "/api/v0/monitor/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        let state: MonitorState = parse(&body);
        assert_eq!(state.slot, None);
        assert_eq!(state.alarm, AlarmState::Idle);
    }

    #[tokio::test]
    async fn start_single_channel() {
        let f = fixture();
        let (status, body) = send(
            &f.app,
            "POST",
            "/api/v0/monitor/start",
            Some(r#"{"slot":"fri_1110","channels":["background"]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let state: MonitorState = parse(&body);
        let running: Vec<Channel> = state
            .channels
            .iter()
            .filter(|c| c.running)
            .map(|c| c.channel)
            .collect();
        assert_eq!(running, [Channel::Background]);

        f.state.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn start_rejects_unknown_and_conflicting_slots() {
        let f = fixture();

        let (status, body) = send(
            &f.app,
            "POST",
            "/api/v0/monitor/start",
            Some(r#"{"slot":"sat_900"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorBody = parse(&body);
        assert!(error.error.contains("sat_900"));

        send(
            &f.app,
            "POST",
            "/api/v0/monitor/start",
            Some(r#"{"slot":"tue_930"}"#),
        )
        .await;
        let (status, _) = send(
            &f.app,
            "POST",
            "/api/v0/monitor/start",
            Some(r#"{"slot":"tue_140"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        f.state.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn acknowledge_without_alarm_is_harmless() {
        let f = fixture();
        let (status, body) = send(&f.app, "POST", "/api/v0/monitor/acknowledge", Some("{}")).await;
        assert_eq!(status, StatusCode::OK);
        let state: MonitorState = parse(&body);
        assert_eq!(state.alarm, AlarmState::Idle);
    }

    #[tokio::test]
    async fn sound_import_and_clear() {
        let f = fixture();
        let original = f.dir.path().join("siren.wav");
        std::fs::write(&original, b"RIFF").unwrap();

        let (status, body) = send(&f.app, "GET", "/api/v0/sound", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!parse::<SoundState>(&body).custom);

        let request = serde_json::json!({ "path": original, "name": "Siren" }).to_string();
        let (status, body) = send(&f.app, "PUT", "/api/v0/sound", Some(&request)).await;
        assert_eq!(status, StatusCode::OK);
        let sound: SoundState = parse(&body);
        assert!(sound.custom);
        assert_eq!(sound.name.as_deref(), Some("Siren"));

        let (status, body) = send(&f.app, "DELETE", "/api/v0/sound", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!parse::<SoundState>(&body).custom);
    }

    #[tokio::test]
    async fn sound_replace_and_clear_manage_copies() {
        let f = fixture();
        let sounds_dir = f.state.sounds.lock().sounds_dir().to_path_buf();
        let copies = || {
            std::fs::read_dir(&sounds_dir)
                .map(|entries| entries.count())
                .unwrap_or(0)
        };

        // Clearing with nothing imported is fine.
        let (status, _) = send(&f.app, "DELETE", "/api/v0/sound", None).await;
        assert_eq!(status, StatusCode::OK);

        for name in ["a.wav", "b.wav"] {
            let original = f.dir.path().join(name);
            std::fs::write(&original, b"RIFF").unwrap();
            let request = serde_json::json!({ "path": original, "name": "" }).to_string();
            let (status, body) = send(&f.app, "PUT", "/api/v0/sound", Some(&request)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(parse::<SoundState>(&body).name.as_deref(), Some(name));
            assert_eq!(copies(), 1);
        }

        let (status, _) = send(&f.app, "DELETE", "/api/v0/sound", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(copies(), 0);
    }

    #[tokio::test]
    async fn failed_import_reports_error() {
        let f = fixture();
        let missing = f.dir.path().join("missing.wav");
        let request = serde_json::json!({ "path": missing, "name": "" }).to_string();

        let (status, body) = send(&f.app, "PUT", "/api/v0/sound", Some(&request)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!parse::<ErrorBody>(&body).error.is_empty());
    }

    #[tokio::test]
    async fn serves_openapi_document() {
        let f = fixture();
        let (status, body) = send(&f.app, "GET", "/api-docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = parse(&body);
        assert!(doc["paths"]["/api/v0/monitor/start"].is_object());
        assert!(doc["paths"]["/api/v0/sound"]["put"].is_object());
    }
}
