// src/server/rest.rs
//
// REST facade over the channel runtime and the persistent stores.
// Every response is a {success, ...} JSON envelope; failures carry an
// error string and a matching HTTP status.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::AppState;
use crate::channel::buffer::SendMode;
use crate::channel::config::{PortConfigBuilder, PortConfigInput};
use crate::channel::manager::DEFAULT_CHANNEL_ID;
use crate::error::MonitorError;
use crate::export::{export_entries, ExportFormat, ExportOptions};
use crate::macros::MacroInput;
use crate::ports::list_ports;
use crate::stores::ProfileInput;

// ============================================================================
// Envelopes
// ============================================================================

/// Wrap a payload object in the success envelope.
fn success(payload: Value) -> Response {
    let mut body = json!({ "success": true });
    if let (Some(obj), Some(extra)) = (body.as_object_mut(), payload.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    Json(body).into_response()
}

fn failure(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": error.to_string() })),
    )
        .into_response()
}

fn error_response(e: MonitorError) -> Response {
    let status = match &e {
        MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
        MonitorError::NotConnected(_) => StatusCode::CONFLICT,
        MonitorError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        MonitorError::StoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        MonitorError::InvalidConfig(_)
        | MonitorError::InvalidEncoding { .. }
        | MonitorError::MacroAborted { .. } => StatusCode::BAD_REQUEST,
    };
    failure(status, e)
}

fn default_channel(id: Option<String>) -> String {
    id.filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_CHANNEL_ID.to_string())
}

// ============================================================================
// Channel endpoints
// ============================================================================

pub async fn get_ports() -> Response {
    match list_ports() {
        Ok(ports) => success(json!({ "ports": ports })),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub config: PortConfigInput,
}

pub async fn connect(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConnectRequest>,
) -> Response {
    let channel_id = default_channel(request.channel_id);
    let config = match PortConfigBuilder::from_input(request.config).build() {
        Ok(config) => config,
        Err(e) => return error_response(e),
    };
    match state.manager.connect(&channel_id, config.clone()).await {
        Ok(()) => success(json!({ "channelId": channel_id, "config": config })),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
}

pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChannelRequest>,
) -> Response {
    let channel_id = default_channel(request.channel_id);
    state.manager.disconnect(&channel_id).await;
    success(json!({ "channelId": channel_id }))
}

pub async fn clear(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChannelRequest>,
) -> Response {
    let channel_id = default_channel(request.channel_id);
    state.manager.clear_buffer(&channel_id);
    success(json!({ "channelId": channel_id }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// One collapsed shape: a map keyed by channelId, whether the caller asked
/// for one channel or all of them.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let channels = match query.channel_id {
        Some(id) if !id.is_empty() => {
            let mut map = HashMap::new();
            map.insert(id.clone(), state.manager.status(&id));
            map
        }
        _ => state.manager.status_all(),
    };
    success(json!({ "channels": channels }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferQuery {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub count: Option<usize>,
}

/// Buffer-relative slice; how clients pull history the bus never replays.
pub async fn get_buffer(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BufferQuery>,
) -> Response {
    let channel_id = default_channel(query.channel_id);
    let entries = state.manager.get_buffer(&channel_id, query.start, query.count);
    success(json!({ "channelId": channel_id, "entries": entries }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
    pub data: String,
    pub mode: SendMode,
}

pub async fn send(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> Response {
    let channel_id = default_channel(request.channel_id);
    match state.manager.send(&channel_id, &request.data, request.mode).await {
        Ok(()) => success(json!({ "channelId": channel_id })),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub format: ExportFormat,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(flatten)]
    pub options: ExportOptions,
}

pub async fn export(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExportRequest>,
) -> Response {
    let channel_id = default_channel(request.channel_id);
    let entries = state.manager.snapshot_buffer(&channel_id);
    let content = export_entries(&entries, request.format, &request.options);
    success(json!({ "channelId": channel_id, "content": content }))
}

pub async fn get_plugins(State(state): State<Arc<AppState>>) -> Response {
    success(json!({ "plugins": state.decoders.plugin_infos() }))
}

pub async fn remove_channel(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChannelRequest>,
) -> Response {
    let channel_id = default_channel(request.channel_id);
    state.manager.remove_channel(&channel_id).await;
    success(json!({ "channelId": channel_id }))
}

// ============================================================================
// Macro endpoints
// ============================================================================

pub async fn list_macros(State(state): State<Arc<AppState>>) -> Response {
    success(json!({ "macros": state.macros.list() }))
}

pub async fn create_macro(
    State(state): State<Arc<AppState>>,
    Json(input): Json<MacroInput>,
) -> Response {
    match state.macros.create(input) {
        Ok(item) => success(json!({ "macro": item })),
        Err(e) => error_response(e),
    }
}

pub async fn get_macro(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.macros.get(&id) {
        Ok(item) => success(json!({ "macro": item })),
        Err(e) => error_response(e),
    }
}

pub async fn update_macro(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<MacroInput>,
) -> Response {
    match state.macros.update(&id, input) {
        Ok(item) => success(json!({ "macro": item })),
        Err(e) => error_response(e),
    }
}

pub async fn delete_macro(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.macros.remove(&id) {
        Ok(()) => success(json!({})),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMacroRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

pub async fn run_macro(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RunMacroRequest>,
) -> Response {
    let macro_def = match state.macros.get(&id) {
        Ok(m) => m,
        Err(e) => return error_response(e),
    };
    let channel_id = default_channel(request.channel_id);
    match crate::macros::run_macro(&state.manager, &macro_def, &channel_id, &request.params).await {
        Ok(()) => success(json!({ "channelId": channel_id, "macroId": id })),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Profile endpoints
// ============================================================================

pub async fn list_profiles(State(state): State<Arc<AppState>>) -> Response {
    success(json!({ "profiles": state.profiles.list() }))
}

pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ProfileInput>,
) -> Response {
    match state.profiles.create(input) {
        Ok(item) => success(json!({ "profile": item })),
        Err(e) => error_response(e),
    }
}

pub async fn get_profile(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.profiles.get(&id) {
        Ok(item) => success(json!({ "profile": item })),
        Err(e) => error_response(e),
    }
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<ProfileInput>,
) -> Response {
    match state.profiles.update(&id, input) {
        Ok(item) => success(json!({ "profile": item })),
        Err(e) => error_response(e),
    }
}

pub async fn delete_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.profiles.remove(&id) {
        Ok(()) => success(json!({})),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Shutdown
// ============================================================================

pub async fn shutdown(State(state): State<Arc<AppState>>) -> Response {
    tlog!("[rest] Shutdown requested");
    state.shutdown.notify_one();
    success(json!({}))
}
