//! Local HTTP API for inspecting and editing the monitored channel list.
//!
//! Changes go to the config file first and then to the live registry, so a
//! failed write leaves both untouched.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ConfigStore;
use crate::registry::{Source, SourceRegistry};
use crate::stats::{DeliveryStats, StatsSnapshot};

// ── Shared state ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<SourceRegistry>,
    pub stats: Arc<DeliveryStats>,
    pub store: ConfigStore,
}

// ── Request / response types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddChannelRequest {
    pub channel_id: i64,
    #[serde(default)]
    pub channel_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChannelsRequest {
    pub channel_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub channels: usize,
}

/// `{success, message, data?}` envelope; failures are sent as 400.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            StatusCode::BAD_REQUEST
        };
        (status, Json(self)).into_response()
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────────

async fn health(State(state): State<AdminState>) -> ApiResponse<HealthStatus> {
    ApiResponse::ok(
        HealthStatus {
            status: "ok",
            channels: state.registry.len(),
        },
        "relaybot is running",
    )
}

async fn list_channels(State(state): State<AdminState>) -> ApiResponse<Vec<Source>> {
    let channels = state.registry.list();
    debug!("Listing {} channel(s)", channels.len());
    let message = format!("{} channel(s) monitored", channels.len());
    ApiResponse::ok(channels, message)
}

async fn check_channel(
    State(state): State<AdminState>,
    Path(channel_id): Path<i64>,
) -> ApiResponse<bool> {
    if state.registry.contains(channel_id) {
        let name = state.registry.name(channel_id);
        ApiResponse::ok(true, format!("Channel {channel_id} ({name}) is monitored"))
    } else {
        ApiResponse::ok(false, format!("Channel {channel_id} is not monitored"))
    }
}

async fn add_channel(
    State(state): State<AdminState>,
    Json(request): Json<AddChannelRequest>,
) -> ApiResponse<i64> {
    let id = request.channel_id;
    if state.registry.contains(id) {
        return ApiResponse::error(format!("Channel {id} is already monitored"));
    }

    let mut ids = state.registry.ids();
    ids.push(id);
    if let Err(e) = state.store.save_channel_ids(&ids) {
        warn!("Failed to add channel {}: {:#}", id, e);
        return ApiResponse::error(format!("Failed to add channel {id}: {e:#}"));
    }

    state.registry.add(id);
    if let Some(name) = request.channel_name.filter(|n| !n.trim().is_empty()) {
        if let Err(e) = state.store.save_channel_name(id, &name) {
            warn!("Channel {} added but its name was not saved: {:#}", id, e);
        }
        state.registry.set_name(id, name);
    }
    info!(channel_id = id, "Channel added via admin API");
    ApiResponse::ok(id, format!("Channel {id} added"))
}

async fn remove_channel(
    State(state): State<AdminState>,
    Path(channel_id): Path<i64>,
) -> ApiResponse<i64> {
    if !state.registry.contains(channel_id) {
        return ApiResponse::error(format!("Channel {channel_id} is not monitored"));
    }

    let ids: Vec<i64> = state
        .registry
        .ids()
        .into_iter()
        .filter(|id| *id != channel_id)
        .collect();
    if let Err(e) = state.store.save_channel_ids(&ids) {
        warn!("Failed to remove channel {}: {:#}", channel_id, e);
        return ApiResponse::error(format!("Failed to remove channel {channel_id}: {e:#}"));
    }

    state.registry.remove(channel_id);
    info!(channel_id, "Channel removed via admin API");
    ApiResponse::ok(channel_id, format!("Channel {channel_id} removed"))
}

async fn update_channels(
    State(state): State<AdminState>,
    Json(request): Json<UpdateChannelsRequest>,
) -> ApiResponse<Vec<i64>> {
    if let Err(e) = state.store.save_channel_ids(&request.channel_ids) {
        warn!("Failed to update channel list: {:#}", e);
        return ApiResponse::error(format!("Failed to update channel list: {e:#}"));
    }

    state.registry.replace(request.channel_ids);
    let ids = state.registry.ids();
    info!("Channel list replaced via admin API ({} channel(s))", ids.len());
    let message = format!("{} channel(s) monitored", ids.len());
    ApiResponse::ok(ids, message)
}

async fn get_stats(State(state): State<AdminState>) -> ApiResponse<StatsSnapshot> {
    ApiResponse::ok(state.stats.snapshot(), "Delivery statistics")
}

// ── Router ─────────────────────────────────────────────────────────────────────

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/channels",
            get(list_channels).post(add_channel).put(update_channels),
        )
        .route(
            "/api/v1/channels/{id}",
            get(check_channel).delete(remove_channel),
        )
        .route("/api/v1/stats", get(get_stats))
        .with_state(state)
}

/// Serve the admin API until the process exits.
pub async fn serve(bind: SocketAddr, state: AdminState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind admin API to {bind}"))?;

    info!("Admin API listening on http://{}", bind);

    axum::serve(listener, router(state))
        .await
        .context("Admin API server error")?;
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
