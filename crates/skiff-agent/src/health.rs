/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Probe and scrape endpoints served next to the agent.
//!
//! | route | answer |
//! |---|---|
//! | `GET /healthz` | `200 OK` while the process runs |
//! | `GET /readyz` | `200` once the event channel is connected, `503` before and between connections |
//! | `GET /health` | JSON report of the event channel, uptime and version |
//! | `GET /metrics` | Prometheus text exposition |

use crate::metrics;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HealthState {
    pub channel_status: Arc<RwLock<ChannelStatus>>,
    pub start_time: SystemTime,
}

/// Last known state of the event channel, written by its supervisor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStatus {
    pub connected: bool,
    /// RFC 3339 time of the last dispatched event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<String>,
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    event_channel: ChannelStatus,
    uptime_seconds: u64,
    version: &'static str,
    timestamp: String,
}

pub fn configure_health_routes(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(readyz))
        .route("/health", get(health))
        .route("/metrics", get(scrape))
        .with_state(state)
}

async fn readyz(State(state): State<HealthState>) -> Response {
    match state.channel_status.read().await.connected {
        true => "Ready".into_response(),
        false => (StatusCode::SERVICE_UNAVAILABLE, "Event channel not connected").into_response(),
    }
}

async fn health(State(state): State<HealthState>) -> Response {
    let event_channel = state.channel_status.read().await.clone();
    let (code, status) = match event_channel.connected {
        true => (StatusCode::OK, "healthy"),
        false => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };
    let report = HealthReport {
        status,
        event_channel,
        uptime_seconds: state.start_time.elapsed().map_or(0, |d| d.as_secs()),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (code, Json(report)).into_response()
}

async fn scrape() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
        .into_response()
}
