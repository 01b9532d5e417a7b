/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use skiff_agent::health::{configure_health_routes, ChannelStatus, HealthState};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tower::ServiceExt;

fn health_state(connected: bool) -> HealthState {
    HealthState {
        channel_status: Arc::new(RwLock::new(ChannelStatus {
            connected,
            last_event: Some("2026-10-18T12:00:00Z".to_string()),
        })),
        start_time: SystemTime::now(),
    }
}

async fn get(state: HealthState, uri: &str) -> (StatusCode, String) {
    let response = configure_health_routes(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_healthz_endpoint() {
    let (status, body) = get(health_state(false), "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_readyz_follows_event_channel() {
    let (status, _) = get(health_state(false), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = get(health_state(true), "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Ready");
}

#[tokio::test]
async fn test_health_endpoint_reports_channel() {
    let (status, body) = get(health_state(true), "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["event_channel"]["connected"], true);
    assert_eq!(json["event_channel"]["last_event"], "2026-10-18T12:00:00Z");
    assert!(json.get("uptime_seconds").is_some());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    skiff_agent::metrics::event_channel_reconnects_total().inc();

    let (status, body) = get(health_state(true), "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("skiff_agent_event_channel_reconnects_total"));
}
