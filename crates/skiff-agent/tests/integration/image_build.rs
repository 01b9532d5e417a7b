/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::fixtures::{BuildReply, FakeBuildService, FakeControlPlane};
use axum::http::StatusCode;
use skiff_agent::control_plane::ControlPlane;
use skiff_agent::image_build::{relay_build_events, ImageBuildOrchestrator};
use skiff_models::models::{BuildStatus, ImageBuildLogs, ImageBuildTrigger, WsMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BUNDLE: &[u8] = b"\x1f\x8bpretend-this-is-a-gzip-tarball";

fn trigger() -> ImageBuildTrigger {
    ImageBuildTrigger {
        build_id: "b-42".to_string(),
        image: "reg/app".to_string(),
        tag: "v7".to_string(),
        app: "app".to_string(),
        triggering_user: "user-9".to_string(),
    }
}

fn orchestrator(
    control_plane: &FakeControlPlane,
    build_service_url: &str,
) -> (ImageBuildOrchestrator, mpsc::Receiver<WsMessage>) {
    let (tx, rx) = mpsc::channel(64);
    let client = reqwest::Client::new();
    let cp = ControlPlane::new(client.clone(), &control_plane.url, "token");
    (
        ImageBuildOrchestrator::new(cp, client, build_service_url, tx),
        rx,
    )
}

fn drain(mut rx: mpsc::Receiver<WsMessage>) -> Vec<ImageBuildLogs> {
    let mut records = Vec::new();
    while let Ok(message) = rx.try_recv() {
        assert_eq!(message.message_type, "imageBuildLogs");
        records.push(message.build_logs().expect("imageBuildLogs payload"));
    }
    records
}

#[tokio::test]
async fn test_successful_build_reports_running_then_success() {
    let control_plane = FakeControlPlane::start().await;
    control_plane.set_bundle(BUNDLE);
    let build_service = FakeBuildService::start(BuildReply::Stream(vec![
        "building...\n".to_string(),
        "pushing\n".to_string(),
        "IMAGE BUILT".to_string(),
    ]))
    .await;
    let (orchestrator, rx) = orchestrator(&control_plane, &build_service.url);

    let status = orchestrator
        .build(&trigger(), &CancellationToken::new())
        .await;
    assert_eq!(status, BuildStatus::Success);

    let records = drain(rx);
    let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![BuildStatus::Running, BuildStatus::Success]);
    assert_eq!(records[0].log_line, "building...\n");
    assert_eq!(records[1].log_line, "pushing\nIMAGE BUILT");
    assert!(records
        .iter()
        .all(|r| r.client_id == "user-9" && r.build_id == "b-42"));

    let received = build_service.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].fields["image"], "reg/app");
    assert_eq!(received[0].fields["tag"], "v7");
    assert_eq!(received[0].fields["app"], "app");
    assert_eq!(received[0].data, BUNDLE);
    assert_eq!(received[0].data_file_name.as_deref(), Some("app.tar.gz"));
}

#[tokio::test]
async fn test_error_sentinel_reports_not_built() {
    let control_plane = FakeControlPlane::start().await;
    control_plane.set_bundle(BUNDLE);
    let build_service = FakeBuildService::start(BuildReply::Stream(vec![
        "step 1\n".to_string(),
        "builder exited with exit status: 1\nIMAGE BUILD ERROR".to_string(),
    ]))
    .await;
    let (orchestrator, rx) = orchestrator(&control_plane, &build_service.url);

    let status = orchestrator
        .build(&trigger(), &CancellationToken::new())
        .await;

    assert_eq!(status, BuildStatus::NotBuilt);
    let records = drain(rx);
    assert_eq!(records.last().unwrap().status, BuildStatus::NotBuilt);
    assert_eq!(
        records.iter().filter(|r| r.status.is_terminal()).count(),
        1
    );
}

#[tokio::test]
async fn test_broken_output_stream_reports_error_with_pending_text() {
    let control_plane = FakeControlPlane::start().await;
    control_plane.set_bundle(BUNDLE);
    let build_service = FakeBuildService::start(BuildReply::Abort(vec![
        "step 1\n".to_string(),
        "step 2\n".to_string(),
        "half a line".to_string(),
    ]))
    .await;
    let (orchestrator, rx) = orchestrator(&control_plane, &build_service.url);

    let status = orchestrator
        .build(&trigger(), &CancellationToken::new())
        .await;

    assert_eq!(status, BuildStatus::Error);
    let records = drain(rx);
    let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![BuildStatus::Running, BuildStatus::Error]);
    assert_eq!(records[0].log_line, "step 1\n");
    assert_eq!(records[1].log_line, "step 2\nhalf a line");
}

#[tokio::test]
async fn test_rejected_upload_reports_a_single_error() {
    let control_plane = FakeControlPlane::start().await;
    control_plane.set_bundle(BUNDLE);
    let build_service = FakeBuildService::start(BuildReply::Reject(
        StatusCode::BAD_REQUEST,
        "missing multipart field 'tag'".to_string(),
    ))
    .await;
    let (orchestrator, rx) = orchestrator(&control_plane, &build_service.url);

    let status = orchestrator
        .build(&trigger(), &CancellationToken::new())
        .await;

    assert_eq!(status, BuildStatus::Error);
    let records = drain(rx);
    assert_eq!(records.len(), 1);
    assert!(records[0].log_line.contains("missing multipart field"));
}

#[tokio::test]
async fn test_missing_bundle_never_reaches_the_build_service() {
    let control_plane = FakeControlPlane::start().await;
    let build_service = FakeBuildService::start(BuildReply::Stream(vec![])).await;
    let (orchestrator, rx) = orchestrator(&control_plane, &build_service.url);

    let status = orchestrator
        .build(&trigger(), &CancellationToken::new())
        .await;

    assert_eq!(status, BuildStatus::Error);
    assert!(build_service.received().is_empty());
    let records = drain(rx);
    assert_eq!(records.len(), 1);
    assert!(records[0].log_line.contains("404"));
}

#[tokio::test]
async fn test_relay_forwards_envelopes_per_build() {
    let control_plane = FakeControlPlane::start().await;
    let cp = ControlPlane::new(reqwest::Client::new(), &control_plane.url, "token");
    let (tx, rx) = mpsc::channel(8);
    let relay = tokio::spawn(relay_build_events(rx, cp));

    let record = ImageBuildLogs {
        client_id: "user-9".to_string(),
        build_id: "b-42".to_string(),
        status: BuildStatus::Running,
        log_line: "building...\n".to_string(),
    };
    tx.send(WsMessage::image_build_logs(&record).unwrap())
        .await
        .unwrap();
    tx.send(WsMessage {
        message_type: "somethingElse".to_string(),
        payload: "{}".to_string(),
    })
    .await
    .unwrap();
    drop(tx);
    relay.await.unwrap();

    control_plane.with_log(|log| {
        assert_eq!(log.build_logs.len(), 1);
        let (build_id, message) = &log.build_logs[0];
        assert_eq!(build_id, "b-42");
        assert_eq!(message.build_logs().unwrap(), record);
    });
}
