/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::fixtures::{agent_context, wait_until, FakeCluster, FakeControlPlane, Session, TOKEN};
use skiff_agent::event_channel;
use skiff_models::models::ServiceKey;
use std::sync::Arc;
use std::time::Duration;

const REFETCH: &str = "data: {\"action\":\"refetch\"}\n\n";
const PODLOGS: &str =
    "data: {\"action\":\"podlogs\",\"namespace\":\"apps\",\"serviceName\":\"web\",\"sinceTime\":\"5\"}\n\n";
const STOPLOGS: &str =
    "data: {\"action\":\"stoplogs\",\"namespace\":\"apps\",\"serviceName\":\"web\"}\n\n";

#[tokio::test]
async fn test_registration_is_authenticated_and_reports_state() {
    let control_plane = FakeControlPlane::start().await;
    let cluster = Arc::new(FakeCluster::with_web_service());
    let (ctx, _rx) = agent_context(&control_plane, "http://127.0.0.1:1", cluster);

    let supervisor = tokio::spawn(event_channel::run(ctx.clone()));
    wait_until("initial state report", || {
        control_plane.with_log(|log| !log.states.is_empty())
    })
    .await;

    control_plane.with_log(|log| {
        let registration = &log.registrations[0];
        assert_eq!(registration.query["name"], "staging");
        assert_eq!(registration.query["namespace"], "apps");
        assert_eq!(
            registration.authorization.as_deref(),
            Some(format!("BEARER {}", TOKEN).as_str())
        );

        let (env, services) = &log.states[0];
        assert_eq!(env, "staging");
        assert_eq!(services[0].name, "web");
    });
    assert!(ctx.channel_status.read().await.connected);

    ctx.shutdown_and_wait().await;
    supervisor.await.unwrap();
    assert!(!ctx.channel_status.read().await.connected);
}

#[tokio::test]
async fn test_refetch_event_resends_state() {
    let control_plane = FakeControlPlane::start().await;
    control_plane.push_session(Session::open(&[REFETCH]));
    let cluster = Arc::new(FakeCluster::with_web_service());
    let (ctx, _rx) = agent_context(&control_plane, "http://127.0.0.1:1", cluster);

    let supervisor = tokio::spawn(event_channel::run(ctx.clone()));
    wait_until("registration and refetch reports", || {
        control_plane.with_log(|log| log.states.len() >= 2)
    })
    .await;
    assert_eq!(control_plane.with_log(|log| log.registrations.len()), 1);

    ctx.shutdown_and_wait().await;
    supervisor.await.unwrap();
}

#[tokio::test]
async fn test_unactionable_event_is_skipped_without_reconnecting() {
    let control_plane = FakeControlPlane::start().await;
    control_plane.push_session(Session::open(&[
        "data: {\"hello\":1}\n\n",
        "data: {\"action\":\"refetch\",\"namespace\":5}\n\n",
        REFETCH,
    ]));
    let cluster = Arc::new(FakeCluster::with_web_service());
    let (ctx, _rx) = agent_context(&control_plane, "http://127.0.0.1:1", cluster);

    let supervisor = tokio::spawn(event_channel::run(ctx.clone()));
    // One report on registration plus one per refetch.
    wait_until("both refetch reports", || {
        control_plane.with_log(|log| log.states.len() >= 3)
    })
    .await;
    assert_eq!(control_plane.with_log(|log| log.registrations.len()), 1);
    assert!(ctx.channel_status.read().await.connected);

    ctx.shutdown_and_wait().await;
    supervisor.await.unwrap();
}

#[tokio::test]
async fn test_closed_stream_triggers_reregistration() {
    let control_plane = FakeControlPlane::start().await;
    control_plane.push_session(Session::closing(&[REFETCH]));
    control_plane.push_session(Session::closing(&["not a frame\n"]));
    let cluster = Arc::new(FakeCluster::with_web_service());
    let (ctx, _rx) = agent_context(&control_plane, "http://127.0.0.1:1", cluster);

    let supervisor = tokio::spawn(event_channel::run(ctx.clone()));
    wait_until("third registration", || {
        control_plane.with_log(|log| log.registrations.len() >= 3)
    })
    .await;

    ctx.shutdown_and_wait().await;
    supervisor.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_control_plane_is_retried_until_shutdown() {
    let cluster = Arc::new(FakeCluster::with_web_service());
    let control_plane = FakeControlPlane::start().await;
    let (mut ctx, _rx) = agent_context(&control_plane, "http://127.0.0.1:1", cluster);
    ctx.control_plane = skiff_agent::control_plane::ControlPlane::new(
        reqwest::Client::new(),
        "http://127.0.0.1:1",
        TOKEN,
    );

    let supervisor = tokio::spawn(event_channel::run(ctx.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!supervisor.is_finished());
    assert!(!ctx.channel_status.read().await.connected);

    ctx.shutdown_and_wait().await;
    tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .expect("supervisor did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_podlogs_event_posts_logs_of_every_selected_pod() {
    let control_plane = FakeControlPlane::start().await;
    control_plane.push_session(Session::open(&[PODLOGS]));
    let cluster = Arc::new(FakeCluster::with_web_service());
    let (ctx, _rx) = agent_context(&control_plane, "http://127.0.0.1:1", cluster.clone());

    let supervisor = tokio::spawn(event_channel::run(ctx.clone()));
    wait_until("pod logs", || {
        control_plane.with_log(|log| log.pod_logs.len() == 2)
    })
    .await;

    control_plane.with_log(|log| {
        let mut posted: Vec<_> = log
            .pod_logs
            .iter()
            .map(|p| (p.name.as_str(), p.logs.as_str()))
            .collect();
        posted.sort();
        assert_eq!(
            posted,
            vec![("web-1", "GET / 200\n"), ("web-2", "GET /health 200\n")]
        );
    });
    for (_, since_seconds, tail_lines) in cluster.log_requests.lock().unwrap().iter() {
        assert_eq!(*since_seconds, 5 * 1000 * 60);
        assert_eq!(*tail_lines, 100);
    }
    assert_eq!(ctx.log_streams.len(), 1);

    ctx.shutdown_and_wait().await;
    supervisor.await.unwrap();
}

#[tokio::test]
async fn test_stoplogs_cancels_a_running_job() {
    let control_plane = FakeControlPlane::start().await;
    control_plane.push_session(Session::open(&[PODLOGS]));
    let cluster = Arc::new(FakeCluster {
        block_logs: true,
        ..FakeCluster::with_web_service()
    });
    let (ctx, _rx) = agent_context(&control_plane, "http://127.0.0.1:1", cluster.clone());

    let supervisor = tokio::spawn(event_channel::run(ctx.clone()));
    wait_until("blocked log read", || {
        !cluster.log_requests.lock().unwrap().is_empty()
    })
    .await;

    // Deliver the stop through the same dispatch path the stream uses.
    let stop: skiff_models::models::Event =
        serde_json::from_str(STOPLOGS.trim_start_matches("data: ").trim()).unwrap();
    event_channel::dispatch(&ctx, stop);

    // Only the stream consumer is left once the log job has returned.
    wait_until("log job to return", || ctx.tracker.len() == 1).await;
    assert_eq!(cluster.log_requests.lock().unwrap().len(), 1);

    ctx.shutdown_and_wait().await;
    supervisor.await.unwrap();

    assert!(control_plane.with_log(|log| log.pod_logs.is_empty()));
    assert!(!ctx.log_streams.stop(&ServiceKey::new("apps", "other")));
}
