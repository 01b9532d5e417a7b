/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # CLI Commands Module
//!
//! ## Startup Sequence
//!
//! ```mermaid
//! flowchart TD
//!     A[Load Config] --> B[Init Telemetry]
//!     B --> C[Create Kubernetes Client]
//!     C --> D[Build AgentContext]
//!     D --> E[Start Build Event Relay]
//!     E --> F[Start Health Server]
//!     F --> G[Run Event Channel Supervisor]
//!     G --> H{Ctrl-C}
//!     H --> I[Shutdown: close tracker, cancel, StopAll, wait]
//! ```
//!
//! Only an invalid configuration or an unreachable Kubernetes API stops the
//! agent at startup. Control plane outages are retried forever.

use crate::context::AgentContext;
use crate::{control_plane, event_channel, health, image_build, k8s};
use skiff_utils::config::Settings;
use skiff_utils::logging::prelude::*;
use skiff_utils::telemetry;
use std::sync::Arc;
use tokio::signal::ctrl_c;
use tokio::sync::mpsc;

pub async fn start(config_file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Settings::new(config_file)?;
    telemetry::init(
        &config.telemetry.for_agent(),
        &config.log.level,
        &config.log.format,
    )?;
    info!(
        "Starting Skiff agent '{}' for namespace '{}'",
        config.agent.name, config.agent.namespace
    );

    info!("Initializing Kubernetes client");
    let k8s_client = k8s::create_k8s_client(config.agent.kubeconfig_path.as_deref()).await?;
    let cluster = Arc::new(k8s::KubeCluster::new(k8s_client));

    let client = control_plane::http_client(&config.agent)?;
    let (build_tx, build_rx) = mpsc::channel(config.agent.build_event_capacity.max(1));
    let ctx = AgentContext::new(&config.agent, client, cluster.clone(), cluster, build_tx);

    let relay = tokio::spawn(image_build::relay_build_events(
        build_rx,
        ctx.control_plane.clone(),
    ));

    let health_port = config.agent.health_port.unwrap_or(8081);
    info!("Starting health check server on port {}", health_port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", health_port))
        .await
        .map_err(|e| {
            error!("Failed to bind health check server: {}", e);
            Box::new(e) as Box<dyn std::error::Error>
        })?;
    let health_router = health::configure_health_routes(ctx.health_state());
    let health_shutdown = ctx.shutdown.clone();
    let health_server = tokio::spawn(async move {
        let served = axum::serve(listener, health_router)
            .with_graceful_shutdown(async move { health_shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            error!("Health check server failed: {}", e);
        }
    });

    let supervisor = tokio::spawn(event_channel::run(ctx.clone()));

    ctrl_c().await?;
    info!("Received shutdown signal");
    ctx.shutdown_and_wait().await;

    if let Err(e) = supervisor.await {
        error!("Event channel supervisor panicked: {}", e);
    }
    if let Err(e) = health_server.await {
        error!("Health check server task panicked: {}", e);
    }

    // The relay ends once the last build event sender is dropped.
    drop(ctx);
    if let Err(e) = relay.await {
        error!("Build event relay panicked: {}", e);
    }

    telemetry::shutdown();
    info!("Skiff agent stopped");
    Ok(())
}
