/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Components shared by every task the agent runs.

use crate::control_plane::ControlPlane;
use crate::health::{ChannelStatus, HealthState};
use crate::image_build::ImageBuildOrchestrator;
use crate::log_streams::LogStreamRegistry;
use crate::pod_logs::{ClusterReader, PodLogStreamer};
use crate::state::{InventorySource, StateReporter};
use reqwest::Client;
use skiff_models::models::WsMessage;
use skiff_utils::config::Agent;
use skiff_utils::logging::prelude::*;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Everything the event channel and its dispatched jobs need.
///
/// Cheap to clone; clones share the same registry, tracker and shutdown token.
#[derive(Clone)]
pub struct AgentContext {
    pub env_name: String,
    pub namespace: String,
    pub reconnect_delay: Duration,
    pub control_plane: ControlPlane,
    pub state_reporter: StateReporter,
    pub pod_logs: PodLogStreamer,
    pub image_builds: ImageBuildOrchestrator,
    pub log_streams: Arc<LogStreamRegistry>,
    pub channel_status: Arc<RwLock<ChannelStatus>>,
    pub tracker: TaskTracker,
    pub shutdown: CancellationToken,
}

impl AgentContext {
    pub fn new(
        config: &Agent,
        client: Client,
        inventory: Arc<dyn InventorySource>,
        cluster: Arc<dyn ClusterReader>,
        build_events: mpsc::Sender<WsMessage>,
    ) -> Self {
        let control_plane = ControlPlane::new(client.clone(), &config.control_plane_url, &config.token);
        Self {
            env_name: config.name.clone(),
            namespace: config.namespace.clone(),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            state_reporter: StateReporter::new(inventory, control_plane.clone(), &config.namespace),
            pod_logs: PodLogStreamer::new(
                cluster,
                control_plane.clone(),
                &config.integration_annotation,
            ),
            image_builds: ImageBuildOrchestrator::new(
                control_plane.clone(),
                client,
                &config.build_service_url,
                build_events,
            ),
            control_plane,
            log_streams: Arc::new(LogStreamRegistry::new()),
            channel_status: Arc::new(RwLock::new(ChannelStatus::default())),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn health_state(&self) -> HealthState {
        HealthState {
            channel_status: self.channel_status.clone(),
            start_time: SystemTime::now(),
        }
    }

    /// Stops accepting work, signals every job and waits for them to return.
    pub async fn shutdown_and_wait(&self) {
        self.tracker.close();
        self.shutdown.cancel();
        let stopped = self.log_streams.stop_all();
        debug!("Signalled {} log streams", stopped);
        self.tracker.wait().await;
        info!("All agent tasks finished");
    }
}
