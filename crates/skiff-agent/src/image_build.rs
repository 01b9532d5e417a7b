/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Image Build Orchestrator
//!
//! Drives one remote image build end to end and reports its progress.
//!
//! ```mermaid
//! sequenceDiagram
//!     participant CP as Control Plane
//!     participant Agent
//!     participant BS as Build Service
//!
//!     Agent->>CP: GET /agent/imagebuild/<buildId>
//!     CP-->>Agent: source bundle (tar.gz)
//!     Agent->>BS: POST /build-image (multipart)
//!     loop response body
//!         BS-->>Agent: builder output
//!         Agent->>CP: imageBuildLogs {status: running}
//!     end
//!     Agent->>CP: imageBuildLogs {status: success | notBuilt | error}
//! ```
//!
//! Progress records are pushed onto a bounded channel as `imageBuildLogs`
//! envelopes; [`relay_build_events`] drains that channel to the control plane.
//! Every build produces exactly one terminal record.

use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::metrics;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use skiff_models::models::image_builds::IMAGE_BUILT;
use skiff_models::models::{BuildStatus, ImageBuildLogs, ImageBuildTrigger, WsMessage};
use skiff_utils::logging::prelude::*;
use std::io::SeekFrom;
use tokio::io::AsyncSeekExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// Buffered bytes above which a `running` record is emitted.
pub const BATCH_THRESHOLD: usize = 1000;

/// Groups build output into progress records.
///
/// The first complete line is always emitted on its own. After that, lines
/// accumulate until the buffer holds more than [`BATCH_THRESHOLD`] bytes.
#[derive(Debug, Default)]
pub struct ProgressBatcher {
    partial: Vec<u8>,
    buffer: String,
    last_fragment: String,
    emitted_first: bool,
}

impl ProgressBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw output; returns the batches that are due for emission.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut batches = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).into_owned();
            self.buffer.push_str(&line);
            self.last_fragment = line;

            if !self.emitted_first || self.buffer.len() > BATCH_THRESHOLD {
                self.emitted_first = true;
                batches.push(std::mem::take(&mut self.buffer));
            }
        }
        batches
    }

    /// Everything received but not yet emitted, including an unterminated line.
    pub fn pending(&mut self) -> String {
        if !self.partial.is_empty() {
            let tail = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            self.buffer.push_str(&tail);
            self.last_fragment = tail;
        }
        std::mem::take(&mut self.buffer)
    }

    /// Closes the batch at end of stream: `success` iff the last fragment
    /// ends with `IMAGE BUILT`, otherwise `notBuilt`.
    pub fn finish(mut self) -> (BuildStatus, String) {
        let remaining = self.pending();
        let status = if self.last_fragment.trim_end().ends_with(IMAGE_BUILT) {
            BuildStatus::Success
        } else {
            BuildStatus::NotBuilt
        };
        (status, remaining)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to download source bundle: {0}")]
    Download(#[from] ControlPlaneError),
    #[error("failed to stage source bundle: {0}")]
    Staging(#[from] std::io::Error),
    #[error("build service request failed: {0}")]
    Upload(#[source] reqwest::Error),
    #[error("build service returned {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("agent is shutting down")]
    Shutdown,
}

/// Downloads source bundles, hands them to the build service and reports progress.
#[derive(Clone)]
pub struct ImageBuildOrchestrator {
    control_plane: ControlPlane,
    client: Client,
    build_service_url: String,
    events: mpsc::Sender<WsMessage>,
}

impl ImageBuildOrchestrator {
    pub fn new(
        control_plane: ControlPlane,
        client: Client,
        build_service_url: &str,
        events: mpsc::Sender<WsMessage>,
    ) -> Self {
        Self {
            control_plane,
            client,
            build_service_url: build_service_url.trim_end_matches('/').to_string(),
            events,
        }
    }

    /// Runs one build and returns its terminal status.
    pub async fn build(&self, trigger: &ImageBuildTrigger, shutdown: &CancellationToken) -> BuildStatus {
        info!(
            "Starting image build {} for {}:{}",
            trigger.build_id, trigger.image, trigger.tag
        );
        let (status, log_line) = tokio::select! {
            _ = shutdown.cancelled() => (BuildStatus::Error, BuildError::Shutdown.to_string()),
            outcome = self.run(trigger) => match outcome {
                Ok(terminal) => terminal,
                Err(e) => {
                    error!("Image build {} failed: {}", trigger.build_id, e);
                    (BuildStatus::Error, e.to_string())
                }
            },
        };

        self.emit(trigger, status, log_line).await;
        metrics::image_builds_total()
            .with_label_values(&[status.as_str()])
            .inc();
        info!("Image build {} finished: {}", trigger.build_id, status.as_str());
        status
    }

    /// Everything up to, but not including, the terminal record.
    async fn run(&self, trigger: &ImageBuildTrigger) -> Result<(BuildStatus, String), BuildError> {
        let mut bundle = tokio::fs::File::from_std(tempfile::tempfile()?);
        let size = self
            .control_plane
            .download_bundle(&trigger.build_id, &mut bundle)
            .await?;
        bundle.seek(SeekFrom::Start(0)).await?;

        let data = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(bundle)), size)
            .file_name(format!("{}.tar.gz", trigger.app))
            .mime_str("application/gzip")
            .map_err(BuildError::Upload)?;
        let form = Form::new()
            .text("image", trigger.image.clone())
            .text("tag", trigger.tag.clone())
            .text("app", trigger.app.clone())
            .part("data", data);

        let url = format!("{}/build-image", self.build_service_url);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(BuildError::Upload)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BuildError::Rejected { status, body });
        }

        let mut batcher = ProgressBatcher::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => {
                    for batch in batcher.push(&chunk) {
                        self.emit(trigger, BuildStatus::Running, batch).await;
                    }
                }
                Err(e) => {
                    warn!("Build output for {} broke off: {}", trigger.build_id, e);
                    return Ok((BuildStatus::Error, batcher.pending()));
                }
            }
        }
        Ok(batcher.finish())
    }

    async fn emit(&self, trigger: &ImageBuildTrigger, status: BuildStatus, log_line: String) {
        let record = ImageBuildLogs {
            client_id: trigger.triggering_user.clone(),
            build_id: trigger.build_id.clone(),
            status,
            log_line,
        };
        let message = match WsMessage::image_build_logs(&record) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to encode build record for {}: {}", trigger.build_id, e);
                return;
            }
        };
        if self.events.send(message).await.is_err() {
            warn!(
                "Build event channel closed, dropping {} record for {}",
                status.as_str(),
                trigger.build_id
            );
        }
    }
}

/// Forwards build progress envelopes to the control plane until every sender is gone.
pub async fn relay_build_events(mut events: mpsc::Receiver<WsMessage>, control_plane: ControlPlane) {
    while let Some(message) = events.recv().await {
        let Some(record) = message.build_logs() else {
            warn!("Dropping outbound message of type '{}'", message.message_type);
            continue;
        };
        if let Err(e) = control_plane
            .relay_build_logs(&record.build_id, &message)
            .await
        {
            error!(
                "Failed to relay {} record for build {}: {}",
                record.status.as_str(),
                record.build_id,
                e
            );
        }
    }
    debug!("Build event relay stopped");
}
