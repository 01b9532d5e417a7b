/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Control Plane Client
//!
//! Thin HTTP layer over the control plane's agent endpoints. Every request
//! carries `Authorization: BEARER <token>`.
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | GET | `/agent/register?name=&namespace=` | event stream |
//! | POST | `/agent/state?name=` | service inventory |
//! | POST | `/agent/podLogs` | captured pod logs |
//! | GET | `/agent/imagebuild/<buildId>` | source bundle |
//! | POST | `/agent/imagebuild/<buildId>/logs` | build progress envelope |
//!
//! Nothing here retries. Callers decide what a failure means.

use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use skiff_models::models::{PodLogs, ServiceState, WsMessage};
use skiff_utils::config::Agent;
use skiff_utils::logging::prelude::*;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("failed to write response body: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the HTTP client shared by every outbound call of the agent.
///
/// Only a connect timeout is applied; the event stream is a long poll.
pub fn http_client(config: &Agent) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
}

#[derive(Debug, Clone)]
pub struct ControlPlane {
    client: Client,
    base_url: String,
    token: String,
}

impl ControlPlane {
    pub fn new(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("BEARER {}", self.token))
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, ControlPlaneError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|source| ControlPlaneError::Transport {
                url: url.to_string(),
                source,
            })?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ControlPlaneError::Status {
            url: url.to_string(),
            status,
            body,
        })
    }

    /// Opens the long-lived event stream. The caller reads the body.
    pub async fn open_event_stream(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Response, ControlPlaneError> {
        let url = format!("{}/agent/register", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("name", name), ("namespace", namespace)]);
        self.send(&url, request).await
    }

    pub async fn post_state(
        &self,
        name: &str,
        services: &[ServiceState],
    ) -> Result<(), ControlPlaneError> {
        let url = format!("{}/agent/state", self.base_url);
        let request = self.client.post(&url).query(&[("name", name)]).json(services);
        self.send(&url, request).await?;
        trace!("Posted state for {} services", services.len());
        Ok(())
    }

    pub async fn post_pod_logs(&self, logs: &PodLogs) -> Result<(), ControlPlaneError> {
        let url = format!("{}/agent/podLogs", self.base_url);
        let request = self.client.post(&url).json(logs);
        self.send(&url, request).await?;
        Ok(())
    }

    /// Streams the source bundle of `build_id` into `dest`, returning its size.
    pub async fn download_bundle<W>(
        &self,
        build_id: &str,
        dest: &mut W,
    ) -> Result<u64, ControlPlaneError>
    where
        W: AsyncWrite + Unpin,
    {
        let url = format!("{}/agent/imagebuild/{}", self.base_url, build_id);
        let response = self.send(&url, self.client.get(&url)).await?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| ControlPlaneError::Transport {
                url: url.clone(),
                source,
            })?;
            dest.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        dest.flush().await?;
        debug!("Downloaded {} byte bundle for build {}", written, build_id);
        Ok(written)
    }

    /// Forwards one build progress envelope for fan-out to the triggering user.
    pub async fn relay_build_logs(
        &self,
        build_id: &str,
        message: &WsMessage,
    ) -> Result<(), ControlPlaneError> {
        let url = format!("{}/agent/imagebuild/{}/logs", self.base_url, build_id);
        let request = self.client.post(&url).json(message);
        self.send(&url, request).await?;
        Ok(())
    }
}
