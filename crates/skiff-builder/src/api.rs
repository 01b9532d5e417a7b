/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Build Service API
//!
//! - `POST /build-image`: multipart `{image, tag, app, configJson?, data=<tar.gz>}`
//! - `GET /healthz`: liveness
//!
//! The build response is always `200 OK` with a chunked `text/plain` body.
//! Callers must read the final chunk: `IMAGE BUILT` on success and
//! `IMAGE BUILD ERROR` on any failure. Only malformed requests (missing
//! fields, an unusable `app` name) are rejected with `400` before streaming.
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Service
//!     participant Builder
//!
//!     Client->>Service: POST /build-image (multipart)
//!     Service-->>Client: 200 OK (headers)
//!     Service->>Service: write configJson, extract tarball
//!     Service->>Builder: creator -app=<dir> -log-level=debug <image>:<tag>
//!     loop while builder runs
//!         Builder-->>Service: stdout/stderr chunk
//!         Service-->>Client: body chunk
//!     end
//!     Service-->>Client: IMAGE BUILT | IMAGE BUILD ERROR
//! ```

use crate::extract::{self, ExtractError};
use crate::runner::{self, BodySender, RunError};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use skiff_models::models::image_builds::{IMAGE_BUILD_ERROR, IMAGE_BUILT};
use skiff_utils::logging::prelude::*;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

const BODY_CHANNEL_CAPACITY: usize = 32;

/// Runtime configuration of the build service.
#[derive(Debug, Clone)]
pub struct BuildServiceConfig {
    pub work_dir: PathBuf,
    pub builder_program: String,
    pub docker_config_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl From<&skiff_utils::config::Builder> for BuildServiceConfig {
    fn from(settings: &skiff_utils::config::Builder) -> Self {
        Self {
            work_dir: PathBuf::from(&settings.work_dir),
            builder_program: settings.builder_program.clone(),
            docker_config_dir: PathBuf::from(&settings.docker_config_dir),
            max_upload_bytes: settings.max_upload_bytes,
        }
    }
}

/// Errors that abort a build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing multipart field '{0}'")]
    MissingField(&'static str),
    #[error("invalid app name '{0}'")]
    InvalidApp(String),
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),
    #[error("failed to write registry config: {0}")]
    RegistryConfig(#[source] io::Error),
    #[error("failed to prepare build directory: {0}")]
    Workspace(#[source] io::Error),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Run(#[from] RunError),
}

impl IntoResponse for BuildError {
    fn into_response(self) -> Response {
        let status = match self {
            BuildError::MissingField(_) | BuildError::InvalidApp(_) | BuildError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// A fully received build request.
#[derive(Debug)]
pub struct BuildRequest {
    pub image: String,
    pub tag: String,
    pub app: String,
    pub config_json: Option<String>,
    pub data: Bytes,
}

impl BuildRequest {
    /// Reads all multipart fields; unknown fields are ignored.
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, BuildError> {
        let mut image = None;
        let mut tag = None;
        let mut app = None;
        let mut config_json = None;
        let mut data = None;

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "image" => image = Some(field.text().await?),
                "tag" => tag = Some(field.text().await?),
                "app" => app = Some(field.text().await?),
                "configJson" => config_json = Some(field.text().await?),
                "data" => data = Some(field.bytes().await?),
                other => debug!("Ignoring multipart field '{}'", other),
            }
        }

        let app = app.ok_or(BuildError::MissingField("app"))?;
        if !is_single_component(&app) {
            return Err(BuildError::InvalidApp(app));
        }

        Ok(Self {
            image: image.ok_or(BuildError::MissingField("image"))?,
            tag: tag.ok_or(BuildError::MissingField("tag"))?,
            app,
            config_json: config_json.filter(|c| !c.is_empty()),
            data: data.ok_or(BuildError::MissingField("data"))?,
        })
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Configures and returns the build service router.
pub fn configure_routes(config: BuildServiceConfig) -> Router {
    let limit = config.max_upload_bytes;
    Router::new()
        .route("/build-image", post(build_image))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(config))
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn build_image(
    State(config): State<Arc<BuildServiceConfig>>,
    multipart: Multipart,
) -> Result<Response, BuildError> {
    let request = BuildRequest::from_multipart(multipart).await?;
    info!(
        "Received build request for {}:{} (app '{}', {} bytes)",
        request.image,
        request.tag,
        request.app,
        request.data.len()
    );

    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
    tokio::spawn(run_build(config, request, tx));

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

/// Runs one build and writes its output, then exactly one sentinel, to `out`.
///
/// The per-build directory is removed before `out` is dropped, so a reader
/// that sees end-of-body also sees the cleanup.
pub async fn run_build(config: Arc<BuildServiceConfig>, request: BuildRequest, out: BodySender) {
    let image_ref = format!("{}:{}", request.image, request.tag);
    let result = execute(&config, request, &out).await;

    let trailer = match result {
        Ok(()) => {
            info!("Image {} built", image_ref);
            IMAGE_BUILT.to_string()
        }
        Err(e) => {
            error!("Image build for {} failed: {}", image_ref, e);
            format!("\n{}\n{}", e, IMAGE_BUILD_ERROR)
        }
    };
    if out.send(Ok(Bytes::from(trailer))).await.is_err() {
        debug!("Build response for {} closed before the sentinel was written", image_ref);
    }
}

async fn execute(
    config: &BuildServiceConfig,
    request: BuildRequest,
    out: &BodySender,
) -> Result<(), BuildError> {
    if let Some(config_json) = &request.config_json {
        write_registry_config(&config.docker_config_dir, config_json).await?;
    }

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .map_err(BuildError::Workspace)?;
    let workspace = tempfile::Builder::new()
        .prefix("build-")
        .tempdir_in(&config.work_dir)
        .map_err(BuildError::Workspace)?;
    let app_dir = workspace.path().join(&request.app);
    tokio::fs::create_dir_all(&app_dir)
        .await
        .map_err(BuildError::Workspace)?;

    let summary = extract::unpack(request.data, app_dir.clone()).await?;
    info!(
        "Extracted {} files into {}",
        summary.files,
        app_dir.display()
    );

    let command = runner::builder_command(
        &config.builder_program,
        &app_dir,
        &request.image,
        &request.tag,
    );
    let result = runner::run_streaming(command, out).await;

    if let Err(e) = workspace.close() {
        warn!("Failed to remove build directory {}: {}", app_dir.display(), e);
    }
    result.map_err(BuildError::from)
}

/// Persists the registry credentials the builder reads when pushing.
pub async fn write_registry_config(dir: &Path, config_json: &str) -> Result<(), BuildError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(BuildError::RegistryConfig)?;
    tokio::fs::write(dir.join("config.json"), config_json)
        .await
        .map_err(BuildError::RegistryConfig)
}
