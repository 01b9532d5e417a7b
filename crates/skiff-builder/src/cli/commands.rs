/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Startup of the build service process.

use crate::api::{self, BuildServiceConfig};
use skiff_utils::config::Settings;
use skiff_utils::logging::prelude::*;
use skiff_utils::telemetry;
use tokio::signal::ctrl_c;

/// Loads configuration, installs logging and serves until interrupted.
pub async fn serve(config_file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::new(config_file)?;
    telemetry::init(
        &settings.telemetry.for_builder(),
        &settings.log.level,
        &settings.log.format,
    )?;
    info!("Starting Skiff image build service");

    let service_config = BuildServiceConfig::from(&settings.builder);
    tokio::fs::create_dir_all(&service_config.work_dir).await?;
    info!(
        "Builds run '{}' under {}",
        service_config.builder_program,
        service_config.work_dir.display()
    );

    let listener = tokio::net::TcpListener::bind(&settings.builder.listen_addr)
        .await
        .map_err(|e| {
            error!("Failed to bind {}: {}", settings.builder.listen_addr, e);
            Box::new(e) as Box<dyn std::error::Error>
        })?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, api::configure_routes(service_config))
        .with_graceful_shutdown(async {
            if ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
            }
        })
        .await?;

    telemetry::shutdown();
    info!("Image build service stopped");
    Ok(())
}
