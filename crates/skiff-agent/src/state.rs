/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Service inventory reporting.

use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::metrics;
use async_trait::async_trait;
use skiff_models::models::ServiceState;
use skiff_utils::logging::prelude::*;
use std::sync::Arc;

/// Source of the service inventory of one namespace.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn inventory(&self, namespace: &str) -> Result<Vec<ServiceState>, kube::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to read service inventory: {0}")]
    Inventory(#[from] kube::Error),
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

/// Posts the full inventory of the observed namespace to the control plane.
#[derive(Clone)]
pub struct StateReporter {
    inventory: Arc<dyn InventorySource>,
    control_plane: ControlPlane,
    namespace: String,
}

impl StateReporter {
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        control_plane: ControlPlane,
        namespace: &str,
    ) -> Self {
        Self {
            inventory,
            control_plane,
            namespace: namespace.to_string(),
        }
    }

    /// Sends one full state snapshot under environment `env`. No retry.
    pub async fn report(&self, env: &str) -> Result<usize, StateError> {
        let result = self.send_snapshot(env).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::state_reports_total()
            .with_label_values(&[status])
            .inc();
        result
    }

    async fn send_snapshot(&self, env: &str) -> Result<usize, StateError> {
        let services = self.inventory.inventory(&self.namespace).await?;
        self.control_plane.post_state(env, &services).await?;
        info!(
            "Reported {} services in namespace '{}' for environment '{}'",
            services.len(),
            self.namespace,
            env
        );
        Ok(services.len())
    }
}
