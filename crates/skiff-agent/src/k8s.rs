/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Kubernetes Module
//!
//! Client construction and the Kubernetes-backed implementations of
//! [`ClusterReader`] and [`InventorySource`].
//!
//! ```rust,ignore
//! let client = create_k8s_client(None).await?;
//! let cluster = Arc::new(KubeCluster::new(client));
//! ```
//!
//! With no kubeconfig path the in-cluster service account (or the default
//! kubeconfig when running outside a cluster) is used.

use crate::pod_logs::{ClusterReader, DeploymentView, PodView, ServiceView};
use crate::state::InventorySource;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use skiff_models::models::ServiceState;
use skiff_utils::logging::prelude::*;

/// Creates a Kubernetes client and verifies the API server answers.
pub async fn create_k8s_client(
    kubeconfig_path: Option<&str>,
) -> Result<Client, Box<dyn std::error::Error>> {
    let client = match kubeconfig_path {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| format!("Failed to read kubeconfig {}: {}", path, e))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| format!("Failed to load kubeconfig {}: {}", path, e))?;
            Client::try_from(config)
                .map_err(|e| format!("Failed to create Kubernetes client: {}", e))?
        }
        None => Client::try_default()
            .await
            .map_err(|e| format!("Failed to create Kubernetes client: {}", e))?,
    };

    let version = client
        .apiserver_version()
        .await
        .map_err(|e| format!("Failed to connect to Kubernetes cluster: {}", e))?;

    info!(
        "Successfully connected to Kubernetes cluster (v{}.{})",
        version.major, version.minor
    );
    Ok(client)
}

/// Namespaced reads against a live cluster.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Maps a Deployment to the inventory record reported to the control plane.
pub fn deployment_state(deployment: &Deployment) -> ServiceState {
    let spec = deployment.spec.as_ref();
    let image = spec
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|pod| pod.containers.first())
        .and_then(|c| c.image.clone());

    ServiceState {
        name: deployment.name_any(),
        namespace: deployment.namespace().unwrap_or_default(),
        image,
        replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
        available_replicas: deployment
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0),
        labels: deployment.labels().clone(),
    }
}

#[async_trait]
impl InventorySource for KubeCluster {
    async fn inventory(&self, namespace: &str) -> Result<Vec<ServiceState>, kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployments = api.list(&ListParams::default()).await?;
        Ok(deployments.items.iter().map(deployment_state).collect())
    }
}

#[async_trait]
impl ClusterReader for KubeCluster {
    async fn services(&self, namespace: &str) -> Result<Vec<ServiceView>, kube::Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let services = api.list(&ListParams::default()).await?;
        Ok(services
            .items
            .into_iter()
            .map(|s| ServiceView {
                name: s.name_any(),
                annotations: s.annotations().clone(),
                selector: s.spec.and_then(|spec| spec.selector).unwrap_or_default(),
            })
            .collect())
    }

    async fn deployments(&self, namespace: &str) -> Result<Vec<DeploymentView>, kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployments = api.list(&ListParams::default()).await?;
        Ok(deployments
            .items
            .into_iter()
            .map(|d| DeploymentView {
                name: d.name_any(),
                namespace: d.namespace().unwrap_or_default(),
                selector: d
                    .spec
                    .and_then(|spec| spec.selector.match_labels)
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn pods(&self, namespace: &str) -> Result<Vec<PodView>, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default()).await?;
        Ok(pods
            .items
            .into_iter()
            .map(|p| PodView {
                name: p.name_any(),
                namespace: p.namespace().unwrap_or_default(),
                labels: p.labels().clone(),
            })
            .collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        since_seconds: i64,
        tail_lines: i64,
    ) -> Result<String, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            since_seconds: Some(since_seconds),
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };
        trace!("Fetching logs of pod {}/{}", namespace, pod);
        api.logs(pod, &params).await
    }
}
