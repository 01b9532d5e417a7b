/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Pod Log Streamer
//!
//! Captures recent log output of every pod backing an integrated service and
//! posts it to the control plane, one `{name, logs}` record per pod.
//!
//! ## Pod selection
//!
//! Pods are resolved by joining three listings of the namespace:
//!
//! ```mermaid
//! flowchart LR
//!     S[Service with integration annotation] -- selector == selector --> D[Deployment]
//!     D -- pod labels contain selector --> P[Pod]
//! ```
//!
//! A pod is selected when some Deployment's selector is exactly equal to the
//! selector of an integrated Service, the pod's labels contain every pair of
//! that Deployment selector, and both live in the same namespace.
//!
//! ## Time window
//!
//! `sinceTime` arrives in minutes. The window passed to the log API is
//! `sinceTime * 1000` minutes; see DESIGN.md for why the factor is kept.

use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::log_streams::LogStreamHandle;
use async_trait::async_trait;
use skiff_models::models::{PodLogs, ServiceKey};
use skiff_utils::logging::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Lines requested per pod.
pub const TAIL_LINES: i64 = 100;
/// Factor applied to the requested window before it is sent to the log API.
pub const SINCE_TIME_MULTIPLIER: i64 = 1000;

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceView {
    pub name: String,
    pub annotations: Labels,
    pub selector: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentView {
    pub name: String,
    pub namespace: String,
    pub selector: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodView {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
}

/// Read access to the cluster objects pod-log jobs need.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    async fn services(&self, namespace: &str) -> Result<Vec<ServiceView>, kube::Error>;
    async fn deployments(&self, namespace: &str) -> Result<Vec<DeploymentView>, kube::Error>;
    async fn pods(&self, namespace: &str) -> Result<Vec<PodView>, kube::Error>;
    /// Last `tail_lines` lines written within the past `since_seconds`.
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        since_seconds: i64,
        tail_lines: i64,
    ) -> Result<String, kube::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum PodLogError {
    #[error("invalid sinceTime '{0}': expected whole minutes")]
    InvalidSinceTime(String),
    #[error("cluster lookup failed: {0}")]
    Cluster(#[from] kube::Error),
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
    #[error("log job was stopped")]
    Cancelled,
}

/// Parses `sinceTime` and converts it to the seconds sent to the log API.
pub fn since_seconds(since_time: &str) -> Result<i64, PodLogError> {
    let minutes: i64 = since_time
        .trim()
        .parse()
        .map_err(|_| PodLogError::InvalidSinceTime(since_time.to_string()))?;
    if minutes < 0 {
        return Err(PodLogError::InvalidSinceTime(since_time.to_string()));
    }
    minutes
        .checked_mul(SINCE_TIME_MULTIPLIER)
        .and_then(|m| m.checked_mul(60))
        .ok_or_else(|| PodLogError::InvalidSinceTime(since_time.to_string()))
}

fn contains_all(labels: &Labels, selector: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|value| value == v))
}

/// Resolves the pods backing the integrated services of a namespace.
///
/// `service` restricts the join to the integrated service of that name; an
/// empty name keeps every integrated service. An empty service selector
/// matches an empty deployment selector, which every pod in that namespace
/// satisfies.
/// Pods are returned once each, in listing order.
pub fn select_pods<'a>(
    services: &[ServiceView],
    deployments: &[DeploymentView],
    pods: &'a [PodView],
    annotation: &str,
    service: &str,
) -> Vec<&'a PodView> {
    let service_selectors: Vec<&Labels> = services
        .iter()
        .filter(|s| s.annotations.contains_key(annotation))
        .filter(|s| service.is_empty() || s.name == service)
        .map(|s| &s.selector)
        .collect();

    let matching: Vec<&DeploymentView> = deployments
        .iter()
        .filter(|d| service_selectors.iter().any(|s| **s == d.selector))
        .collect();

    let mut seen = BTreeSet::new();
    pods.iter()
        .filter(|p| {
            matching
                .iter()
                .any(|d| p.namespace == d.namespace && contains_all(&p.labels, &d.selector))
        })
        .filter(|p| seen.insert((p.namespace.clone(), p.name.clone())))
        .collect()
}

/// Runs pod-log jobs against a [`ClusterReader`].
#[derive(Clone)]
pub struct PodLogStreamer {
    cluster: Arc<dyn ClusterReader>,
    control_plane: ControlPlane,
    annotation: String,
}

impl PodLogStreamer {
    pub fn new(cluster: Arc<dyn ClusterReader>, control_plane: ControlPlane, annotation: &str) -> Self {
        Self {
            cluster,
            control_plane,
            annotation: annotation.to_string(),
        }
    }

    /// Captures and posts the logs of every pod behind `key`.
    ///
    /// Returns the number of pods posted. The first lookup, log or post
    /// failure aborts the remaining pods; signalling `handle` aborts the job
    /// at its next await point.
    pub async fn fetch(
        &self,
        key: &ServiceKey,
        since_time: &str,
        handle: &LogStreamHandle,
    ) -> Result<usize, PodLogError> {
        let since_seconds = since_seconds(since_time)?;
        tokio::select! {
            _ = handle.stopped() => Err(PodLogError::Cancelled),
            result = self.collect(key, since_seconds) => result,
        }
    }

    async fn collect(&self, key: &ServiceKey, since_seconds: i64) -> Result<usize, PodLogError> {
        let namespace = key.namespace.as_str();
        let (services, deployments, pods) = tokio::try_join!(
            self.cluster.services(namespace),
            self.cluster.deployments(namespace),
            self.cluster.pods(namespace),
        )?;

        let selected = select_pods(&services, &deployments, &pods, &self.annotation, &key.service);
        debug!("Selected {} pods for {}", selected.len(), key);

        for pod in &selected {
            let logs = self
                .cluster
                .pod_logs(&pod.namespace, &pod.name, since_seconds, TAIL_LINES)
                .await?;
            self.control_plane
                .post_pod_logs(&PodLogs {
                    name: pod.name.clone(),
                    logs,
                })
                .await?;
        }
        Ok(selected.len())
    }
}
