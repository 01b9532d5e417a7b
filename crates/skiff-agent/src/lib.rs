/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Skiff Agent
//!
//! The cluster-resident half of Skiff. The agent keeps a self-healing event
//! stream open to the control plane and acts on what it receives: it reports
//! the namespace's service inventory, captures pod logs on demand and drives
//! remote image builds whose progress is relayed back as structured records.
//!
//! ## Architecture
//!
//! ```mermaid
//! flowchart TD
//!     EC[event_channel] -->|refetch| SR[state]
//!     EC -->|podlogs / stoplogs| LS[log_streams]
//!     LS --> PL[pod_logs]
//!     EC -->|imagebuild| IB[image_build]
//!     IB -->|multipart upload| BS[(build service)]
//!     IB -->|imageBuildLogs| RL[relay]
//!     SR --> CP[(control plane)]
//!     PL --> CP
//!     RL --> CP
//! ```
//!
//! - [`event_channel`]: registration, line protocol decoding, reconnect loop and dispatch
//! - [`state`]: service inventory snapshots
//! - [`log_streams`]: cancellation handles of running log jobs
//! - [`pod_logs`]: pod selection and log capture
//! - [`image_build`]: source download, build service upload, progress batching and relay
//! - [`control_plane`]: HTTP calls to the control plane
//! - [`k8s`]: Kubernetes client and cluster reads
//! - [`health`] / [`metrics`]: probes and Prometheus metrics
//! - [`context`]: the shared [`context::AgentContext`]
//!
//! ## Configuration
//!
//! ```toml
//! [agent]
//! control_plane_url = "http://control-plane:8080"
//! token = "agent-key"
//! name = "production"
//! namespace = "apps"
//! build_service_url = "http://skiff-builder:8090"
//! ```

pub mod cli;
pub mod context;
pub mod control_plane;
pub mod event_channel;
pub mod health;
pub mod image_build;
pub mod k8s;
pub mod log_streams;
pub mod metrics;
pub mod pod_logs;
pub mod state;
