/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! Prometheus metrics for the Skiff agent: event channel health, dispatched
//! work and the outcome of every job the agent runs on behalf of the control
//! plane.

use prometheus::core::Collector;
use prometheus::{CounterVec, Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use skiff_utils::logging::prelude::*;
use std::sync::OnceLock;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Registers a freshly built collector. Names are static, so failure is a bug.
fn registered<C>(name: &str, built: prometheus::Result<C>) -> C
where
    C: Collector + Clone + 'static,
{
    let collector = built.unwrap_or_else(|e| panic!("Failed to create {}: {}", name, e));
    registry()
        .register(Box::new(collector.clone()))
        .unwrap_or_else(|e| panic!("Failed to register {}: {}", name, e));
    collector
}

fn counter(name: &str, help: &str) -> IntCounter {
    registered(name, IntCounter::with_opts(Opts::new(name, help)))
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    registered(name, CounterVec::new(Opts::new(name, help), labels))
}

/// Registration cycles that ended, successful or not
pub fn event_channel_reconnects_total() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        counter(
            "skiff_agent_event_channel_reconnects_total",
            "Total number of event channel reconnect cycles",
        )
    })
}

/// 1 while the event channel is connected
pub fn event_channel_connected() -> &'static IntGauge {
    static METRIC: OnceLock<IntGauge> = OnceLock::new();
    METRIC.get_or_init(|| {
        let name = "skiff_agent_event_channel_connected";
        registered(
            name,
            IntGauge::with_opts(Opts::new(name, "Whether the event channel is currently connected")),
        )
    })
}

/// Labels: action (refetch/podlogs/stoplogs/imagebuild/unknown/invalid)
pub fn events_received_total() -> &'static CounterVec {
    static METRIC: OnceLock<CounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        counter_vec(
            "skiff_agent_events_received_total",
            "Total number of events received by action",
            &["action"],
        )
    })
}

/// Event streams torn down because of malformed frames
pub fn protocol_errors_total() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        counter(
            "skiff_agent_protocol_errors_total",
            "Total number of event stream protocol errors",
        )
    })
}

/// Labels: status (success/notBuilt/error)
pub fn image_builds_total() -> &'static CounterVec {
    static METRIC: OnceLock<CounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        counter_vec(
            "skiff_agent_image_builds_total",
            "Total number of image builds by terminal status",
            &["status"],
        )
    })
}

/// Labels: outcome (success/error/cancelled)
pub fn pod_log_jobs_total() -> &'static CounterVec {
    static METRIC: OnceLock<CounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        counter_vec(
            "skiff_agent_pod_log_jobs_total",
            "Total number of pod log jobs by outcome",
            &["outcome"],
        )
    })
}

/// Labels: status (success/error)
pub fn state_reports_total() -> &'static CounterVec {
    static METRIC: OnceLock<CounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        counter_vec(
            "skiff_agent_state_reports_total",
            "Total number of service state reports by status",
            &["status"],
        )
    })
}

/// Prometheus text exposition of every agent metric.
pub fn encode_metrics() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry().gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
