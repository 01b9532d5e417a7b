/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data models exchanged with the control plane and the build service
pub mod events;
pub mod image_builds;
pub mod services;

pub use events::{AgentAction, Event, EventError, ServiceKey};
pub use image_builds::{BuildStatus, ImageBuildLogs, ImageBuildTrigger, WsMessage};
pub use services::{PodLogs, ServiceState};
