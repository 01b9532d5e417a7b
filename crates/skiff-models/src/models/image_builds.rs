/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Image build trigger, progress records and the push envelope.

use serde::{Deserialize, Serialize};

/// Final body chunk of a build service response when the builder succeeded.
pub const IMAGE_BUILT: &str = "IMAGE BUILT";
/// Final body chunk of a build service response on any failure.
pub const IMAGE_BUILD_ERROR: &str = "IMAGE BUILD ERROR";
/// Envelope type carrying [`ImageBuildLogs`].
pub const IMAGE_BUILD_LOGS_TYPE: &str = "imageBuildLogs";

/// Identifies one build request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuildTrigger {
    pub build_id: String,
    pub image: String,
    pub tag: String,
    pub app: String,
    pub triggering_user: String,
}

/// Progress of a single build. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildStatus {
    Running,
    Success,
    NotBuilt,
    Error,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::NotBuilt => "notBuilt",
            BuildStatus::Error => "error",
        }
    }
}

/// Payload of an `imageBuildLogs` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuildLogs {
    pub client_id: String,
    pub build_id: String,
    pub status: BuildStatus,
    pub log_line: String,
}

/// Outbound push envelope; `payload` is itself JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub payload: String,
}

impl WsMessage {
    pub fn image_build_logs(logs: &ImageBuildLogs) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_type: IMAGE_BUILD_LOGS_TYPE.to_string(),
            payload: serde_json::to_string(logs)?,
        })
    }

    /// Decodes the payload of an `imageBuildLogs` envelope.
    pub fn build_logs(&self) -> Option<ImageBuildLogs> {
        if self.message_type != IMAGE_BUILD_LOGS_TYPE {
            return None;
        }
        serde_json::from_str(&self.payload).ok()
    }
}
