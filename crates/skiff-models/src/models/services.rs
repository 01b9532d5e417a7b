/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One service inventory record posted to `/agent/state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub replicas: i32,
    pub available_replicas: i32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Captured log text of one pod, posted to `/agent/podLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodLogs {
    pub name: String,
    pub logs: String,
}
