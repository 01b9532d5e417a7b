/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Events pushed by the control plane over the agent's event stream.

use crate::models::image_builds::ImageBuildTrigger;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One decoded event-stream payload: the JSON object exactly as sent.
///
/// Fields are only interpreted by [`Event::into_action`]; a well-formed object
/// with missing or mistyped fields is still an event, just not an actionable one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    pub fields: Map<String, Value>,
}

/// Identity of one log-follow operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub namespace: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service)
    }
}

/// Typed view of an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    /// Resend the full service inventory.
    Refetch,
    /// Capture recent logs for every pod backing a service.
    PodLogs { key: ServiceKey, since_time: String },
    /// Cancel the log job registered under a service.
    StopLogs(ServiceKey),
    /// Build an image from a source bundle held by the control plane.
    ImageBuild(ImageBuildTrigger),
    /// Anything the agent does not handle.
    Unknown(String),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EventError {
    #[error("event has no string 'action'")]
    MissingAction,
    #[error("event '{action}' is missing field '{field}'")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
    #[error("event '{action}' has field '{field}' of the wrong type")]
    InvalidField {
        action: &'static str,
        field: &'static str,
    },
}

impl Event {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Convenience constructor used by tests and fakes.
    pub fn with_action(action: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("action".to_string(), Value::String(action.into()));
        Self { fields }
    }

    /// The `action` field, if present and a string.
    pub fn action(&self) -> Option<&str> {
        self.fields.get("action").and_then(Value::as_str)
    }

    /// Interprets the event according to its `action`.
    pub fn into_action(self) -> Result<AgentAction, EventError> {
        let action = self.action().ok_or(EventError::MissingAction)?;
        let field = |action, name| self.string_field(action, name);
        match action {
            "refetch" => Ok(AgentAction::Refetch),
            "podlogs" => Ok(AgentAction::PodLogs {
                key: ServiceKey::new(field("podlogs", "namespace")?, field("podlogs", "serviceName")?),
                since_time: self.minutes_field("podlogs", "sinceTime")?,
            }),
            "stoplogs" => Ok(AgentAction::StopLogs(ServiceKey::new(
                field("stoplogs", "namespace")?,
                field("stoplogs", "serviceName")?,
            ))),
            "imagebuild" => Ok(AgentAction::ImageBuild(ImageBuildTrigger {
                build_id: field("imagebuild", "buildId")?,
                image: field("imagebuild", "image")?,
                tag: field("imagebuild", "tag")?,
                app: field("imagebuild", "app")?,
                triggering_user: match self.fields.get("triggeringUser") {
                    None | Some(Value::Null) => String::new(),
                    Some(_) => field("imagebuild", "triggeringUser")?,
                },
            })),
            other => Ok(AgentAction::Unknown(other.to_string())),
        }
    }

    fn string_field(&self, action: &'static str, field: &'static str) -> Result<String, EventError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Err(EventError::MissingField { action, field }),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(EventError::InvalidField { action, field }),
        }
    }

    /// Minutes are sent either as a JSON string or a number.
    fn minutes_field(&self, action: &'static str, field: &'static str) -> Result<String, EventError> {
        match self.fields.get(field) {
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => self.string_field(action, field),
        }
    }
}
