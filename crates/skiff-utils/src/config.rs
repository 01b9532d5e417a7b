/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Layered settings for the Skiff agent and image build service.
//!
//! Sources, lowest precedence first:
//!
//! | source | example |
//! |---|---|
//! | embedded `default.toml` | `reconnect_delay_secs = 3` |
//! | optional file passed on the command line | `--config /etc/skiff/agent.toml` |
//! | `SKIFF__`-prefixed environment, `__` between sections | `SKIFF__AGENT__TOKEN=...` |
//!
//! Keys are snake_case in every source, e.g. `agent.control_plane_url` is
//! `SKIFF__AGENT__CONTROL_PLANE_URL`. The agent reads `[agent]`, the build
//! service reads `[builder]`, and both read `[log]` and `[telemetry]`.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

const DEFAULT_SETTINGS: &str = include_str!("../default.toml");

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log: Log,
    pub agent: Agent,
    pub builder: Builder,
    pub telemetry: Telemetry,
}

/// `[agent]`: the cluster-resident process.
#[derive(Debug, Deserialize, Clone)]
pub struct Agent {
    /// Control plane base URL
    pub control_plane_url: String,
    /// Bearer key for the control plane
    pub token: String,
    /// Environment name registered with the control plane
    pub name: String,
    /// Namespace the agent observes
    pub namespace: String,
    /// Kubeconfig path; in-cluster configuration is used when absent
    pub kubeconfig_path: Option<String>,
    /// Fixed delay between event stream registration attempts, in seconds
    pub reconnect_delay_secs: u64,
    /// HTTP connect timeout, in seconds
    pub connect_timeout_secs: u64,
    /// Health check HTTP server port
    pub health_port: Option<u16>,
    /// Image build service base URL
    pub build_service_url: String,
    /// Annotation marking a Service as integrated with the control plane
    pub integration_annotation: String,
    /// Capacity of the outbound build event channel
    pub build_event_capacity: usize,
}

/// `[builder]`: the image build HTTP service.
#[derive(Debug, Deserialize, Clone)]
pub struct Builder {
    /// Socket address the service binds
    pub listen_addr: String,
    /// Directory under which per-build source trees are extracted
    pub work_dir: String,
    /// External builder executable
    pub builder_program: String,
    /// Directory receiving the registry credential `config.json`
    pub docker_config_dir: String,
    /// Largest accepted multipart upload, in bytes
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// Filter level when `RUST_LOG` is unset
    pub level: String,
    /// `text` or `json`
    #[serde(default = "Log::text_format")]
    pub format: String,
}

impl Log {
    fn text_format() -> String {
        String::from("text")
    }
}

/// `[telemetry]`: OTLP trace export, with `[telemetry.agent]` and
/// `[telemetry.builder]` tables overriding individual keys per process.
#[derive(Debug, Deserialize, Clone)]
pub struct Telemetry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "Telemetry::collector")]
    pub otlp_endpoint: String,
    /// `skiff` resolves to the process name
    #[serde(default = "Telemetry::shared_name")]
    pub service_name: String,
    /// Fraction of traces kept, 0.0 to 1.0
    #[serde(default = "Telemetry::one_in_ten")]
    pub sampling_rate: f64,
    #[serde(default)]
    pub agent: TelemetryOverride,
    #[serde(default)]
    pub builder: TelemetryOverride,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryOverride {
    pub enabled: Option<bool>,
    pub otlp_endpoint: Option<String>,
    pub service_name: Option<String>,
    pub sampling_rate: Option<f64>,
}

/// Telemetry settings for one process with overrides applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTelemetry {
    pub enabled: bool,
    pub otlp_endpoint: String,
    pub service_name: String,
    pub sampling_rate: f64,
}

impl Telemetry {
    const SHARED_NAME: &'static str = "skiff";

    fn collector() -> String {
        String::from("http://localhost:4317")
    }

    fn shared_name() -> String {
        String::from(Self::SHARED_NAME)
    }

    fn one_in_ten() -> f64 {
        0.1
    }

    pub fn for_agent(&self) -> ResolvedTelemetry {
        self.resolve(&self.agent, "skiff-agent")
    }

    pub fn for_builder(&self) -> ResolvedTelemetry {
        self.resolve(&self.builder, "skiff-builder")
    }

    fn resolve(&self, overrides: &TelemetryOverride, process: &str) -> ResolvedTelemetry {
        let base_name = if self.service_name == Self::SHARED_NAME {
            process
        } else {
            self.service_name.as_str()
        };
        ResolvedTelemetry {
            enabled: overrides.enabled.unwrap_or(self.enabled),
            otlp_endpoint: overrides
                .otlp_endpoint
                .as_deref()
                .unwrap_or(&self.otlp_endpoint)
                .to_string(),
            service_name: overrides
                .service_name
                .as_deref()
                .unwrap_or(base_name)
                .to_string(),
            sampling_rate: overrides.sampling_rate.unwrap_or(self.sampling_rate),
        }
    }
}

impl Settings {
    /// Loads the layered settings; `file` is an extra TOML file over the defaults.
    pub fn new(file: Option<String>) -> Result<Self, ConfigError> {
        let defaults = File::from_str(DEFAULT_SETTINGS, FileFormat::Toml);
        let environment = Environment::with_prefix("SKIFF")
            .separator("__")
            .try_parsing(true);

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(File::with_name(&path));
        }
        builder.add_source(environment).build()?.try_deserialize()
    }
}
