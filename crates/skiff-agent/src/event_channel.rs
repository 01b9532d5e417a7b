/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Event Channel
//!
//! The agent's long-lived connection to the control plane. Registration is a
//! long-poll `GET /agent/register` whose body is a line protocol:
//!
//! | line | effect |
//! |---|---|
//! | `:<anything>` | comment, ignored |
//! | `data: <text>` | `<text>` appended to the event buffer |
//! | empty | buffer flushed: a `{`-prefixed buffer is decoded as one [`Event`] |
//! | anything else | protocol error, stream closed |
//!
//! Lines end with `\n`; a trailing `\r` is stripped. A buffer that does not
//! start with `{` is dropped on flush and an empty flush is a keep-alive.
//!
//! ## Supervision
//!
//! ```mermaid
//! stateDiagram-v2
//!     [*] --> Registering
//!     Registering --> Connected: 2xx
//!     Registering --> Waiting: error
//!     Connected --> Connected: event dispatched
//!     Connected --> Waiting: read, protocol or decode error
//!     Waiting --> Registering: reconnect delay elapsed
//!     Waiting --> [*]: shutdown
//!     Connected --> [*]: shutdown
//! ```
//!
//! Each successful registration triggers one full state report. Events are
//! dispatched fire-and-forget onto the agent's task tracker.

use crate::context::AgentContext;
use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::log_streams::LogStreamHandle;
use crate::metrics;
use crate::pod_logs::PodLogError;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use skiff_models::models::{AgentAction, Event};
use skiff_utils::logging::prelude::*;
use std::collections::VecDeque;

const DATA_PREFIX: &str = "data: ";
const MAX_LOGGED_LINE: usize = 120;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("registration failed: {0}")]
    Connect(#[from] ControlPlaneError),
    #[error("event stream read failed: {0}")]
    Read(#[source] reqwest::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("malformed event payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("event stream closed by the control plane")]
    Closed,
}

impl ChannelError {
    fn is_protocol(&self) -> bool {
        matches!(self, ChannelError::Protocol(_) | ChannelError::Decode(_))
    }
}

/// Incremental decoder for the event stream line protocol.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    partial: Vec<u8>,
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw body bytes, appending every completed event to `out`.
    ///
    /// Events decoded before a protocol error are still appended.
    pub fn push(&mut self, chunk: &[u8], out: &mut VecDeque<Event>) -> Result<(), ChannelError> {
        self.partial.extend_from_slice(chunk);
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8(line)
                .map_err(|_| ChannelError::Protocol("line is not valid UTF-8".to_string()))?;
            if let Some(event) = self.decode_line(&line)? {
                out.push_back(event);
            }
        }
        Ok(())
    }

    /// Applies one line (without its terminator).
    pub fn decode_line(&mut self, line: &str) -> Result<Option<Event>, ChannelError> {
        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            return Ok(None);
        }
        if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            self.buffer.push_str(rest);
            return Ok(None);
        }
        let shown: String = line.chars().take(MAX_LOGGED_LINE).collect();
        Err(ChannelError::Protocol(format!("unexpected line '{}'", shown)))
    }

    fn flush(&mut self) -> Result<Option<Event>, ChannelError> {
        let payload = std::mem::take(&mut self.buffer);
        if payload.starts_with('{') {
            return serde_json::from_str::<Event>(&payload)
                .map(Some)
                .map_err(ChannelError::Decode);
        }
        if !payload.is_empty() {
            debug!("Discarding non-object event payload ({} bytes)", payload.len());
        }
        Ok(None)
    }
}

/// Events decoded from one registration's response body.
pub struct EventStream {
    body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    decoder: FrameDecoder,
    ready: VecDeque<Event>,
    failure: Option<ChannelError>,
}

impl EventStream {
    pub fn new<S>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    {
        Self {
            body: body.boxed(),
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            failure: None,
        }
    }

    /// Next event in arrival order. Any error ends the stream for good.
    pub async fn next_event(&mut self) -> Result<Event, ChannelError> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(event);
            }
            if let Some(e) = self.failure.take() {
                return Err(e);
            }
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = self.decoder.push(&chunk, &mut self.ready) {
                        self.failure = Some(e);
                    }
                }
                Some(Err(e)) => return Err(ChannelError::Read(e)),
                None => return Err(ChannelError::Closed),
            }
        }
    }
}

/// Registers with the control plane and returns the decoded event stream.
pub async fn register(
    control_plane: &ControlPlane,
    name: &str,
    namespace: &str,
) -> Result<EventStream, ChannelError> {
    let response = control_plane.open_event_stream(name, namespace).await?;
    info!(
        "Registered environment '{}' (namespace '{}') with {}",
        name,
        namespace,
        control_plane.base_url()
    );
    Ok(EventStream::new(response.bytes_stream()))
}

/// Keeps the event channel alive until the context's shutdown token fires.
///
/// Failed registrations and closed streams both wait the fixed reconnect
/// delay before the next attempt; there is no retry limit.
pub async fn run(ctx: AgentContext) {
    info!("Starting event channel supervisor");
    loop {
        let registered = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            registered = register(&ctx.control_plane, &ctx.env_name, &ctx.namespace) => registered,
        };

        match registered {
            Ok(stream) => {
                set_connected(&ctx, true).await;
                spawn_state_report(&ctx, "registration");

                let consumer = ctx.tracker.spawn(consume(ctx.clone(), stream));
                match consumer.await {
                    Ok(Some(e)) => {
                        if e.is_protocol() {
                            metrics::protocol_errors_total().inc();
                        }
                        warn!("Event stream ended: {}", e);
                    }
                    Ok(None) => {}
                    Err(e) => error!("Event dispatch task failed: {}", e),
                }
                set_connected(&ctx, false).await;
            }
            Err(e) => error!("Failed to register with control plane: {}", e),
        }

        metrics::event_channel_reconnects_total().inc();
        debug!("Reconnecting in {:?}", ctx.reconnect_delay);
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = tokio::time::sleep(ctx.reconnect_delay) => {}
        }
    }
    info!("Event channel supervisor stopped");
}

async fn set_connected(ctx: &AgentContext, connected: bool) {
    ctx.channel_status.write().await.connected = connected;
    metrics::event_channel_connected().set(i64::from(connected));
}

/// Dispatches events until the stream fails. `None` means shutdown.
async fn consume(ctx: AgentContext, mut stream: EventStream) -> Option<ChannelError> {
    loop {
        let next = tokio::select! {
            _ = ctx.shutdown.cancelled() => return None,
            next = stream.next_event() => next,
        };
        match next {
            Ok(event) => {
                ctx.channel_status.write().await.last_event = Some(chrono::Utc::now().to_rfc3339());
                dispatch(&ctx, event);
            }
            Err(e) => return Some(e),
        }
    }
}

/// Routes one event to its job without waiting for it.
pub fn dispatch(ctx: &AgentContext, event: Event) {
    let action = match event.into_action() {
        Ok(action) => action,
        Err(e) => {
            metrics::events_received_total()
                .with_label_values(&["invalid"])
                .inc();
            warn!("Ignoring event: {}", e);
            return;
        }
    };

    let label = match &action {
        AgentAction::Refetch => "refetch",
        AgentAction::PodLogs { .. } => "podlogs",
        AgentAction::StopLogs(_) => "stoplogs",
        AgentAction::ImageBuild(_) => "imagebuild",
        AgentAction::Unknown(_) => "unknown",
    };
    metrics::events_received_total()
        .with_label_values(&[label])
        .inc();

    match action {
        AgentAction::Refetch => spawn_state_report(ctx, "refetch"),
        AgentAction::PodLogs { key, since_time } => {
            let handle = LogStreamHandle::child_of(&ctx.shutdown);
            ctx.log_streams.open(key.clone(), handle.clone());
            let streamer = ctx.pod_logs.clone();
            ctx.tracker.spawn(async move {
                let outcome = match streamer.fetch(&key, &since_time, &handle).await {
                    Ok(pods) => {
                        info!("Posted logs of {} pods for {}", pods, key);
                        "success"
                    }
                    Err(PodLogError::Cancelled) => {
                        info!("Log job for {} stopped", key);
                        "cancelled"
                    }
                    Err(e) => {
                        error!("Log job for {} failed: {}", key, e);
                        "error"
                    }
                };
                metrics::pod_log_jobs_total()
                    .with_label_values(&[outcome])
                    .inc();
            });
        }
        AgentAction::StopLogs(key) => {
            if ctx.log_streams.stop(&key) {
                info!("Stopped log job for {}", key);
            } else {
                debug!("No log job registered for {}", key);
            }
        }
        AgentAction::ImageBuild(trigger) => {
            let orchestrator = ctx.image_builds.clone();
            let shutdown = ctx.shutdown.clone();
            ctx.tracker.spawn(async move {
                orchestrator.build(&trigger, &shutdown).await;
            });
        }
        AgentAction::Unknown(name) => debug!("Ignoring event with action '{}'", name),
    }
}

fn spawn_state_report(ctx: &AgentContext, reason: &'static str) {
    let reporter = ctx.state_reporter.clone();
    let env = ctx.env_name.clone();
    ctx.tracker.spawn(async move {
        if let Err(e) = reporter.report(&env).await {
            error!("State report ({}) failed: {}", reason, e);
        }
    });
}
