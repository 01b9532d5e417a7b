/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Log Stream Registry
//!
//! Tracks the cancellation handle of every pod-log job by [`ServiceKey`].
//!
//! - [`LogStreamRegistry::open`] stores a handle, replacing whatever was
//!   stored under the key. The replaced handle is **not** signalled; it stays
//!   with the job that owns it.
//! - [`LogStreamRegistry::stop`] signals the handle currently stored under the
//!   key and leaves the entry in place, so repeated stops are harmless.
//! - [`LogStreamRegistry::stop_all`] signals every stored handle once per call.
//!
//! Entries are never removed. Signalling is a non-blocking token cancel, so
//! none of these operations wait on the job behind a handle.

use skiff_models::models::ServiceKey;
use skiff_utils::logging::prelude::*;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Cancellation handle for one log job.
#[derive(Debug, Clone, Default)]
pub struct LogStreamHandle {
    token: CancellationToken,
}

impl LogStreamHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that is also signalled when `parent` is cancelled.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the handle has been signalled.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug, Default)]
pub struct LogStreamRegistry {
    entries: Mutex<HashMap<ServiceKey, LogStreamHandle>>,
}

impl LogStreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ServiceKey, LogStreamHandle>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `handle` under `key`, replacing any previous entry.
    pub fn open(&self, key: ServiceKey, handle: LogStreamHandle) {
        if self.entries().insert(key.clone(), handle).is_some() {
            debug!("Replaced log stream handle for {}", key);
        }
    }

    /// Signals the handle stored under `key`. Returns whether one was stored.
    pub fn stop(&self, key: &ServiceKey) -> bool {
        match self.entries().get(key) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Signals every stored handle and returns how many there were.
    pub fn stop_all(&self) -> usize {
        let entries = self.entries();
        for handle in entries.values() {
            handle.stop();
        }
        entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
