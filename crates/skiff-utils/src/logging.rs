/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Skiff Logging Module
//!
//! All crates log through the `tracing` macros re-exported from [`prelude`].
//! The subscriber itself is installed by [`crate::telemetry::init`].
//!
//! ## Log Levels
//!
//! - "off": Turn off all logging
//! - "error": Log only errors
//! - "warn": Log warnings and errors
//! - "info": Log info, warnings, and errors (default)
//! - "debug": Log debug messages and all above
//! - "trace": Log trace messages and all above
//!
//! Unknown level strings fall back to "info".

use tracing_subscriber::filter::LevelFilter;

/// Maps a configured level string onto a tracing level filter.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => LevelFilter::OFF,
        "error" => LevelFilter::ERROR,
        "warn" => LevelFilter::WARN,
        "info" => LevelFilter::INFO,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}
