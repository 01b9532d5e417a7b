/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Skiff Image Build Service
//!
//! A single-purpose HTTP service that turns an uploaded source bundle into a
//! container image. Each request carries a gzip-compressed tarball plus the
//! target image reference; the service unpacks the bundle into a fresh
//! working directory, runs the external builder against it and streams the
//! builder's output back as the response body.
//!
//! The last chunk of every streamed response is one of the sentinels
//! [`IMAGE_BUILT`](skiff_models::models::image_builds::IMAGE_BUILT) or
//! [`IMAGE_BUILD_ERROR`](skiff_models::models::image_builds::IMAGE_BUILD_ERROR),
//! since the status line has already been sent by the time the outcome is known.
//!
//! ## Modules
//!
//! - [`api`]: router, multipart handling and the per-request build pipeline
//! - [`extract`]: tarball unpacking
//! - [`runner`]: builder subprocess execution
//! - [`cli`]: command-line entry points

pub mod api;
pub mod cli;
pub mod extract;
pub mod runner;
