/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

mod event_channel;
mod health;
mod image_build;
