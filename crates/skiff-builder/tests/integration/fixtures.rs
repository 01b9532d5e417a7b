/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use axum::body::Body;
use axum::http::Request;
use flate2::write::GzEncoder;
use flate2::Compression;
use skiff_builder::api::BuildServiceConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;

pub const BOUNDARY: &str = "skiff-test-boundary";

/// Scratch directories plus a fake builder executable.
pub struct BuildFixture {
    pub root: TempDir,
}

impl BuildFixture {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.path().join("work")
    }

    pub fn docker_dir(&self) -> PathBuf {
        self.root.path().join("docker")
    }

    /// Writes an executable `sh` script standing in for the builder.
    pub fn fake_builder(&self, body: &str) -> PathBuf {
        let path = self.root.path().join("fake-creator");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    pub fn config(&self, builder: &Path) -> BuildServiceConfig {
        BuildServiceConfig {
            work_dir: self.work_dir(),
            builder_program: builder.display().to_string(),
            docker_config_dir: self.docker_dir(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// A source bundle with `main.go` (0640) and an empty `sub/` directory.
pub fn source_bundle() -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());

    let content = b"package main\n";
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o640);
    header.set_size(content.len() as u64);
    builder
        .append_data(&mut header, "main.go", &content[..])
        .unwrap();

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    builder
        .append_data(&mut header, "sub/", std::io::empty())
        .unwrap();

    let tar_bytes = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// Hand-assembled `multipart/form-data` body.
pub struct MultipartBody {
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self { body: Vec::new() }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        write!(
            self.body,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        )
        .unwrap();
        self
    }

    pub fn file(mut self, name: &str, filename: &str, data: &[u8]) -> Self {
        write!(
            self.body,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/gzip\r\n\r\n",
            BOUNDARY, name, filename
        )
        .unwrap();
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn into_request(mut self) -> Request<Body> {
        write!(self.body, "--{}--\r\n", BOUNDARY).unwrap();
        Request::builder()
            .method("POST")
            .uri("/build-image")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}

/// A complete, valid build request for `reg/app:v1`.
pub fn build_request(bundle: &[u8]) -> MultipartBody {
    MultipartBody::new()
        .text("image", "reg/app")
        .text("tag", "v1")
        .text("app", "app")
        .file("data", "src.tar.gz", bundle)
}
