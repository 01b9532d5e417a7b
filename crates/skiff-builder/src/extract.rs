/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Unpacking of uploaded gzip+tar source bundles.
//!
//! Only directories and regular files are materialised. Every other entry
//! type (symlinks, hard links, devices, fifos, PAX/GNU metadata records) is
//! skipped, as is any entry whose path is absolute or climbs out of the
//! destination with `..`.

use bytes::Bytes;
use flate2::read::GzDecoder;
use skiff_utils::logging::prelude::*;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read archive: {0}")]
    Archive(#[source] io::Error),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Counts of what an extraction produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub skipped: usize,
}

/// Extracts `data` into `dest` on the blocking pool.
pub async fn unpack(data: Bytes, dest: PathBuf) -> Result<ExtractSummary, ExtractError> {
    tokio::task::spawn_blocking(move || unpack_archive(Cursor::new(data), &dest)).await?
}

/// Extracts a gzip-compressed tar stream into `dest`.
pub fn unpack_archive<R: Read>(reader: R, dest: &Path) -> Result<ExtractSummary, ExtractError> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut summary = ExtractSummary::default();

    for entry in archive.entries().map_err(ExtractError::Archive)? {
        let mut entry = entry.map_err(ExtractError::Archive)?;
        let relative = entry.path().map_err(ExtractError::Archive)?.into_owned();

        if !is_contained(&relative) {
            warn!("Skipping tar entry outside the build directory: {}", relative.display());
            summary.skipped += 1;
            continue;
        }
        let target = dest.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|source| ExtractError::Write {
                    path: target.clone(),
                    source,
                })?;
                summary.directories += 1;
            }
            EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|source| ExtractError::Write {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                let mode = entry.header().mode().map_err(ExtractError::Archive)?;
                write_file(&mut entry, &target, mode)?;
                summary.files += 1;
            }
            other => {
                trace!("Skipping unsupported tar entry {:?}: {}", other, relative.display());
                summary.skipped += 1;
            }
        }
    }

    debug!(
        "Extracted {} directories and {} files into {} ({} skipped)",
        summary.directories,
        summary.files,
        dest.display(),
        summary.skipped
    );
    Ok(summary)
}

fn write_file<R: Read>(entry: &mut R, target: &Path, mode: u32) -> Result<(), ExtractError> {
    let wrap = |source| ExtractError::Write {
        path: target.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(target).map_err(wrap)?;
    io::copy(entry, &mut file).map_err(wrap)?;
    apply_mode(&file, mode).map_err(wrap)
}

#[cfg(unix)]
fn apply_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn apply_mode(_file: &fs::File, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn is_contained(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    depth > 0
}
