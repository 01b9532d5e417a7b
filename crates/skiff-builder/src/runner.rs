/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Execution of the external builder with its output piped into a response body.

use bytes::Bytes;
use skiff_utils::logging::prelude::*;
use std::convert::Infallible;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Sending half of a streamed response body.
pub type BodySender = mpsc::Sender<Result<Bytes, Infallible>>;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start builder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for builder: {0}")]
    Wait(#[source] io::Error),
    #[error("failed reading builder output: {0}")]
    Output(#[source] io::Error),
    #[error("builder exited with {0}")]
    Exit(ExitStatus),
    #[error("client disconnected before the build finished")]
    Disconnected,
}

/// Builds the fixed builder invocation: `<program> -app=<dir> -log-level=debug <image>:<tag>`.
pub fn builder_command(program: &str, app_dir: &Path, image: &str, tag: &str) -> Command {
    let mut command = Command::new(program);
    command
        .arg(format!("-app={}", app_dir.display()))
        .arg("-log-level=debug")
        .arg(format!("{}:{}", image, tag))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

/// Runs `command`, forwarding stdout and stderr chunks to `out` as they are read.
///
/// Returns `Ok` only when the process exits with status 0.
pub async fn run_streaming(mut command: Command, out: &BodySender) -> Result<(), RunError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let mut child = command.spawn().map_err(|source| RunError::Spawn {
        program: program.clone(),
        source,
    })?;
    debug!("Started builder '{}' (pid {:?})", program, child.id());

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    if let Err(interrupted) = tokio::try_join!(pump(stdout, out), pump(stderr, out)) {
        let error = match interrupted {
            Interrupted::Read(e) => RunError::Output(e),
            Interrupted::Disconnected => {
                warn!("Response receiver dropped, killing builder '{}'", program);
                RunError::Disconnected
            }
        };
        stop(&mut child, &program).await;
        return Err(error);
    }

    let status = child.wait().await.map_err(RunError::Wait)?;
    if status.success() {
        Ok(())
    } else {
        Err(RunError::Exit(status))
    }
}

async fn stop(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill builder '{}': {}", program, e);
    }
}

enum Interrupted {
    Read(io::Error),
    Disconnected,
}

/// Copies `reader` into `out` chunk by chunk until EOF.
async fn pump<R>(reader: Option<R>, out: &BodySender) -> Result<(), Interrupted>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await.map_err(Interrupted::Read)?;
        if n == 0 {
            return Ok(());
        }
        if out.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
            return Err(Interrupted::Disconnected);
        }
    }
}
