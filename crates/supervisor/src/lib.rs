// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! gridexec-supervisor: the child supervisor (C4). Spawns the child into its
//! own process group, merges its stdout and stderr into a single OS pipe
//! (mirroring `subprocess.STDOUT`), streams that pipe into a
//! [`gridexec_buffer::RingBuffer`], and reaps the child to report its exit
//! status or terminating signal.

use gridexec_buffer::RingBuffer;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{dup, pipe, Pid};
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to create work dir {path}: {source}")]
    WorkDir { path: PathBuf, source: io::Error },
    #[error("failed to set up output pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("failed to spawn child: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to wait on child: {0}")]
    Wait(#[source] io::Error),
}

/// How the child was launched.
pub struct SpawnConfig {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Environment variables to add on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl SpawnConfig {
    /// Environment the child actually receives: the caller's env plus
    /// `PYTHONUNBUFFERED=1` if neither the inherited environment nor `env`
    /// already sets it.
    fn effective_env(&self) -> Vec<(String, String)> {
        let mut env = self.env.clone();
        let already_set =
            env.iter().any(|(k, _)| k == "PYTHONUNBUFFERED") || std::env::var_os("PYTHONUNBUFFERED").is_some();
        if !already_set {
            env.push(("PYTHONUNBUFFERED".to_string(), "1".to_string()));
        }
        env
    }
}

/// The outcome of a reaped child: either a normal exit code or the signal
/// that terminated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signalled(i32),
}

/// A spawned, supervised child. Owns the reader task and the reap task;
/// [`SupervisedChild::join`] waits for both and returns the exit outcome.
pub struct SupervisedChild {
    pid: Pid,
    reader: tokio::task::JoinHandle<()>,
    child: tokio::process::Child,
}

impl SupervisedChild {
    /// The process group leader pid — also the process group id, since the
    /// child is spawned as its own group leader.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Waits for the child to exit and for the combined output reader to
    /// observe EOF, then closes the buffer. Safe to call once.
    pub async fn join(mut self, buffer: &RingBuffer) -> Result<ExitKind, SupervisorError> {
        let status = self.child.wait().await.map_err(SupervisorError::Wait)?;
        let _ = self.reader.await;
        buffer.close();

        let kind = match status.code() {
            Some(code) => ExitKind::Exited(code),
            None => {
                use std::os::unix::process::ExitStatusExt;
                ExitKind::Signalled(status.signal().unwrap_or(0))
            }
        };
        info!(pid = self.pid.as_raw(), ?kind, "child reaped");
        Ok(kind)
    }
}

/// Spawns `config.program` with its own process group and a pipe merging
/// stdout+stderr into `buffer`. The work dir is created if absent.
pub async fn spawn(config: &SpawnConfig, buffer: Arc<RingBuffer>) -> Result<SupervisedChild, SupervisorError> {
    std::fs::create_dir_all(&config.work_dir)
        .map_err(|source| SupervisorError::WorkDir { path: config.work_dir.clone(), source })?;

    let (read_fd, write_fd): (OwnedFd, OwnedFd) = pipe().map_err(nix_io_err)?;
    set_nonblocking(&read_fd).map_err(nix_io_err)?;

    let stdout_fd = dup(write_fd.as_fd()).map_err(nix_io_err)?;
    let stderr_fd = write_fd;

    let mut command = Command::new(&config.program);
    command
        .args(&config.args)
        .current_dir(&config.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_fd))
        .stderr(Stdio::from(stderr_fd))
        .process_group(0)
        .kill_on_drop(false);
    for (key, value) in config.effective_env() {
        command.env(key, value);
    }

    debug!(program = %config.program, args = ?config.args, "spawning child");
    let child = command.spawn().map_err(SupervisorError::Spawn)?;
    let pid = Pid::from_raw(child.id().ok_or_else(|| {
        SupervisorError::Spawn(io::Error::new(io::ErrorKind::Other, "child exited before pid was observed"))
    })? as i32);

    let mut receiver =
        tokio::net::unix::pipe::Receiver::try_from(read_fd).map_err(SupervisorError::Pipe)?;
    let reader_buffer = buffer.clone();
    let reader = tokio::spawn(async move {
        let mut chunk = [0u8; 64 * 1024];
        loop {
            match receiver.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => reader_buffer.append(&chunk[..n]),
                Err(e) => {
                    warn!(error = %e, "error reading child output, stopping reader");
                    break;
                }
            }
        }
    });

    Ok(SupervisedChild { pid, reader, child })
}

fn nix_io_err(e: nix::Error) -> SupervisorError {
    SupervisorError::Pipe(io::Error::from(e))
}

fn set_nonblocking(fd: &OwnedFd) -> Result<(), nix::Error> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Recursive byte sum of regular files under `dir`. Symlinks are neither
/// followed nor descended into (spec §9 open question (b)).
pub fn work_dir_size(dir: &Path) -> u64 {
    let mut total = 0u64;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not read work dir for size accounting");
            return 0;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = std::fs::symlink_metadata(&path) else { continue };
        if meta.is_dir() {
            total += work_dir_size(&path);
        } else if meta.is_file() {
            total += meta.len();
        }
    }
    total
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
