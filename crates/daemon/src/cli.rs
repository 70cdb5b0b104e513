// SPDX-License-Identifier: MIT

//! Command-line surface for `gridexecd`.

use clap::Parser;
use std::path::PathBuf;

/// Supervises a single child process: captures its combined stdout/stderr,
/// reports status transitions to a callback URL, and serves a long-poll
/// HTTP surface for live output and remote kill.
#[derive(Parser, Debug)]
#[command(name = "gridexecd", version)]
pub struct Cli {
    /// HTTP bind host.
    #[arg(long, default_value = "127.0.0.1")]
    pub server_host: String,

    /// HTTP bind port; 0 for ephemeral.
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// On terminal status, write the ring buffer's live contents to this file.
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// Path for the atomically-written status JSON.
    #[arg(long, default_value = "status.json")]
    pub status_file: PathBuf,

    /// Target URL for callback POSTs.
    #[arg(long)]
    pub callback_api: Option<String>,

    /// Token sent as `Authentication: TOKEN <base64(token)>`.
    #[arg(long)]
    pub callback_token: Option<String>,

    /// `K=V` pair to overlay onto the child's environment. Repeatable.
    #[arg(long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Child working directory, created if absent.
    #[arg(long, default_value = "./work_dir")]
    pub work_dir: String,

    /// Shell command executed once the child reaches a terminal status.
    #[arg(long)]
    pub run_after: Option<String>,

    /// Keep serving after child exit until an external SIGINT/SIGTERM.
    #[arg(long)]
    pub no_exit: bool,

    /// Enable the generated-file watcher.
    #[arg(long)]
    pub watch_generated: bool,

    /// Ring buffer capacity in bytes.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    pub buffer_size: usize,

    /// The child program and its arguments, following `--`.
    #[arg(last = true, required = true, num_args = 1..)]
    pub child_argv: Vec<String>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected K=V, got {raw:?}")),
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
