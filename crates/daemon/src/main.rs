// SPDX-License-Identifier: MIT

//! gridexecd: wires the C1-C7 components together (C8 Bootstrap), drives the
//! child through its lifecycle, and runs the optional after-script.

mod cli;
mod env;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use gridexec_buffer::{PollOutcome, RingBuffer};
use gridexec_callback::CallbackEvent;
use gridexec_core::{Clock, StatusState, SystemClock};
use gridexec_killer::{KillOutcome, KillTimeouts, Killer};
use gridexec_status::StatusStore;
use gridexec_supervisor::{ExitKind, SpawnConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

enum Termination {
    Reaped(ExitKind),
    CannotKill(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,gridexecd=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let listener =
        TcpListener::bind((cli.server_host.as_str(), cli.port)).await.context("failed to bind HTTP listener")?;
    let bound_port = listener.local_addr().context("failed to read bound address")?.port();

    let buffer = Arc::new(RingBuffer::new(cli.buffer_size));

    let (program, rest) = cli.child_argv.split_first().context("child argv is empty")?;
    let spawn_config = SpawnConfig {
        program: program.clone(),
        args: rest.to_vec(),
        work_dir: PathBuf::from(&cli.work_dir),
        env: cli.env.clone(),
    };

    // Spawn before any status file exists: a spawn failure must leave no
    // status.json behind.
    let child = gridexec_supervisor::spawn(&spawn_config, buffer.clone()).await.context("failed to spawn child")?;
    let pgid = child.pid();

    let status = Arc::new(
        StatusStore::new(cli.status_file.clone(), cli.work_dir.clone(), bound_port)
            .context("failed to initialize status store")?,
    );
    let clock = SystemClock;

    let callback = match &cli.callback_api {
        Some(url) => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("failed to build callback HTTP client")?;
            Some(gridexec_callback::spawn(
                url.clone(),
                cli.callback_token.clone().unwrap_or_default(),
                env::callback_max_retry(),
                client,
            ))
        }
        None => None,
    };

    let running_record = status.set_running(&clock).context("failed to record RUNNING status")?;
    let start_time = match running_record.state {
        StatusState::Running { start_time } => start_time,
        _ => clock.epoch_secs(),
    };
    enqueue_status(&callback, &running_record);

    let (exited_tx, exited_rx) = watch::channel(false);
    let killer = Arc::new(Killer::new(
        pgid,
        KillTimeouts { first: env::kill_first_wait(), second: env::kill_second_wait(), final_wait: env::kill_final_wait() },
    ));

    let app_state = gridexec_http::AppState {
        buffer: buffer.clone(),
        killer: killer.clone(),
        exited: exited_rx.clone(),
        status: status.clone(),
    };
    let app = gridexec_http::router(app_state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server exited unexpectedly");
        }
    });

    let watch_cancel = CancellationToken::new();
    let watch_handle = if cli.watch_generated {
        match &callback {
            Some((handle, _)) => {
                let work_dir = PathBuf::from(&cli.work_dir);
                let handle = handle.clone();
                let cancel = watch_cancel.clone();
                Some(tokio::spawn(gridexec_watch::run(work_dir, handle, cancel)))
            }
            None => {
                warn!("--watch-generated set without --callback-api, generated-file events have nowhere to go");
                None
            }
        }
    } else {
        None
    };

    let (reap_tx, reap_rx) = oneshot::channel();
    {
        let reaper_buffer = buffer.clone();
        let exited_tx = exited_tx.clone();
        tokio::spawn(async move {
            let result = child.join(&reaper_buffer).await;
            let _ = exited_tx.send(true);
            let _ = reap_tx.send(result);
        });
    }

    let (giveup_tx, giveup_rx) = oneshot::channel();
    {
        let killer = killer.clone();
        let exited_rx = exited_rx.clone();
        tokio::spawn(async move {
            let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(a), Ok(b)) => (a, b),
                _ => {
                    warn!("failed to install signal handlers, external kill requests will not be honored");
                    return;
                }
            };
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            info!("received external signal, engaging killer");
            if let KillOutcome::GaveUp { reason } = killer.kill(exited_rx).await {
                let _ = giveup_tx.send(reason);
            }
        });
    }

    let termination: Termination = tokio::select! {
        reaped = reap_rx => {
            let exit_kind = reaped.context("reaper task ended unexpectedly")??;
            Termination::Reaped(exit_kind)
        }
        Ok(reason) = giveup_rx => Termination::CannotKill(reason),
    };

    // Idempotent: the reaper already closes the buffer on a normal exit;
    // on CANNOT_KILL the reaper may still be stuck in wait(), so force it.
    buffer.close();

    if let Some(handle) = watch_handle {
        watch_cancel.cancel();
        let _ = handle.await;
    }

    let work_dir_size = gridexec_supervisor::work_dir_size(&PathBuf::from(&cli.work_dir));

    let (final_record, exit_status_str, exit_code, exit_signal) = match termination {
        Termination::Reaped(ExitKind::Exited(code)) => {
            let record = status.set_exited(&clock, start_time, code, work_dir_size)?;
            (record, "EXITED", Some(code), None)
        }
        Termination::Reaped(ExitKind::Signalled(sig)) => {
            let record = status.set_signalled(&clock, start_time, sig, work_dir_size)?;
            (record, "SIGNALLED", None, Some(sig))
        }
        Termination::CannotKill(reason) => {
            let record = status.set_cannot_kill(start_time, reason, work_dir_size)?;
            (record, "CANNOT_KILL", None, None)
        }
    };
    info!(status = exit_status_str, work_dir_size, "child reached terminal status");
    enqueue_status(&callback, &final_record);

    if let Some(output_path) = &cli.output_file {
        if let PollOutcome::Data { bytes, .. } = buffer.read_from(0, usize::MAX, Duration::ZERO).await {
            if let Err(e) = std::fs::write(output_path, &bytes) {
                warn!(error = %e, path = %output_path.display(), "failed to write output file");
            }
        }
    }

    if let Some(cmd) = &cli.run_after {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(cmd);
        command.env("ML_GRIDENGINE_PROGRAM_WORK_DIR", &cli.work_dir);
        command.env("ML_GRIDENGINE_PROGRAM_EXIT_STATUS", exit_status_str);
        if let Some(code) = exit_code {
            command.env("ML_GRIDENGINE_PROGRAM_EXIT_CODE", code.to_string());
        }
        if let Some(sig) = exit_signal {
            command.env("ML_GRIDENGINE_PROGRAM_EXIT_SIGNAL", sig.to_string());
        }
        match command.status().await {
            Ok(status) => info!(?status, "run-after command finished"),
            Err(e) => warn!(error = %e, "failed to execute run-after command"),
        }
    }

    if cli.no_exit {
        info!("no-exit set, keeping the HTTP server alive until an external signal");
        let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    if let Some((handle, worker)) = callback {
        drop(handle);
        let _ = tokio::time::timeout(Duration::from_secs(10), worker).await;
    }

    Ok(())
}

fn enqueue_status(callback: &Option<(gridexec_callback::CallbackHandle, tokio::task::JoinHandle<()>)>, record: &gridexec_core::StatusRecord) {
    if let Some((handle, _)) = callback {
        let data = serde_json::to_value(record).unwrap_or_else(|_| serde_json::Value::Null);
        let _ = handle.enqueue(CallbackEvent::status_updated(data));
    }
}
