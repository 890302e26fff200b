//! `service` control plane.
//!
//! Each CLI invocation is a fresh process, so `pause`/`resume`/`stop`/
//! `status` can't call back into a running `PipelineService` in memory —
//! there's no daemon. Instead `start` polls a small control file in the
//! repository directory once per `queue.poll_interval` tick and reacts to
//! whatever command is written there; the other four subcommands just
//! write that file (or read the status file `start` maintains alongside
//! it). A small JSON file under the data directory standing in for IPC is
//! enough since there is no long-lived daemon process to address directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cli::helpers::note;
use crate::cli::AppContext;
use crate::error::{PipelineError, Result};
use crate::pipeline::handler::DefaultExternalOperations;
use crate::pipeline::{PipelineConfig, PipelineService};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ControlCommand {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServiceStatus {
    pid: u32,
    paused: bool,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn control_path(ctx: &AppContext) -> std::path::PathBuf {
    ctx.settings.repository_path.join("service.control.json")
}

fn status_path(ctx: &AppContext) -> std::path::PathBuf {
    ctx.settings.repository_path.join("service.status.json")
}

fn write_control(ctx: &AppContext, command: ControlCommand) -> Result<()> {
    let json = serde_json::to_vec(&command)
        .map_err(|e| PipelineError::Internal(format!("serializing control command: {e}")))?;
    std::fs::write(control_path(ctx), json)?;
    Ok(())
}

fn read_control(ctx: &AppContext) -> Option<ControlCommand> {
    let bytes = std::fs::read(control_path(ctx)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn clear_control(ctx: &AppContext) {
    let _ = std::fs::remove_file(control_path(ctx));
}

fn read_status(ctx: &AppContext) -> Option<ServiceStatus> {
    let bytes = std::fs::read(status_path(ctx)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn write_status(ctx: &AppContext, paused: bool, started_at: DateTime<Utc>) -> Result<()> {
    let status = ServiceStatus {
        pid: std::process::id(),
        paused,
        started_at,
        updated_at: Utc::now(),
    };
    let json = serde_json::to_vec(&status)
        .map_err(|e| PipelineError::Internal(format!("serializing service status: {e}")))?;
    std::fs::write(status_path(ctx), json)?;
    Ok(())
}

/// Run the worker pool in the foreground. Blocks until a `stop` control
/// command arrives or the process receives Ctrl-C.
pub async fn cmd_start(ctx: &AppContext) -> Result<()> {
    clear_control(ctx);
    let started_at = Utc::now();
    write_status(ctx, false, started_at)?;

    let handler = Arc::new(DefaultExternalOperations::new(
        ctx.repo.clone(),
        ctx.search.clone(),
        ctx.connector.clone(),
    ));
    let config = PipelineConfig::from_settings(&ctx.settings.queue);
    let service = Arc::new(PipelineService::new(
        ctx.queue.clone(),
        ctx.repo.clone(),
        ctx.ocr.clone(),
        handler,
        config,
    ));

    let poll_interval = Duration::from_secs(ctx.settings.queue.poll_interval.max(1));
    let control_service = service.clone();
    let control_ctx_path = control_path(ctx);
    let control_status_path = status_path(ctx);
    let control_loop = tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll_interval).await;
            if let Ok(bytes) = std::fs::read(&control_ctx_path) {
                if let Ok(command) = serde_json::from_slice::<ControlCommand>(&bytes) {
                    match command {
                        ControlCommand::Pause => control_service.pause(),
                        ControlCommand::Resume => control_service.resume(),
                        ControlCommand::Stop => {
                            control_service.request_shutdown();
                            let _ = std::fs::remove_file(&control_ctx_path);
                            break;
                        }
                    }
                    let _ = std::fs::remove_file(&control_ctx_path);
                }
            }
            let status = ServiceStatus {
                pid: std::process::id(),
                paused: control_service.is_paused(),
                started_at,
                updated_at: Utc::now(),
            };
            if let Ok(json) = serde_json::to_vec(&status) {
                let _ = std::fs::write(&control_status_path, json);
            }
            if control_service.is_shutdown_requested() {
                break;
            }
        }
    });

    tokio::select! {
        _ = service.clone().run() => {}
        _ = tokio::signal::ctrl_c() => {
            note("received interrupt, shutting down workers");
            service.request_shutdown();
        }
    }
    control_loop.abort();
    clear_control(ctx);
    let _ = std::fs::remove_file(status_path(ctx));
    Ok(())
}

pub async fn cmd_stop(ctx: &AppContext) -> Result<()> {
    if read_status(ctx).is_none() {
        return Err(PipelineError::NotFound("no running service found".into()));
    }
    write_control(ctx, ControlCommand::Stop)?;
    note("stop requested");
    Ok(())
}

pub async fn cmd_pause(ctx: &AppContext) -> Result<()> {
    if read_status(ctx).is_none() {
        return Err(PipelineError::NotFound("no running service found".into()));
    }
    write_control(ctx, ControlCommand::Pause)?;
    note("pause requested");
    Ok(())
}

pub async fn cmd_resume(ctx: &AppContext) -> Result<()> {
    if read_status(ctx).is_none() {
        return Err(PipelineError::NotFound("no running service found".into()));
    }
    write_control(ctx, ControlCommand::Resume)?;
    note("resume requested");
    Ok(())
}

pub async fn cmd_status(ctx: &AppContext) -> Result<()> {
    match read_status(ctx) {
        Some(status) => {
            println!(
                "running (pid {}), paused={}, started_at={}, last_seen={}",
                status.pid, status.paused, status.started_at, status.updated_at
            );
        }
        None => println!("not running"),
    }
    let lost_leases = ctx.queue.lost_lease_count().await?;
    println!("lost leases observed: {lost_leases}");
    Ok(())
}
