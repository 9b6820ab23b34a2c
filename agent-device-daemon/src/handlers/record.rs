use agent_device_core::{default_trace_path, DaemonError, RecordingInfo, TraceInfo};
use chrono::Utc;
use serde_json::{json, Value};

use crate::context::DispatchContext;
use crate::wire::Request;

use super::common::{device_from_binding, load_session};

fn recording_path(ctx: &DispatchContext, session_name: &str, out: Option<&str>) -> std::path::PathBuf {
    match out {
        Some(path) => std::path::PathBuf::from(path),
        None => ctx
            .sessions_dir()
            .join(format!("{session_name}-{}.mp4", Utc::now().timestamp_millis())),
    }
}

/// `record start|stop`, per §4.G: a background capture task is parked in
/// `DispatchContext::recordings`, keyed by session name, and joined on stop.
pub async fn record(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    match req.positionals.first().map(String::as_str) {
        Some("start") => start(ctx, req, session_name).await,
        Some("stop") => stop(ctx, session_name).await,
        other => Err(DaemonError::invalid_args(format!(
            "record requires 'start' or 'stop', got {:?}",
            other
        ))),
    }
}

async fn start(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    if session.recording.is_some() {
        return Err(DaemonError::invalid_args("a recording is already in progress for this session"));
    }
    let device = device_from_binding(&session.device);
    let local_path = recording_path(ctx, session_name, req.flag_str("out").as_deref());
    if let Some(parent) = local_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let start = crate::platform::record_start(ctx, &device, local_path.clone()).await?;
    let info = RecordingInfo {
        remote_path: start.remote_path,
        local_path: start.local_path,
        started_at: Utc::now(),
    };
    ctx.recordings.lock().await.insert(session_name.to_string(), start.handle);
    ctx.sessions
        .mutate(session_name, |s| s.recording = Some(info.clone()))
        .await?;

    let result = json!({ "recording": true, "path": info.local_path });
    record_action(ctx, session_name, "record", req, result.clone()).await;
    Ok(result)
}

async fn stop(ctx: &DispatchContext, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let info = session
        .recording
        .clone()
        .ok_or_else(|| DaemonError::invalid_args("no recording is in progress for this session"))?;
    let device = device_from_binding(&session.device);

    let handle = ctx
        .recordings
        .lock()
        .await
        .remove(session_name)
        .ok_or_else(|| DaemonError::command_failed("recording task handle missing", false))?;

    crate::platform::record_stop(
        ctx,
        &device,
        handle,
        info.remote_path.as_deref(),
        info.local_path.to_string_lossy().as_ref(),
        None,
    )
    .await?;

    ctx.sessions.mutate(session_name, |s| s.recording = None).await?;

    let result = json!({ "recording": false, "path": info.local_path });
    Ok(result)
}

/// `trace start|stop`: a local append-only log of recorded actions,
/// allocated via `defaultTracePath`, distinct from video recording.
pub async fn trace(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    match req.positionals.first().map(String::as_str) {
        Some("start") => trace_start(ctx, req, session_name).await,
        Some("stop") => trace_stop(ctx, session_name).await,
        other => Err(DaemonError::invalid_args(format!(
            "trace requires 'start' or 'stop', got {:?}",
            other
        ))),
    }
}

async fn trace_start(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    if session.trace.is_some() {
        return Err(DaemonError::invalid_args("a trace is already active for this session"));
    }
    let path = req
        .flag_str("out")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| default_trace_path(&ctx.sessions_dir(), session_name));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DaemonError::command_failed(format!("could not create trace dir: {e}"), false))?;
    }
    std::fs::File::create(&path).map_err(|e| DaemonError::command_failed(format!("could not create trace file: {e}"), false))?;

    let info = TraceInfo { path: path.clone(), started_at: Utc::now() };
    ctx.sessions.mutate(session_name, |s| s.trace = Some(info)).await?;

    let result = json!({ "tracing": true, "path": path });
    record_action(ctx, session_name, "trace", req, result.clone()).await;
    Ok(result)
}

async fn trace_stop(ctx: &DispatchContext, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let info = session
        .trace
        .clone()
        .ok_or_else(|| DaemonError::invalid_args("no trace is active for this session"))?;
    ctx.sessions.mutate(session_name, |s| s.trace = None).await?;
    Ok(json!({ "tracing": false, "path": info.path }))
}

async fn record_action(ctx: &DispatchContext, session_name: &str, command: &str, req: &Request, result: Value) {
    let _ = ctx
        .sessions
        .mutate(session_name, |s| {
            s.record_action(command, req.positionals.clone(), super::common::request_flags_as_value(req), Some(result));
        })
        .await;
}
