use agent_device_core::DaemonError;
use serde_json::{json, Value};

use crate::context::DispatchContext;
use crate::wire::Request;

use super::common::{device_from_binding, load_session, request_flags_as_value};

async fn record(ctx: &DispatchContext, session_name: &str, command: &str, req: &Request, result: Value) {
    let _ = ctx
        .sessions
        .mutate(session_name, |s| {
            s.record_action(command, req.positionals.clone(), request_flags_as_value(req), Some(result));
        })
        .await;
}

/// `home`: dispatches the platform-specific home-button gesture.
pub async fn home(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    crate::platform::press_home(ctx, &device).await?;
    let result = json!({ "ok": true });
    record(ctx, session_name, "home", req, result.clone()).await;
    Ok(result)
}

/// `back`: dispatches the platform-specific back gesture (no-op on iOS
/// beyond whatever the XCTest runner maps it to, since iOS has no hardware
/// back button; the runner client still exposes the call for parity).
pub async fn back(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    crate::platform::press_back(ctx, &device).await?;
    let result = json!({ "ok": true });
    record(ctx, session_name, "back", req, result.clone()).await;
    Ok(result)
}

/// `app-switcher`: brings up the recents/app-switcher surface.
pub async fn app_switcher(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    crate::platform::app_switcher(ctx, &device).await?;
    let result = json!({ "ok": true });
    record(ctx, session_name, "app-switcher", req, result.clone()).await;
    Ok(result)
}

/// `screenshot [--out path]`.
pub async fn screenshot(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let path = req
        .flag_str("out")
        .unwrap_or_else(|| ctx.sessions_dir().join(format!("{session_name}-{}.png", chrono::Utc::now().timestamp_millis())).to_string_lossy().into_owned());
    if let Some(parent) = std::path::Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    crate::platform::screenshot(ctx, &device, &path).await?;
    let result = json!({ "path": path });
    record(ctx, session_name, "screenshot", req, result.clone()).await;
    Ok(result)
}

/// `push <localPath>`: copies a file onto the device (Android: `/sdcard`;
/// iOS: the bound session's app data container).
pub async fn push(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let local = req
        .positionals
        .first()
        .ok_or_else(|| DaemonError::invalid_args("push requires a local file path"))?;
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    crate::platform::push(ctx, &device, session.app_bundle_id.as_deref(), local).await?;
    let result = json!({ "pushed": local });
    record(ctx, session_name, "push", req, result.clone()).await;
    Ok(result)
}

/// `settings <namespace> <key> <value>` (Android only, per §4.G).
pub async fn settings(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    if req.positionals.len() < 3 {
        return Err(DaemonError::invalid_args("settings requires <namespace> <key> <value>"));
    }
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    crate::platform::settings_put(ctx, &device, &req.positionals[0], &req.positionals[1], &req.positionals[2]).await?;
    let result = json!({ "applied": true });
    record(ctx, session_name, "settings", req, result.clone()).await;
    Ok(result)
}

/// `reinstall <bundleId|package> <path>`.
pub async fn reinstall(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    if req.positionals.len() < 2 {
        return Err(DaemonError::invalid_args("reinstall requires <bundleId> <path>"));
    }
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    crate::platform::reinstall(ctx, &device, &req.positionals[0], &req.positionals[1]).await?;
    let result = json!({ "reinstalled": true });
    record(ctx, session_name, "reinstall", req, result.clone()).await;
    Ok(result)
}

/// `apps [--appsFilter] [--appsMetadata]`: installed-app listing (Android
/// only; iOS has no equivalent in this daemon's adapter surface).
pub async fn apps(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let apps = crate::platform::list_apps(ctx, &device).await?;
    let filter = req.flag_str("appsFilter");
    let filtered: Vec<&String> = match &filter {
        Some(needle) => apps.iter().filter(|a| a.contains(needle.as_str())).collect(),
        None => apps.iter().collect(),
    };
    let result = json!({ "apps": filtered });
    record(ctx, session_name, "apps", req, result.clone()).await;
    Ok(result)
}

/// `appstate <bundleId>` (Android only).
pub async fn appstate(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let bundle_id = req
        .positionals
        .first()
        .ok_or_else(|| DaemonError::invalid_args("appstate requires a bundle id"))?;
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let state = crate::platform::app_state(ctx, &device, bundle_id).await?;
    let state_str = match state {
        crate::platform::AppRunState::Foreground => "foreground",
        crate::platform::AppRunState::Background => "background",
        crate::platform::AppRunState::NotRunning => "not_running",
    };
    let result = json!({ "state": state_str });
    record(ctx, session_name, "appstate", req, result.clone()).await;
    Ok(result)
}
