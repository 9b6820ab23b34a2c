use agent_device_core::{DaemonError, DeviceBinding, Session};
use serde_json::{json, Value};

use crate::context::DispatchContext;
use crate::device_select::resolve_target_device;
use crate::readiness::ensure_device_ready;
use crate::wire::Request;

use super::common::device_from_binding;

fn looks_like_url(target: &str) -> bool {
    target.contains("://")
}

/// `open [app]`, per spec §4.G. An already-bound session only switches the
/// foreground app; a fresh session resolves, readies, and binds a device.
pub async fn open(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let target = req.positionals.first().cloned();
    let relaunch = req.flag_bool("relaunch");

    if ctx.sessions.exists(session_name).await {
        if relaunch {
            return reopen(ctx, req, session_name, target).await;
        }
        let Some(target) = target else {
            return Err(DaemonError::invalid_args("open requires an app argument when a session is already active"));
        };
        if looks_like_url(&target) {
            return Err(DaemonError::invalid_args("open with a URL target requires --relaunch"));
        }
        let session = ctx
            .sessions
            .get(session_name)
            .await
            .ok_or_else(|| DaemonError::session_not_found(session_name))?;
        let device = device_from_binding(&session.device);
        crate::platform::open_app(ctx, &device, &target).await?;
        ctx.sessions
            .mutate(session_name, |s| {
                s.app_bundle_id = Some(target.clone());
                s.snapshot = None;
            })
            .await?;
        return Ok(json!({ "session": session_name, "switchedApp": target }));
    }

    if relaunch {
        return Err(DaemonError::invalid_args("open --relaunch requires an active session or an app argument"));
    }

    let device = resolve_target_device(ctx, req).await?;
    if let Some(owner) = ctx.sessions.owner_of(&device.id).await {
        return Err(DaemonError::device_in_use(&device.id, &owner));
    }
    ensure_device_ready(ctx, &device).await?;

    if let Some(target) = &target {
        crate::platform::open_app(ctx, &device, target).await?;
    }

    let binding = DeviceBinding {
        device_id: device.id.clone(),
        platform: device.platform,
        kind: device.kind,
        device_name: Some(device.name.clone()),
        udid: req.flag_str("udid"),
        serial: req.flag_str("serial"),
    };
    let mut session = Session::new(session_name.to_string(), binding);
    session.app_bundle_id = target.clone();
    ctx.sessions.create(session).await?;

    Ok(json!({ "session": session_name, "device": { "platform": device.platform, "id": device.id, "name": device.name, "kind": device.kind }, "app": target }))
}

async fn reopen(ctx: &DispatchContext, req: &Request, session_name: &str, target: Option<String>) -> Result<Value, DaemonError> {
    if target.as_deref().map(looks_like_url).unwrap_or(false) {
        return Err(DaemonError::invalid_args("open --relaunch rejects URL targets"));
    }
    let session = ctx
        .sessions
        .get(session_name)
        .await
        .ok_or_else(|| DaemonError::session_not_found(session_name))?;
    let app = target.or_else(|| session.app_bundle_id.clone());
    close_internal(ctx, session_name).await?;

    let device = resolve_target_device(ctx, req).await?;
    ensure_device_ready(ctx, &device).await?;
    if let Some(app) = &app {
        crate::platform::open_app(ctx, &device, app).await?;
    }
    let binding = DeviceBinding {
        device_id: device.id.clone(),
        platform: device.platform,
        kind: device.kind,
        device_name: Some(device.name.clone()),
        udid: req.flag_str("udid"),
        serial: req.flag_str("serial"),
    };
    let mut new_session = Session::new(session_name.to_string(), binding);
    new_session.app_bundle_id = app.clone();
    ctx.sessions.create(new_session).await?;
    Ok(json!({ "session": session_name, "relaunched": true, "app": app }))
}

async fn close_internal(ctx: &DispatchContext, session_name: &str) -> Result<(), DaemonError> {
    let Some(session) = ctx.sessions.remove(session_name).await else {
        return Ok(());
    };

    if session.record_session {
        let script = agent_device_core::render_script(&session);
        let path = session
            .save_script_path
            .clone()
            .unwrap_or_else(|| agent_device_core::default_script_path(&ctx.sessions_dir(), session_name));
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(&path, script);
    }

    if session.device.platform == agent_device_snapshot::Platform::Ios
        && session.device.kind == agent_device_adapters::DeviceKind::Simulator
    {
        let device = device_from_binding(&session.device);
        let _ = crate::platform::close_app(ctx, &device, session.app_bundle_id.as_deref().unwrap_or(""));
    }

    Ok(())
}

/// `close`: removes the session, flushing its `.ad` script if recording and
/// telling the iOS simulator runner to stop, per spec §3/§4.G.
pub async fn close(ctx: &DispatchContext, session_name: &str) -> Result<Value, DaemonError> {
    if !ctx.sessions.exists(session_name).await {
        return Err(DaemonError::session_not_found(session_name));
    }
    close_internal(ctx, session_name).await?;
    Ok(json!({ "session": session_name, "closed": true }))
}

/// `session_list`: exempt from the session-selector cross-check, per §4.F.
pub async fn session_list(ctx: &DispatchContext) -> Result<Value, DaemonError> {
    let names = ctx.sessions.names().await;
    let mut sessions = Vec::with_capacity(names.len());
    for name in names {
        if let Some(session) = ctx.sessions.get(&name).await {
            sessions.push(json!({
                "name": session.name,
                "device": { "platform": session.device.platform, "id": session.device.device_id, "name": session.device.device_name },
                "appBundleId": session.app_bundle_id,
                "createdAt": session.created_at,
                "actionCount": session.actions.len(),
            }));
        }
    }
    Ok(json!({ "sessions": sessions }))
}

/// `devices`: lists visible devices, independent of any session.
pub async fn devices(ctx: &DispatchContext, req: &Request) -> Result<Value, DaemonError> {
    let platform = match req.flag_str("platform").as_deref() {
        Some("ios") => Some(agent_device_snapshot::Platform::Ios),
        Some("android") => Some(agent_device_snapshot::Platform::Android),
        _ => None,
    };
    let devices = crate::device_select::list_all_devices(ctx, platform).await?;
    let rendered: Vec<Value> = devices
        .into_iter()
        .map(|d| json!({ "platform": d.platform, "id": d.id, "name": d.name, "kind": d.kind, "booted": d.booted }))
        .collect();
    Ok(json!({ "devices": rendered }))
}

/// `boot`: ensures the resolved device is ready, either binding nothing (a
/// sessionless readiness probe) or priming an already-bound session's
/// device, per §9's "anytime a sessionless command runs" note.
pub async fn boot(ctx: &DispatchContext, req: &Request) -> Result<Value, DaemonError> {
    let device = resolve_target_device(ctx, req).await?;
    ensure_device_ready(ctx, &device).await?;
    Ok(json!({ "platform": device.platform, "id": device.id, "ready": true }))
}
