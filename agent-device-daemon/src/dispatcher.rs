use std::time::Instant;

use agent_device_core::{DaemonError, DiagnosticContext, DiagnosticSink, ErrorCode};
use serde_json::Value;
use uuid::Uuid;

use crate::context::DispatchContext;
use crate::handlers::{batch, device_ops, find, gesture, interaction, record, replay, session, snapshot};
use crate::wire::{Request, Response, WIRE_SELECTOR_EXEMPT};

const DEFAULT_SESSION: &str = "default";

fn request_id(req: &Request) -> String {
    req.meta
        .get("requestId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Flags that bind a request to a specific device; present together with a
/// session that is already bound to a *different* device, they are rejected
/// per §4.F's session-selector cross-check.
fn requested_device_selector(req: &Request) -> Option<(Option<String>, Option<String>, Option<String>, Option<String>)> {
    let platform = req.flag_str("platform");
    let udid = req.flag_str("udid");
    let serial = req.flag_str("serial");
    let device = req.flag_str("device");
    if platform.is_none() && udid.is_none() && serial.is_none() && device.is_none() {
        None
    } else {
        Some((platform, udid, serial, device))
    }
}

async fn check_session_selector_conflict(
    ctx: &DispatchContext,
    session_name: &str,
    req: &Request,
) -> Result<(), DaemonError> {
    if WIRE_SELECTOR_EXEMPT.contains(&req.command.as_str()) {
        return Ok(());
    }
    let Some((platform, udid, serial, device)) = requested_device_selector(req) else {
        return Ok(());
    };
    let Some(existing) = ctx.sessions.get(session_name).await else {
        return Ok(());
    };

    let binding = &existing.device;
    let platform_str = match binding.platform {
        agent_device_snapshot::Platform::Ios => "ios",
        agent_device_snapshot::Platform::Android => "android",
    };

    if let Some(p) = &platform {
        if p != platform_str {
            return Err(conflict_error(session_name, "platform", p, platform_str));
        }
    }
    if let Some(u) = &udid {
        if Some(u) != binding.udid.as_ref() {
            return Err(conflict_error(session_name, "udid", u, binding.udid.as_deref().unwrap_or("")));
        }
    }
    if let Some(s) = &serial {
        if Some(s) != binding.serial.as_ref() {
            return Err(conflict_error(session_name, "serial", s, binding.serial.as_deref().unwrap_or("")));
        }
    }
    if let Some(d) = &device {
        let bound_name = binding.device_name.as_deref().unwrap_or(&binding.device_id);
        if !d.eq_ignore_ascii_case(bound_name) {
            return Err(conflict_error(session_name, "device", d, bound_name));
        }
    }
    Ok(())
}

fn conflict_error(session_name: &str, flag: &str, requested: &str, bound: &str) -> DaemonError {
    DaemonError::invalid_args(format!(
        "session '{session_name}' is already bound to {flag}={bound}; requested {flag}={requested} conflicts with it"
    ))
    .with_hint("open a new session, or omit the device selector flags to reuse the active session's device".to_string())
}

/// Routes one already-authenticated, already-session-resolved request to its
/// handler. Shared by live dispatch and by `replay`/`batch`, which re-enter
/// this table for each of their sub-steps.
pub async fn handle_command(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    match req.command.as_str() {
        "open" => session::open(ctx, req, session_name).await,
        "close" => session::close(ctx, session_name).await,
        "session_list" => session::session_list(ctx).await,
        "devices" => session::devices(ctx, req).await,
        "boot" => session::boot(ctx, req).await,

        "snapshot" => snapshot::snapshot(ctx, req, session_name).await,
        "diff" => snapshot::diff(ctx, req, session_name).await,

        "press" => interaction::press(ctx, req, session_name).await,
        "click" => interaction::click(ctx, req, session_name).await,
        "fill" => interaction::fill(ctx, req, session_name).await,
        "get" => interaction::get(ctx, req, session_name).await,
        "is" => interaction::is(ctx, req, session_name).await,
        "long-press" => interaction::long_press(ctx, req, session_name).await,
        "pinch" => interaction::pinch(ctx, req, session_name).await,
        "focus" => interaction::focus(ctx, req, session_name).await,
        "type" => interaction::type_text(ctx, req, session_name).await,

        "find" => find::find(ctx, req, session_name).await,

        "scroll" => gesture::scroll(ctx, req, session_name).await,
        "scrollintoview" => gesture::scroll_into_view(ctx, req, session_name).await,
        "alert" => gesture::alert(ctx, req, session_name).await,
        "wait" => gesture::wait(ctx, req, session_name).await,

        "home" => device_ops::home(ctx, req, session_name).await,
        "back" => device_ops::back(ctx, req, session_name).await,
        "app-switcher" => device_ops::app_switcher(ctx, req, session_name).await,
        "screenshot" => device_ops::screenshot(ctx, req, session_name).await,
        "push" => device_ops::push(ctx, req, session_name).await,
        "settings" => device_ops::settings(ctx, req, session_name).await,
        "reinstall" => device_ops::reinstall(ctx, req, session_name).await,
        "apps" => device_ops::apps(ctx, req, session_name).await,
        "appstate" => device_ops::appstate(ctx, req, session_name).await,

        "record" => record::record(ctx, req, session_name).await,
        "trace" => record::trace(ctx, req, session_name).await,

        "replay" => replay::replay(ctx, req, session_name).await,
        "batch" => batch::batch(ctx, req, session_name).await,

        other => Err(DaemonError::new(ErrorCode::InvalidArgs, format!("unknown command '{other}'"))),
    }
}

/// Top-level entry point for one wire request: token auth, default-session
/// routing, the session-selector cross-check, and per-request diagnostics,
/// wrapping `handle_command`. This is what `main`'s connection loop calls.
pub async fn dispatch(ctx: &DispatchContext, req: Request) -> Response {
    if req.token != ctx.token {
        return Response::from_daemon_error(&DaemonError::new(ErrorCode::Unauthorized, "invalid or missing token"));
    }

    let session_flag_explicit = !req.used_default_session();
    let session_name = ctx
        .sessions
        .resolve_target_name(&req.session, DEFAULT_SESSION, session_flag_explicit)
        .await;

    let rid = request_id(&req);
    let debug = req.flag_bool("debug");
    let diag_ctx = DiagnosticContext::new(&ctx.home, rid.clone(), session_name.clone(), req.command.clone(), debug);
    let sink = DiagnosticSink::new();
    let start = Instant::now();
    sink.emit(&diag_ctx, "request_received", "info", Some(serde_json::json!({
        "command": req.command,
        "positionals": req.positionals,
    })), None);

    let result = run_checked(ctx, &req, &session_name).await;

    let duration_ms = start.elapsed().as_millis() as u64;
    ctx.cancellations.clear(&rid);

    let response = match &result {
        Ok(data) => {
            sink.emit(&diag_ctx, "request_completed", "info", Some(serde_json::json!({ "ok": true })), Some(duration_ms));
            Response::ok(Some(data.clone()))
        }
        Err(err) => {
            let mut err = err.clone();
            err.diagnostic_id = Some(diag_ctx.diagnostic_id.clone());
            err.log_path = Some(diag_ctx.log_path.to_string_lossy().into_owned());
            sink.emit(&diag_ctx, "request_failed", "error", Some(serde_json::json!({
                "code": err.code.as_str(),
                "message": err.message,
            })), Some(duration_ms));
            Response::from_daemon_error(&err)
        }
    };

    if let Err(e) = sink.flush(&diag_ctx) {
        tracing::warn!(error = %e, path = %diag_ctx.log_path.display(), "failed to flush diagnostic log");
    }

    response
}

async fn run_checked(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    check_session_selector_conflict(ctx, session_name, req).await?;
    handle_command(ctx, req, session_name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_device_core::{DeviceBinding, Session};
    use agent_device_adapters::DeviceKind;

    fn binding() -> DeviceBinding {
        DeviceBinding {
            device_id: "udid-1".to_string(),
            platform: agent_device_snapshot::Platform::Ios,
            kind: DeviceKind::Simulator,
            device_name: Some("iPhone 15".to_string()),
            udid: Some("udid-1".to_string()),
            serial: None,
        }
    }

    #[tokio::test]
    async fn session_selector_conflict_rejects_mismatched_platform() {
        let ctx = DispatchContext::new(std::env::temp_dir(), "tok".to_string(), agent_device_core::Config::default());
        ctx.sessions.create(Session::new("main".to_string(), binding())).await.unwrap();

        let req: Request = serde_json::from_str(
            r#"{"token":"tok","session":"main","command":"click","positionals":[],"flags":{"platform":"android"}}"#,
        )
        .unwrap();

        let err = check_session_selector_conflict(&ctx, "main", &req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgs);
    }

    #[tokio::test]
    async fn session_list_is_exempt_from_selector_conflict() {
        let ctx = DispatchContext::new(std::env::temp_dir(), "tok".to_string(), agent_device_core::Config::default());
        ctx.sessions.create(Session::new("main".to_string(), binding())).await.unwrap();

        let req: Request = serde_json::from_str(
            r#"{"token":"tok","session":"main","command":"session_list","positionals":[],"flags":{"platform":"android"}}"#,
        )
        .unwrap();

        assert!(check_session_selector_conflict(&ctx, "main", &req).await.is_ok());
    }

    #[tokio::test]
    async fn dispatch_rejects_bad_token() {
        let ctx = DispatchContext::new(std::env::temp_dir(), "tok".to_string(), agent_device_core::Config::default());
        let req: Request = serde_json::from_str(
            r#"{"token":"wrong","command":"devices","positionals":[]}"#,
        )
        .unwrap();
        let response = dispatch(&ctx, req).await;
        match response {
            Response::Err { error, .. } => assert_eq!(error.code, "UNAUTHORIZED"),
            _ => panic!("expected an error response"),
        }
    }
}
