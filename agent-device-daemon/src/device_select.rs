use agent_device_adapters::{android, ios_device, ios_simulator, Device, DeviceKind};
use agent_device_core::DaemonError;
use agent_device_snapshot::Platform;

use crate::context::DispatchContext;
use crate::wire::Request;

/// Lists every currently visible device across both platforms, or just the
/// one named by `platform` if given. Used by both the `devices` command and
/// target resolution.
pub async fn list_all_devices(ctx: &DispatchContext, platform: Option<Platform>) -> Result<Vec<Device>, DaemonError> {
    let mut devices = Vec::new();

    if platform != Some(Platform::Ios) {
        match android::list_devices(ctx.runner.as_ref()).await {
            Ok(mut found) => devices.append(&mut found),
            Err(err) if err.reason == agent_device_adapters::AdapterFailureReason::BinaryNotFound => {}
            Err(err) => return Err(adapter_err_to_daemon(err)),
        }
    }

    if platform != Some(Platform::Android) {
        match ios_simulator::list_devices(ctx.runner.as_ref()).await {
            Ok(mut found) => devices.append(&mut found),
            Err(err) if err.reason == agent_device_adapters::AdapterFailureReason::BinaryNotFound => {}
            Err(err) => return Err(adapter_err_to_daemon(err)),
        }

        let tmp = std::env::temp_dir().join(format!("agent-device-devicectl-list-{}.json", uuid::Uuid::new_v4()));
        match ios_device::list_devices(ctx.runner.as_ref(), tmp.to_string_lossy().as_ref()).await {
            Ok(mut found) => devices.append(&mut found),
            Err(err) if err.reason == agent_device_adapters::AdapterFailureReason::BinaryNotFound => {}
            Err(_) => {} // physical-device probing is best-effort for the listing command
        }
        let _ = std::fs::remove_file(&tmp);
    }

    Ok(devices)
}

pub fn adapter_err_to_daemon(err: agent_device_adapters::AdapterError) -> DaemonError {
    let mut daemon_err = DaemonError::command_failed(err.message.clone(), err.transient)
        .with_details(serde_json::json!({ "reason": err.reason }));
    if let Some(hint) = err.hint {
        daemon_err = daemon_err.with_hint(hint);
    }
    daemon_err
}

fn platform_flag(req: &Request) -> Option<Platform> {
    match req.flag_str("platform").as_deref() {
        Some("ios") => Some(Platform::Ios),
        Some("android") => Some(Platform::Android),
        _ => None,
    }
}

/// Resolves the device named by a request's `platform`/`device`/`udid`/
/// `serial` flags against the currently visible device list. `device` is
/// matched case-insensitively by exact equality (§9 Open Question:
/// equality, not substring — see DESIGN.md).
pub async fn resolve_target_device(ctx: &DispatchContext, req: &Request) -> Result<Device, DaemonError> {
    let platform = platform_flag(req);
    let udid = req.flag_str("udid");
    let serial = req.flag_str("serial");
    let device_name = req.flag_str("device");

    let candidates = list_all_devices(ctx, platform).await?;
    let has_explicit_selector = udid.is_some() || serial.is_some() || device_name.is_some();

    let matching = |d: &Device| -> bool {
        if let Some(udid) = &udid {
            if &d.id != udid {
                return false;
            }
        }
        if let Some(serial) = &serial {
            if &d.id != serial {
                return false;
            }
        }
        if let Some(name) = &device_name {
            if !d.name.eq_ignore_ascii_case(name) {
                return false;
            }
        }
        true
    };

    let matches: Vec<Device> = candidates.iter().filter(|d| matching(d)).cloned().collect();

    match matches.len() {
        0 if !has_explicit_selector => candidates
            .into_iter()
            .find(|d| d.booted || d.kind == DeviceKind::Device)
            .ok_or_else(|| DaemonError::invalid_args("no device is available; connect or boot one first")),
        0 => Err(DaemonError::invalid_args(format!(
            "no device matches platform={platform:?} udid={udid:?} serial={serial:?} device={device_name:?}"
        ))),
        1 => Ok(matches.into_iter().next().expect("len checked above")),
        _ => Err(DaemonError::new(
            agent_device_core::ErrorCode::AmbiguousMatch,
            "multiple devices match the given selectors; narrow with --udid or --serial",
        )),
    }
}
