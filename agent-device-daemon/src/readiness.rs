use agent_device_adapters::{android, ios_device, ios_simulator, Device, DeviceKind, Readiness};
use agent_device_core::DaemonError;
use agent_device_snapshot::Platform;

use crate::context::DispatchContext;
use crate::device_select::adapter_err_to_daemon;

/// Probes device readiness per §4.E, serialized through the device's keyed
/// lock lane since the probe itself talks to the device.
pub async fn ensure_device_ready(ctx: &DispatchContext, device: &Device) -> Result<(), DaemonError> {
    let readiness = ctx
        .device_lock
        .with_lock(&device.id, || probe(ctx, device))
        .await?;

    if readiness.ready {
        Ok(())
    } else if readiness.inconclusive {
        Err(DaemonError::command_failed(
            format!("could not determine readiness for device {}", device.id),
            true,
        ))
    } else {
        let mut err = DaemonError::command_failed(
            format!("device {} is not ready", device.id),
            true,
        );
        if let Some(hint) = readiness.hint {
            err = err.with_hint(hint);
        }
        Err(err)
    }
}

async fn probe(ctx: &DispatchContext, device: &Device) -> Result<Readiness, DaemonError> {
    match (device.platform, device.kind) {
        (Platform::Android, _) => android::ensure_ready(ctx.runner.as_ref(), &device.id)
            .await
            .map_err(adapter_err_to_daemon),
        (Platform::Ios, DeviceKind::Simulator) => ios_simulator::ensure_ready(ctx.runner.as_ref(), &device.id)
            .await
            .map_err(adapter_err_to_daemon),
        (Platform::Ios, _) => {
            let tmp = std::env::temp_dir().join(format!("agent-device-ready-{}.json", uuid::Uuid::new_v4()));
            let result = ios_device::ensure_ready(ctx.runner.as_ref(), &device.id, tmp.to_string_lossy().as_ref())
                .await
                .map_err(adapter_err_to_daemon);
            let _ = std::fs::remove_file(&tmp);
            result
        }
    }
}
