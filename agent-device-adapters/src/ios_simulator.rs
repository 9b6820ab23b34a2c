use agent_device_snapshot::Platform;
use serde::Deserialize;
use tracing::instrument;

use crate::device::{Device, DeviceKind, Readiness};
use crate::error::{AdapterError, AdapterFailureReason};
use crate::executor::{ProcessRunner, RunOptions};

const DEFAULT_BOOT_TIMEOUT_MS: u64 = 120_000;
const MIN_BOOT_TIMEOUT_MS: u64 = 5_000;

/// `AGENT_DEVICE_IOS_BOOT_TIMEOUT_MS`, validated against the documented
/// floor; unparseable or too-small values fall back to the default.
pub fn boot_timeout_ms() -> u64 {
    match std::env::var("AGENT_DEVICE_IOS_BOOT_TIMEOUT_MS") {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(value) if value >= MIN_BOOT_TIMEOUT_MS => value,
            _ => DEFAULT_BOOT_TIMEOUT_MS,
        },
        Err(_) => DEFAULT_BOOT_TIMEOUT_MS,
    }
}

#[derive(Debug, Deserialize)]
struct SimctlListRoot {
    devices: std::collections::HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
    #[serde(rename = "isAvailable", default)]
    is_available: bool,
}

#[instrument(skip(runner))]
pub async fn list_devices(runner: &dyn ProcessRunner) -> Result<Vec<Device>, AdapterError> {
    let output = runner
        .run(
            "xcrun",
            &["simctl".into(), "list".into(), "devices".into(), "--json".into()],
            RunOptions::default(),
        )
        .await?;
    let parsed: SimctlListRoot = serde_json::from_str(&output.stdout).map_err(|err| {
        AdapterError::new(
            AdapterFailureReason::UnparseableOutput,
            format!("could not parse `simctl list devices --json`: {err}"),
            false,
        )
    })?;
    let mut devices = Vec::new();
    for runtime_devices in parsed.devices.values() {
        for device in runtime_devices {
            if !device.is_available {
                continue;
            }
            devices.push(Device {
                platform: Platform::Ios,
                id: device.udid.clone(),
                name: device.name.clone(),
                kind: DeviceKind::Simulator,
                booted: device.state == "Booted",
            });
        }
    }
    Ok(devices)
}

/// Boots the simulator via `simctl bootstatus`, which blocks until the
/// device reports booted or the command's own timeout elapses.
#[instrument(skip(runner))]
pub async fn ensure_ready(runner: &dyn ProcessRunner, udid: &str) -> Result<Readiness, AdapterError> {
    runner
        .run("xcrun", &["simctl".into(), "boot".into(), udid.to_string()], RunOptions {
            allow_failure: true,
            ..RunOptions::default()
        })
        .await?;

    let timeout_ms = boot_timeout_ms();
    let result = runner
        .run(
            "xcrun",
            &[
                "simctl".into(),
                "bootstatus".into(),
                udid.to_string(),
                "-b".into(),
            ],
            RunOptions {
                timeout_ms,
                allow_failure: true,
                ..RunOptions::default()
            },
        )
        .await?;

    if result.exit_code == Some(0) {
        Ok(Readiness::ready())
    } else {
        Ok(Readiness::not_ready(format!(
            "simulator {udid} did not report booted within {timeout_ms}ms: {}",
            result.stderr.trim()
        )))
    }
}

#[instrument(skip(runner))]
pub async fn open_app(runner: &dyn ProcessRunner, udid: &str, bundle_id: &str) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &["simctl".into(), "launch".into(), udid.to_string(), bundle_id.to_string()],
            RunOptions::default(),
        )
        .await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn terminate_app(runner: &dyn ProcessRunner, udid: &str, bundle_id: &str) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &[
                "simctl".into(),
                "terminate".into(),
                udid.to_string(),
                bundle_id.to_string(),
            ],
            RunOptions {
                allow_failure: true,
                ..RunOptions::default()
            },
        )
        .await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn reinstall(runner: &dyn ProcessRunner, udid: &str, bundle_id: &str, app_path: &str) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &["simctl".into(), "uninstall".into(), udid.to_string(), bundle_id.to_string()],
            RunOptions {
                allow_failure: true,
                ..RunOptions::default()
            },
        )
        .await?;
    runner
        .run(
            "xcrun",
            &["simctl".into(), "install".into(), udid.to_string(), app_path.to_string()],
            RunOptions::default(),
        )
        .await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn push(runner: &dyn ProcessRunner, udid: &str, bundle_id: &str, local: &str) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &[
                "simctl".into(),
                "addmedia".into(),
                udid.to_string(),
                local.to_string(),
            ],
            RunOptions::default(),
        )
        .await
        .map(|_| ())
        .or_else(|_| {
            // Media add is best-effort; app-container push is the general path.
            Err(AdapterError::new(
                AdapterFailureReason::NonZeroExit,
                format!("could not push '{local}' into {bundle_id} on {udid}"),
                false,
            ))
        })
}

#[instrument(skip(runner))]
pub async fn screenshot(runner: &dyn ProcessRunner, udid: &str, local_path: &str) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &[
                "simctl".into(),
                "io".into(),
                udid.to_string(),
                "screenshot".into(),
                local_path.to_string(),
            ],
            RunOptions::default(),
        )
        .await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn record_start(runner: &dyn ProcessRunner, udid: &str, local_path: &str) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &[
                "simctl".into(),
                "io".into(),
                udid.to_string(),
                "recordVideo".into(),
                local_path.to_string(),
            ],
            RunOptions {
                timeout_ms: u64::MAX / 2,
                allow_failure: true,
                ..RunOptions::default()
            },
        )
        .await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn record_stop(runner: &dyn ProcessRunner) -> Result<(), AdapterError> {
    // The recording process is terminated by the caller (dispatcher tracks
    // its pid and sends SIGINT); this only awaits drain via a short sleep,
    // matching the spec's "send SIGINT and await drain".
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn settings_privacy_grant(runner: &dyn ProcessRunner, udid: &str, bundle_id: &str, service: &str) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &[
                "simctl".into(),
                "privacy".into(),
                udid.to_string(),
                "grant".into(),
                service.to_string(),
                bundle_id.to_string(),
            ],
            RunOptions::default(),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_timeout_defaults_when_unset() {
        std::env::remove_var("AGENT_DEVICE_IOS_BOOT_TIMEOUT_MS");
        assert_eq!(boot_timeout_ms(), DEFAULT_BOOT_TIMEOUT_MS);
    }
}
