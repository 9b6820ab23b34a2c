use agent_device_snapshot::Platform;
use serde::Deserialize;
use tracing::instrument;

use crate::device::{Device, DeviceKind, Readiness};
use crate::error::{AdapterError, AdapterFailureReason};
use crate::executor::{ProcessRunner, RunOptions};

const DEFAULT_READY_TIMEOUT_MS: u64 = 15_000;
const MIN_READY_TIMEOUT_MS: u64 = 1_000;

pub fn ready_timeout_ms() -> u64 {
    match std::env::var("AGENT_DEVICE_IOS_DEVICE_READY_TIMEOUT_MS") {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(value) if value >= MIN_READY_TIMEOUT_MS => value,
            _ => DEFAULT_READY_TIMEOUT_MS,
        },
        Err(_) => DEFAULT_READY_TIMEOUT_MS,
    }
}

#[derive(Debug, Deserialize)]
struct DevicectlListRoot {
    result: DevicectlListResult,
}

#[derive(Debug, Deserialize)]
struct DevicectlListResult {
    #[serde(default)]
    devices: Vec<DevicectlListDevice>,
}

#[derive(Debug, Deserialize)]
struct DevicectlListDevice {
    #[serde(rename = "identifier")]
    udid: String,
    #[serde(rename = "deviceProperties", default)]
    device_properties: DeviceProperties,
    #[serde(rename = "connectionProperties", default)]
    connection_properties: ConnectionProperties,
}

#[derive(Debug, Deserialize, Default)]
struct DeviceProperties {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize, Default)]
struct ConnectionProperties {
    #[serde(rename = "tunnelState", default)]
    tunnel_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DevicectlInfoRoot {
    result: DevicectlInfoResult,
}

#[derive(Debug, Deserialize)]
struct DevicectlInfoResult {
    #[serde(rename = "connectionProperties", default)]
    connection_properties: ConnectionProperties,
}

#[instrument(skip(runner))]
pub async fn list_devices(runner: &dyn ProcessRunner, tmp_path: &str) -> Result<Vec<Device>, AdapterError> {
    runner
        .run(
            "xcrun",
            &[
                "devicectl".into(),
                "list".into(),
                "devices".into(),
                "--json-output".into(),
                tmp_path.into(),
            ],
            RunOptions::default(),
        )
        .await?;

    let contents = tokio::fs::read_to_string(tmp_path).await.map_err(|err| {
        AdapterError::new(
            AdapterFailureReason::UnparseableOutput,
            format!("could not read devicectl list output at {tmp_path}: {err}"),
            false,
        )
    })?;
    let parsed: DevicectlListRoot = serde_json::from_str(&contents).map_err(|err| {
        AdapterError::new(
            AdapterFailureReason::UnparseableOutput,
            format!("could not parse devicectl list JSON: {err}"),
            false,
        )
    })?;

    Ok(parsed
        .result
        .devices
        .into_iter()
        .map(|d| Device {
            platform: Platform::Ios,
            id: d.udid,
            name: d.device_properties.name,
            kind: DeviceKind::Device,
            booted: d.connection_properties.tunnel_state.as_deref() == Some("connected"),
        })
        .collect())
}

/// Readiness probe semantics, exact per §4.E:
/// - exit 0, `connectionProperties.tunnelState == "connected"` → ready.
/// - `tunnelState == "connecting"` → not ready, with a specific hint.
/// - exit 0, unparseable JSON → inconclusive.
/// - non-zero exit → not ready, hint derived from known stdout/stderr strings
///   or a generic fallback.
#[instrument(skip(runner))]
pub async fn ensure_ready(runner: &dyn ProcessRunner, udid: &str, tmp_path: &str) -> Result<Readiness, AdapterError> {
    let timeout_s = (ready_timeout_ms() / 1000).max(1).to_string();
    let output = runner
        .run(
            "xcrun",
            &[
                "devicectl".into(),
                "device".into(),
                "info".into(),
                "details".into(),
                "--device".into(),
                udid.into(),
                "--timeout".into(),
                timeout_s,
                "--json-output".into(),
                tmp_path.into(),
            ],
            RunOptions {
                allow_failure: true,
                ..RunOptions::default()
            },
        )
        .await?;

    if output.exit_code != Some(0) {
        let combined = format!("{} {}", output.stdout, output.stderr).to_lowercase();
        let hint = derive_not_ready_hint(&combined);
        return Ok(Readiness::not_ready(hint));
    }

    let contents = tokio::fs::read_to_string(tmp_path).await.unwrap_or_default();
    let parsed: Result<DevicectlInfoRoot, _> = serde_json::from_str(&contents);
    match parsed {
        Ok(info) => match info.result.connection_properties.tunnel_state.as_deref() {
            Some("connected") => Ok(Readiness::ready()),
            Some("connecting") => Ok(Readiness::not_ready(
                "Device tunnel is still connecting. Keep the device unlocked and on the same network, then try again.",
            )),
            _ => Ok(Readiness::not_ready(format!(
                "device {udid} is not in a connected tunnel state"
            ))),
        },
        Err(_) => Ok(Readiness::inconclusive()),
    }
}

fn derive_not_ready_hint(combined_output: &str) -> String {
    const KNOWN_HINTS: &[(&str, &str)] = &[
        ("not paired", "Trust this computer on the device, then try again."),
        ("locked", "Unlock the device and keep it unlocked."),
        (
            "no such device",
            "Connect the device over USB or Wi-Fi and ensure it appears in Xcode's Devices window.",
        ),
        (
            "unable to locate device",
            "Connect the device over USB or Wi-Fi and ensure it appears in Xcode's Devices window.",
        ),
    ];
    for (needle, hint) in KNOWN_HINTS {
        if combined_output.contains(needle) {
            return (*hint).to_string();
        }
    }
    "Connect the device, unlock it, and trust this computer, then try again.".to_string()
}

#[instrument(skip(runner))]
pub async fn open_app(runner: &dyn ProcessRunner, udid: &str, bundle_id: &str) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &[
                "devicectl".into(),
                "device".into(),
                "process".into(),
                "launch".into(),
                "--device".into(),
                udid.to_string(),
                bundle_id.to_string(),
            ],
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
                "devicectl".into(),
                "device".into(),
                "process".into(),
                "terminate".into(),
                "--device".into(),
                udid.to_string(),
                "--bundle-id".into(),
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
            &[
                "devicectl".into(),
                "device".into(),
                "uninstall".into(),
                "app".into(),
                "--device".into(),
                udid.to_string(),
                bundle_id.to_string(),
            ],
            RunOptions {
                allow_failure: true,
                ..RunOptions::default()
            },
        )
        .await?;
    runner
        .run(
            "xcrun",
            &[
                "devicectl".into(),
                "device".into(),
                "install".into(),
                "app".into(),
                "--device".into(),
                udid.to_string(),
                app_path.to_string(),
            ],
            RunOptions::default(),
        )
        .await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn push(
    runner: &dyn ProcessRunner,
    udid: &str,
    runner_bundle_id: &str,
    local: &str,
    remote_relative: &str,
) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &[
                "devicectl".into(),
                "device".into(),
                "copy".into(),
                "to".into(),
                "--device".into(),
                udid.to_string(),
                "--source".into(),
                local.to_string(),
                "--destination".into(),
                remote_relative.to_string(),
                "--domain-type".into(),
                "appDataContainer".into(),
                "--domain-identifier".into(),
                runner_bundle_id.to_string(),
            ],
            RunOptions::default(),
        )
        .await?;
    Ok(())
}

/// Pulls a recorded file out of the runner's app data container, per §4.G's
/// `devicectl device copy from` sequence.
#[instrument(skip(runner))]
pub async fn copy_from_runner(
    runner: &dyn ProcessRunner,
    udid: &str,
    runner_bundle_id: &str,
    remote_relative: &str,
    local: &str,
) -> Result<(), AdapterError> {
    runner
        .run(
            "xcrun",
            &[
                "devicectl".into(),
                "device".into(),
                "copy".into(),
                "from".into(),
                "--device".into(),
                udid.to_string(),
                "--source".into(),
                remote_relative.to_string(),
                "--destination".into(),
                local.to_string(),
                "--domain-type".into(),
                "appDataContainer".into(),
                "--domain-identifier".into(),
                runner_bundle_id.to_string(),
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
    fn known_hint_for_unpaired_device() {
        let hint = derive_not_ready_hint("error: device is not paired");
        assert!(hint.contains("Trust this computer"));
    }

    #[test]
    fn falls_back_to_generic_hint() {
        let hint = derive_not_ready_hint("some unexpected devicectl error");
        assert!(hint.contains("unlock it"));
    }

    #[test]
    fn ready_timeout_falls_back_below_floor() {
        std::env::set_var("AGENT_DEVICE_IOS_DEVICE_READY_TIMEOUT_MS", "10");
        assert_eq!(ready_timeout_ms(), DEFAULT_READY_TIMEOUT_MS);
        std::env::remove_var("AGENT_DEVICE_IOS_DEVICE_READY_TIMEOUT_MS");
    }
}
