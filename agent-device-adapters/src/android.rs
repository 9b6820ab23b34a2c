use agent_device_snapshot::{Platform, Rect, RawNode};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::{debug, instrument};

use crate::device::{Device, DeviceKind, Readiness};
use crate::error::{AdapterError, AdapterFailureReason};
use crate::executor::{ProcessRunner, RunOptions};

const BOOT_POLL_INTERVAL_MS: u64 = 500;

fn adb_args(serial: &str, rest: &[&str]) -> Vec<String> {
    let mut args = vec!["-s".to_string(), serial.to_string()];
    args.extend(rest.iter().map(|s| s.to_string()));
    args
}

async fn adb(runner: &dyn ProcessRunner, serial: &str, rest: &[&str]) -> Result<String, AdapterError> {
    let output = runner
        .run("adb", &adb_args(serial, rest), RunOptions::default())
        .await?;
    Ok(output.stdout)
}

/// `adb devices -l` parsed into `Device` records.
#[instrument(skip(runner))]
pub async fn list_devices(runner: &dyn ProcessRunner) -> Result<Vec<Device>, AdapterError> {
    let output = runner
        .run("adb", &["devices".into(), "-l".into()], RunOptions::default())
        .await?;
    let mut devices = Vec::new();
    for line in output.stdout.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(serial) = fields.next() else { continue };
        let state = fields.next().unwrap_or("unknown");
        let booted = state == "device";
        let kind = if serial.starts_with("emulator-") {
            DeviceKind::Emulator
        } else {
            DeviceKind::Device
        };
        let mut name = serial.to_string();
        for field in fields {
            if let Some(model) = field.strip_prefix("model:") {
                name = model.replace('_', " ");
            }
        }
        devices.push(Device {
            platform: Platform::Android,
            id: serial.to_string(),
            name,
            kind,
            booted,
        });
    }
    Ok(devices)
}

/// Waits for `sys.boot_completed=1`, per §4.E. Fails fast (no retry) on
/// "device not found" or permission errors; any other failure is treated as
/// not-yet-ready and polled again until the deadline held by the caller
/// expires.
#[instrument(skip(runner))]
pub async fn ensure_ready(runner: &dyn ProcessRunner, serial: &str) -> Result<Readiness, AdapterError> {
    loop {
        let result = runner
            .run(
                "adb",
                &adb_args(serial, &["shell", "getprop", "sys.boot_completed"]),
                RunOptions {
                    allow_failure: true,
                    timeout_ms: 5_000,
                    ..RunOptions::default()
                },
            )
            .await?;

        let stderr_lower = result.stderr.to_lowercase();
        if stderr_lower.contains("device not found") || stderr_lower.contains("no devices") {
            return Err(AdapterError::new(
                AdapterFailureReason::DeviceNotFound,
                format!("adb reports no such device: {serial}"),
                false,
            ));
        }
        if stderr_lower.contains("permission denied") {
            return Err(AdapterError::new(
                AdapterFailureReason::PermissionDenied,
                result.stderr.clone(),
                false,
            ));
        }

        if result.stdout.trim() == "1" {
            return Ok(Readiness::ready());
        }

        debug!(serial, "android device not yet booted, polling");
        tokio::time::sleep(std::time::Duration::from_millis(BOOT_POLL_INTERVAL_MS)).await;
    }
}

#[instrument(skip(runner))]
pub async fn open_app(runner: &dyn ProcessRunner, serial: &str, package: &str, activity: Option<&str>) -> Result<(), AdapterError> {
    let component = match activity {
        Some(activity) => format!("{package}/{activity}"),
        None => format!("{package}/.MainActivity"),
    };
    let args: Vec<String> = if activity.is_some() {
        vec!["shell".into(), "am".into(), "start".into(), "-n".into(), component]
    } else {
        vec![
            "shell".into(),
            "monkey".into(),
            "-p".into(),
            package.into(),
            "-c".into(),
            "android.intent.category.LAUNCHER".into(),
            "1".into(),
        ]
    };
    runner
        .run("adb", &adb_args(serial, &args.iter().map(String::as_str).collect::<Vec<_>>()), RunOptions::default())
        .await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn force_stop(runner: &dyn ProcessRunner, serial: &str, package: &str) -> Result<(), AdapterError> {
    adb(runner, serial, &["shell", "am", "force-stop", package]).await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn tap(runner: &dyn ProcessRunner, serial: &str, x: f64, y: f64) -> Result<(), AdapterError> {
    let x = format!("{x:.0}");
    let y = format!("{y:.0}");
    adb(runner, serial, &["shell", "input", "tap", &x, &y]).await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn long_press(runner: &dyn ProcessRunner, serial: &str, x: f64, y: f64, hold_ms: u64) -> Result<(), AdapterError> {
    let x = format!("{x:.0}");
    let y = format!("{y:.0}");
    let hold = hold_ms.to_string();
    adb(runner, serial, &["shell", "input", "swipe", &x, &y, &x, &y, &hold]).await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn pinch(runner: &dyn ProcessRunner, serial: &str, cx: f64, cy: f64, scale: f64) -> Result<(), AdapterError> {
    // `input` has no native pinch; two synthetic swipes approximate it, same
    // as the common adb-automation idiom (drag two points toward/away from
    // the pinch center).
    let spread = 200.0 * scale.max(0.1);
    let (x1a, y1a) = (cx - 20.0, cy);
    let (x1b, y1b) = (cx - spread, cy);
    let (x2a, y2a) = (cx + 20.0, cy);
    let (x2b, y2b) = (cx + spread, cy);
    for (xa, ya, xb, yb) in [(x1a, y1a, x1b, y1b), (x2a, y2a, x2b, y2b)] {
        let args = [
            "shell".to_string(),
            "input".to_string(),
            "swipe".to_string(),
            format!("{xa:.0}"),
            format!("{ya:.0}"),
            format!("{xb:.0}"),
            format!("{yb:.0}"),
            "150".to_string(),
        ];
        runner
            .run("adb", &adb_args(serial, &args.iter().map(String::as_str).collect::<Vec<_>>()), RunOptions::default())
            .await?;
    }
    Ok(())
}

#[instrument(skip(runner))]
pub async fn swipe(runner: &dyn ProcessRunner, serial: &str, x1: f64, y1: f64, x2: f64, y2: f64, duration_ms: u64) -> Result<(), AdapterError> {
    adb(
        runner,
        serial,
        &[
            "shell",
            "input",
            "swipe",
            &format!("{x1:.0}"),
            &format!("{y1:.0}"),
            &format!("{x2:.0}"),
            &format!("{y2:.0}"),
            &duration_ms.to_string(),
        ],
    )
    .await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn type_text(runner: &dyn ProcessRunner, serial: &str, text: &str) -> Result<(), AdapterError> {
    let escaped = text.replace(' ', "%s");
    adb(runner, serial, &["shell", "input", "text", &escaped]).await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn key_event(runner: &dyn ProcessRunner, serial: &str, keycode: &str) -> Result<(), AdapterError> {
    adb(runner, serial, &["shell", "input", "keyevent", keycode]).await?;
    Ok(())
}

pub async fn home(runner: &dyn ProcessRunner, serial: &str) -> Result<(), AdapterError> {
    key_event(runner, serial, "KEYCODE_HOME").await
}

pub async fn back(runner: &dyn ProcessRunner, serial: &str) -> Result<(), AdapterError> {
    key_event(runner, serial, "KEYCODE_BACK").await
}

pub async fn app_switcher(runner: &dyn ProcessRunner, serial: &str) -> Result<(), AdapterError> {
    key_event(runner, serial, "KEYCODE_APP_SWITCH").await
}

#[instrument(skip(runner))]
pub async fn push(runner: &dyn ProcessRunner, serial: &str, local: &str, remote: &str) -> Result<(), AdapterError> {
    adb(runner, serial, &["push", local, remote]).await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn settings_put(runner: &dyn ProcessRunner, serial: &str, namespace: &str, key: &str, value: &str) -> Result<(), AdapterError> {
    adb(runner, serial, &["shell", "settings", "put", namespace, key, value]).await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn reinstall(runner: &dyn ProcessRunner, serial: &str, package: &str, apk_path: &str) -> Result<(), AdapterError> {
    runner
        .run(
            "adb",
            &adb_args(serial, &["uninstall", package]),
            RunOptions {
                allow_failure: true,
                ..RunOptions::default()
            },
        )
        .await?;
    adb(runner, serial, &["install", "-r", apk_path]).await?;
    Ok(())
}

#[instrument(skip(runner))]
pub async fn list_apps(runner: &dyn ProcessRunner, serial: &str) -> Result<Vec<String>, AdapterError> {
    let output = adb(runner, serial, &["shell", "pm", "list", "packages"]).await?;
    Ok(output
        .lines()
        .filter_map(|line| line.strip_prefix("package:"))
        .map(|s| s.trim().to_string())
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
    NotRunning,
}

#[instrument(skip(runner))]
pub async fn app_state(runner: &dyn ProcessRunner, serial: &str, package: &str) -> Result<AppState, AdapterError> {
    let focus = adb(runner, serial, &["shell", "dumpsys", "activity", "activities"]).await?;
    if focus.lines().any(|l| l.contains("mResumedActivity") && l.contains(package)) {
        return Ok(AppState::Foreground);
    }
    let procs = adb(runner, serial, &["shell", "pidof", package]).await.unwrap_or_default();
    if procs.trim().is_empty() {
        Ok(AppState::NotRunning)
    } else {
        Ok(AppState::Background)
    }
}

#[instrument(skip(runner))]
pub async fn screenshot(runner: &dyn ProcessRunner, serial: &str, local_path: &str) -> Result<(), AdapterError> {
    let remote = "/sdcard/agent-device-screenshot.png";
    adb(runner, serial, &["shell", "screencap", "-p", remote]).await?;
    adb(runner, serial, &["pull", remote, local_path]).await?;
    adb(runner, serial, &["shell", "rm", "-f", remote]).await.ok();
    Ok(())
}

#[instrument(skip(runner))]
pub async fn record_start(runner: &dyn ProcessRunner, serial: &str, remote_path: &str) -> Result<(), AdapterError> {
    // `screenrecord` blocks until killed; the caller spawns this without
    // awaiting completion and sends `record_stop` to end it.
    runner
        .run(
            "adb",
            &adb_args(serial, &["shell", "screenrecord", remote_path]),
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
pub async fn record_stop(runner: &dyn ProcessRunner, serial: &str, remote_path: &str, local_path: &str) -> Result<(), AdapterError> {
    adb(runner, serial, &["shell", "pkill", "-l", "SIGINT", "screenrecord"]).await.ok();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    adb(runner, serial, &["pull", remote_path, local_path]).await?;
    adb(runner, serial, &["shell", "rm", "-f", remote_path]).await.ok();
    Ok(())
}

/// Captures the current window hierarchy via `uiautomator dump` and parses
/// the resulting XML into preorder `RawNode`s. Bounds of the form
/// `[left,top][right,bottom]` become a `Rect`.
#[instrument(skip(runner))]
pub async fn snapshot(runner: &dyn ProcessRunner, serial: &str) -> Result<Vec<RawNode>, AdapterError> {
    let remote = "/sdcard/agent-device-dump.xml";
    adb(runner, serial, &["shell", "uiautomator", "dump", remote]).await?;
    let xml = adb(runner, serial, &["shell", "cat", remote]).await?;
    adb(runner, serial, &["shell", "rm", "-f", remote]).await.ok();
    parse_uiautomator_xml(&xml)
}

fn parse_bounds(raw: &str) -> Option<Rect> {
    let raw = raw.trim();
    let raw = raw.strip_prefix('[')?;
    let (left_top, rest) = raw.split_once(']')?;
    let rest = rest.strip_prefix('[')?;
    let right_bottom = rest.strip_suffix(']')?;
    let (left, top) = left_top.split_once(',')?;
    let (right, bottom) = right_bottom.split_once(',')?;
    let (left, top, right, bottom): (f64, f64, f64, f64) = (
        left.parse().ok()?,
        top.parse().ok()?,
        right.parse().ok()?,
        bottom.parse().ok()?,
    );
    Some(Rect {
        x: left,
        y: top,
        width: (right - left).max(0.0),
        height: (bottom - top).max(0.0),
    })
}

fn attr(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn push_node(e: &quick_xml::events::BytesStart, stack: &[usize], index: usize, nodes: &mut Vec<RawNode>) {
    let class = attr(e, "class").unwrap_or_default();
    let text = attr(e, "text").filter(|s| !s.is_empty());
    let desc = attr(e, "content-desc").filter(|s| !s.is_empty());
    let resource_id = attr(e, "resource-id").filter(|s| !s.is_empty());
    let bounds = attr(e, "bounds").and_then(|b| parse_bounds(&b));
    let enabled = attr(e, "enabled").map(|v| v == "true");
    let selected = attr(e, "selected").map(|v| v == "true");
    let clickable = attr(e, "clickable").map(|v| v == "true").unwrap_or(false);
    let focusable = attr(e, "focusable").map(|v| v == "true").unwrap_or(false);

    nodes.push(RawNode {
        index: Some(index),
        parent_index: stack.last().copied(),
        depth: Some(stack.len()),
        node_type: class,
        label: desc,
        value: text,
        identifier: resource_id,
        rect: bounds,
        enabled,
        selected,
        hittable: Some(clickable || focusable),
    });
}

fn parse_uiautomator_xml(xml: &str) -> Result<Vec<RawNode>, AdapterError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut nodes = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut index = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"node" => {
                push_node(&e, &stack, index, &mut nodes);
                stack.push(index);
                index += 1;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"node" => {
                push_node(&e, &stack, index, &mut nodes);
                index += 1;
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"node" => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(AdapterError::new(
                    AdapterFailureReason::UnparseableOutput,
                    format!("uiautomator dump XML parse error: {err}"),
                    false,
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bounds() {
        let rect = parse_bounds("[0,100][200,300]").unwrap();
        assert_eq!(rect.x, 0.0);
        assert_eq!(rect.y, 100.0);
        assert_eq!(rect.width, 200.0);
        assert_eq!(rect.height, 200.0);
    }

    #[test]
    fn malformed_bounds_yield_none() {
        assert!(parse_bounds("not-bounds").is_none());
    }
}
