use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::daemon_client::DaemonClient;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const POLL_ATTEMPTS: u32 = 50;

/// Locates the `agent-device-daemon` binary: first next to this executable
/// (the normal installed layout, both binaries shipped side by side), then
/// falls back to a bare name resolved via `$PATH`.
fn daemon_binary_path() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("agent-device-daemon");
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    PathBuf::from("agent-device-daemon")
}

/// Connects to the already-running daemon for `home`, or spawns one and
/// waits for its info file to appear. The spawned process is detached: it
/// outlives this CLI invocation, per the daemon's own long-lived-process
/// contract (§2).
pub async fn ensure_daemon(home: &Path) -> Result<DaemonClient> {
    if let Ok(client) = DaemonClient::discover(home) {
        return Ok(client);
    }

    std::process::Command::new(daemon_binary_path())
        .arg("--home")
        .arg(home)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to start agent-device-daemon: {e}"))?;

    for _ in 0..POLL_ATTEMPTS {
        tokio::time::sleep(POLL_INTERVAL).await;
        if let Ok(client) = DaemonClient::discover(home) {
            return Ok(client);
        }
    }

    bail!("daemon did not become ready at {} after {:?}", home.display(), POLL_INTERVAL * POLL_ATTEMPTS)
}
