use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Layered configuration: defaults -> `~/.agent-device/config.toml` ->
/// environment variables -> CLI flags (the CLI applies flags after loading
/// this struct; this type only covers the first three layers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ios_boot_timeout_ms: u64,
    pub ios_device_ready_timeout_ms: u64,
    pub app_log_max_bytes: u64,
    pub app_log_max_files: u32,
    pub app_log_redact_patterns: Vec<String>,
    pub retry_logs: bool,
    /// Loopback port the on-device XCTest runner is expected to be
    /// reachable on. Establishing the tunnel/port-forward to a physical
    /// device is an out-of-scope external collaborator concern (spec §1);
    /// this is the fixed convention this daemon assumes once that tunnel
    /// exists, for both simulators (already loopback-local) and devices.
    pub xctest_runner_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ios_boot_timeout_ms: 120_000,
            ios_device_ready_timeout_ms: 15_000,
            app_log_max_bytes: 5 * 1024 * 1024,
            app_log_max_files: 1,
            app_log_redact_patterns: Vec::new(),
            retry_logs: false,
            xctest_runner_port: 27753,
        }
    }
}

/// Resolves the daemon's home directory: `$AGENT_DEVICE_HOME` if set
/// (mirroring the teacher's `get_base_dir(custom_path)` override), else
/// `~/.agent-device`.
pub fn resolve_home(custom: Option<&Path>) -> PathBuf {
    if let Some(path) = custom {
        return path.to_path_buf();
    }
    if let Ok(env_home) = std::env::var("AGENT_DEVICE_HOME") {
        if !env_home.is_empty() {
            return PathBuf::from(env_home);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-device")
}

fn parse_bounded_env_u64(name: &str, min: u64, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(value) if value >= min => value,
            Ok(value) => {
                warn!(env = name, value, min, "env var below minimum, using default");
                default
            }
            Err(_) => {
                warn!(env = name, raw, "env var is not a valid integer, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_positive_env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u32>() {
            Ok(value) if value > 0 => value,
            Ok(value) => {
                warn!(env = name, value, "env var must be positive, using default");
                default
            }
            Err(_) => {
                warn!(env = name, raw, "env var is not a valid integer, using default");
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    /// Loads the layered config: defaults, then `config_path` if it exists,
    /// then the documented environment variables.
    pub fn load(config_path: &Path) -> Config {
        let mut config = if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!(path = %config_path.display(), error = %err, "invalid config.toml, using defaults");
                        Config::default()
                    }
                },
                Err(err) => {
                    warn!(path = %config_path.display(), error = %err, "could not read config.toml, using defaults");
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        config.ios_boot_timeout_ms = parse_bounded_env_u64(
            "AGENT_DEVICE_IOS_BOOT_TIMEOUT_MS",
            5_000,
            config.ios_boot_timeout_ms,
        );
        config.ios_device_ready_timeout_ms = parse_bounded_env_u64(
            "AGENT_DEVICE_IOS_DEVICE_READY_TIMEOUT_MS",
            1_000,
            config.ios_device_ready_timeout_ms,
        );
        config.app_log_max_bytes = parse_bounded_env_u64(
            "AGENT_DEVICE_APP_LOG_MAX_BYTES",
            1,
            config.app_log_max_bytes,
        );
        config.app_log_max_files =
            parse_positive_env_u32("AGENT_DEVICE_APP_LOG_MAX_FILES", config.app_log_max_files);

        if let Ok(patterns) = std::env::var("AGENT_DEVICE_APP_LOG_REDACT_PATTERNS") {
            config.app_log_redact_patterns =
                patterns.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }

        if let Ok(retry_logs) = std::env::var("AGENT_DEVICE_RETRY_LOGS") {
            config.retry_logs = matches!(retry_logs.trim(), "1" | "true" | "TRUE" | "yes" | "on");
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation must be serialized across tests in this
    // module to avoid cross-test interference.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.ios_boot_timeout_ms, 120_000);
        assert_eq!(config.ios_device_ready_timeout_ms, 15_000);
        assert_eq!(config.app_log_max_files, 1);
    }

    #[test]
    fn resolve_home_prefers_explicit_override() {
        let custom = PathBuf::from("/tmp/agent-device-test-home");
        assert_eq!(resolve_home(Some(&custom)), custom);
    }

    #[test]
    fn out_of_range_boot_timeout_falls_back_to_default() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::set_var("AGENT_DEVICE_IOS_BOOT_TIMEOUT_MS", "100");
        let config = Config::load(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.ios_boot_timeout_ms, 120_000);
        std::env::remove_var("AGENT_DEVICE_IOS_BOOT_TIMEOUT_MS");
    }

    #[test]
    fn valid_boot_timeout_env_var_is_applied() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::set_var("AGENT_DEVICE_IOS_BOOT_TIMEOUT_MS", "60000");
        let config = Config::load(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.ios_boot_timeout_ms, 60_000);
        std::env::remove_var("AGENT_DEVICE_IOS_BOOT_TIMEOUT_MS");
    }
}
