use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use agent_device_adapters::{ProcessRunner, SystemProcessRunner};
use agent_device_core::{CancellationRegistry, Config, KeyedLock, SessionStore};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Everything a handler needs, threaded explicitly through every call
/// instead of living behind a process-global (spec §9's "replace the global
/// async-local diagnostics scope with explicit context propagation", applied
/// to the whole dispatch context, not just diagnostics).
pub struct DispatchContext {
    pub home: PathBuf,
    pub token: String,
    pub config: Config,
    pub sessions: SessionStore,
    pub device_lock: KeyedLock,
    /// Process-wide cancellation flags only; NDJSON diagnostics are scoped
    /// per request (a fresh `DiagnosticSink` is created per dispatch, since
    /// each request flushes to its own log file — see `dispatcher::dispatch`).
    pub cancellations: CancellationRegistry,
    pub runner: Arc<dyn ProcessRunner>,
    /// Background recording tasks (Android `screenrecord`, iOS simulator
    /// `simctl io recordVideo`), keyed by session name. `record stop` aborts
    /// the handle before running the platform-specific drain/pull sequence.
    pub recordings: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl DispatchContext {
    pub fn new(home: PathBuf, token: String, config: Config) -> Self {
        DispatchContext {
            home,
            token,
            config,
            sessions: SessionStore::new(),
            device_lock: KeyedLock::new(),
            cancellations: CancellationRegistry::new(),
            runner: Arc::new(SystemProcessRunner::new()),
            recordings: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }
}
