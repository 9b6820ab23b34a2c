use serde::{Deserialize, Serialize};

/// Typed reasons an external command can fail, surfaced in a
/// `COMMAND_FAILED` response's `details.reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterFailureReason {
    BinaryNotFound,
    Timeout,
    DeviceNotFound,
    PermissionDenied,
    TunnelConnecting,
    RunnerDesync,
    EmptySnapshot,
    UnparseableOutput,
    NonZeroExit,
}

/// Error surfaced by a platform adapter, before it is folded into a
/// `DaemonError` at the handler boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason:?}: {message}")]
pub struct AdapterError {
    pub reason: AdapterFailureReason,
    pub message: String,
    pub transient: bool,
    pub hint: Option<String>,
}

impl AdapterError {
    pub fn new(reason: AdapterFailureReason, message: impl Into<String>, transient: bool) -> Self {
        AdapterError {
            reason,
            message: message.into(),
            transient,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AdapterFailureReason::Timeout, message, true)
    }

    pub fn binary_not_found(binary: &str) -> Self {
        Self::new(
            AdapterFailureReason::BinaryNotFound,
            format!("could not find '{binary}' on PATH"),
            false,
        )
    }

    pub fn non_zero_exit(cmd: &str, code: Option<i32>, stderr: &str) -> Self {
        Self::new(
            AdapterFailureReason::NonZeroExit,
            format!("'{cmd}' exited with {code:?}: {stderr}"),
            false,
        )
    }
}
