use serde::{Deserialize, Serialize};

/// The wire-level error code set from the spec's external interface. Every
/// failure that reaches a client carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    InvalidArgs,
    SessionNotFound,
    UnsupportedOperation,
    DeviceInUse,
    AmbiguousMatch,
    CommandFailed,
    Canceled,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidArgs => "INVALID_ARGS",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            ErrorCode::DeviceInUse => "DEVICE_IN_USE",
            ErrorCode::AmbiguousMatch => "AMBIGUOUS_MATCH",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::Canceled => "CANCELED",
        }
    }
}

/// Error surface returned to clients. Mirrors the spec's `{code, message,
/// details?, hint?, diagnosticId?, logPath?}` response shape exactly so it
/// can be serialized straight into a response envelope.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct DaemonError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    /// Not serialized: whether a `COMMAND_FAILED` is worth retrying locally.
    /// Deterministic failures (bad binary path, permission denied) are not.
    #[serde(skip)]
    pub transient: bool,
}

impl DaemonError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        DaemonError {
            code,
            message: message.into(),
            details: None,
            hint: None,
            diagnostic_id: None,
            log_path: None,
            transient: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgs, message)
    }

    pub fn session_not_found(name: &str) -> Self {
        Self::new(ErrorCode::SessionNotFound, format!("no session named '{name}'"))
    }

    pub fn device_in_use(device_id: &str, owner: &str) -> Self {
        Self::new(
            ErrorCode::DeviceInUse,
            format!("device '{device_id}' is already bound to session '{owner}'"),
        )
        .with_details(serde_json::json!({ "deviceId": device_id, "owner": owner }))
    }

    pub fn command_failed(message: impl Into<String>, transient: bool) -> Self {
        let mut err = Self::new(ErrorCode::CommandFailed, message);
        err.transient = transient;
        err
    }

    pub fn canceled(request_id: &str) -> Self {
        Self::new(ErrorCode::Canceled, format!("request {request_id} was canceled"))
    }

    /// Wraps this error as the inner failure of a `batch` step, per spec
    /// §7's `{step, command, executed, total, partialResults[]}` shape.
    pub fn into_batch_failure(
        mut self,
        step: usize,
        command: &str,
        executed: usize,
        total: usize,
        partial_results: Vec<serde_json::Value>,
    ) -> Self {
        self.details = Some(serde_json::json!({
            "step": step,
            "command": command,
            "executed": executed,
            "total": total,
            "partialResults": partial_results,
        }));
        self
    }

    /// Wraps this error as a replay failure, per spec §7's
    /// `{replayPath, step, action, positionals}` shape.
    pub fn into_replay_failure(
        mut self,
        replay_path: &str,
        step: usize,
        action: &str,
        positionals: &[String],
    ) -> Self {
        self.details = Some(serde_json::json!({
            "replayPath": replay_path,
            "step": step,
            "action": action,
            "positionals": positionals,
        }));
        self
    }
}

impl From<agent_device_selector::SelectorError> for DaemonError {
    fn from(err: agent_device_selector::SelectorError) -> Self {
        DaemonError::invalid_args(err.to_string())
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_without_optional_fields() {
        let err = DaemonError::invalid_args("bad selector");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], serde_json::json!("InvalidArgs"));
        assert_eq!(json["message"], serde_json::json!("bad selector"));
        assert!(json.get("hint").is_none());
        assert!(json.get("details").is_none());
    }

    #[test]
    fn device_in_use_carries_structured_details() {
        let err = DaemonError::device_in_use("udid-123", "main");
        assert_eq!(err.code, ErrorCode::DeviceInUse);
        assert_eq!(err.details.unwrap()["owner"], serde_json::json!("main"));
    }
}
