use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the newline-delimited JSON wire protocol, per §4.F/§6.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub token: String,
    #[serde(default = "default_session")]
    pub session: String,
    pub command: String,
    #[serde(default)]
    pub positionals: Vec<String>,
    #[serde(default)]
    pub flags: HashMap<String, Value>,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

fn default_session() -> String {
    "default".to_string()
}

impl Request {
    /// True when the request did not explicitly name a session (used by
    /// default-session routing, §4.F).
    pub fn used_default_session(&self) -> bool {
        self.session == "default" && !self.flags.contains_key("session")
    }

    pub fn flag_str(&self, key: &str) -> Option<String> {
        self.flags.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn flag_bool(&self, key: &str) -> bool {
        match self.flags.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true" || s == "1",
            Some(_) => true,
            None => false,
        }
    }

    pub fn flag_u64(&self, key: &str) -> Option<u64> {
        self.flags.get(key).and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Err {
        ok: bool,
        error: ResponseError,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "diagnosticId")]
    pub diagnostic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "logPath")]
    pub log_path: Option<String>,
}

impl Response {
    pub fn ok(data: Option<Value>) -> Self {
        Response::Ok { ok: true, data }
    }

    pub fn from_daemon_error(err: &agent_device_core::DaemonError) -> Self {
        Response::Err {
            ok: false,
            error: ResponseError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hint: err.hint.clone(),
                diagnostic_id: err.diagnostic_id.clone(),
                log_path: err.log_path.clone(),
            },
        }
    }
}

/// Commands exempt from the session-selector cross-check (§4.F).
pub const WIRE_SELECTOR_EXEMPT: &[&str] = &["session_list", "devices"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_session_to_default() {
        let req: Request = serde_json::from_str(
            r#"{"token":"t","command":"devices","positionals":[]}"#,
        )
        .unwrap();
        assert_eq!(req.session, "default");
        assert!(req.used_default_session());
    }

    #[test]
    fn explicit_session_flag_disables_default_routing() {
        let req: Request = serde_json::from_str(
            r#"{"token":"t","session":"default","command":"click","positionals":[],"flags":{"session":"default"}}"#,
        )
        .unwrap();
        assert!(!req.used_default_session());
    }
}
