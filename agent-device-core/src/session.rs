use std::collections::HashMap;
use std::path::PathBuf;

use agent_device_adapters::DeviceKind;
use agent_device_snapshot::{Platform, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::DaemonError;

/// Which device a session is bound to. `udid`/`serial`/`device` are
/// alternative selectors for the same underlying device. `kind` is captured
/// at bind time so later dispatch (e.g. `record stop`, `close`) can tell a
/// simulator from a physical device without re-probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub device_id: String,
    pub platform: Platform,
    pub kind: DeviceKind,
    pub device_name: Option<String>,
    pub udid: Option<String>,
    pub serial: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceInfo {
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub remote_path: Option<String>,
    pub local_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// One recorded action in a session's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub ts: DateTime<Utc>,
    pub command: String,
    pub positionals: Vec<String>,
    pub flags: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Flag keys retained on a recorded action, per spec §4.D — everything
/// else is transient request shape and must not leak into `.ad` scripts.
const RECORDED_FLAG_ALLOWLIST: &[&str] = &[
    "platform",
    "device",
    "udid",
    "serial",
    "out",
    "verbose",
    "relaunch",
    "saveScript",
    "noRecord",
    "snapshotInteractiveOnly",
    "snapshotCompact",
    "snapshotDepth",
    "snapshotScope",
    "snapshotRaw",
    "snapshotBackend",
    "count",
    "intervalMs",
    "holdMs",
    "jitterPx",
    "doubleTap",
    "pauseMs",
    "pattern",
];

fn allowlisted_flags(flags: &Value) -> Value {
    match flags.as_object() {
        Some(map) => {
            let mut out = serde_json::Map::new();
            for key in RECORDED_FLAG_ALLOWLIST {
                if let Some(value) = map.get(*key) {
                    out.insert((*key).to_string(), value.clone());
                }
            }
            Value::Object(out)
        }
        None => Value::Object(serde_json::Map::new()),
    }
}

fn flags_request_no_record(flags: &Value) -> bool {
    flags
        .get("noRecord")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub device: DeviceBinding,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording: Option<RecordingInfo>,
    pub actions: Vec<Action>,
    pub record_session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_script_path: Option<PathBuf>,
}

impl Session {
    pub fn new(name: String, device: DeviceBinding) -> Self {
        Session {
            name,
            device,
            created_at: Utc::now(),
            app_bundle_id: None,
            app_name: None,
            snapshot: None,
            trace: None,
            recording: None,
            actions: Vec::new(),
            record_session: false,
            save_script_path: None,
        }
    }

    /// Replaces the session's baseline snapshot wholesale. Refs from the
    /// prior snapshot become invalid for subsequent requests the instant
    /// this is called.
    pub fn replace_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Appends `action` unless it requests `noRecord`, after stripping its
    /// flags down to the recorded allow-list.
    pub fn record_action(&mut self, command: &str, positionals: Vec<String>, flags: Value, result: Option<Value>) {
        if flags_request_no_record(&flags) {
            return;
        }
        self.actions.push(Action {
            ts: Utc::now(),
            command: command.to_string(),
            positionals,
            flags: allowlisted_flags(&flags),
            result,
        });
    }
}

/// Commands exempt from the session/device cross-check in §4.F.
pub const SELECTOR_EXEMPT_COMMANDS: &[&str] = &["session_list", "devices"];

/// Daemon-global map from session name to `Session`, owned exclusively by
/// the dispatcher. Handlers receive a session by name, never the store.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore::default()
    }

    pub async fn create(&self, session: Session) -> Result<(), DaemonError> {
        let mut guard = self.sessions.lock().await;
        if let Some(existing_owner) = Self::owner_of_locked(&guard, &session.device.device_id) {
            return Err(DaemonError::device_in_use(&session.device.device_id, &existing_owner));
        }
        guard.insert(session.name.clone(), session);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Session> {
        self.sessions.lock().await.get(name).cloned()
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.sessions.lock().await.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Applies `mutator` to the named session while holding the store lock,
    /// so the read-then-write is not interleaved with another request's
    /// mutation of the same session.
    pub async fn mutate<R>(
        &self,
        name: &str,
        mutator: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, DaemonError> {
        let mut guard = self.sessions.lock().await;
        match guard.get_mut(name) {
            Some(session) => Ok(mutator(session)),
            None => Err(DaemonError::session_not_found(name)),
        }
    }

    pub async fn remove(&self, name: &str) -> Option<Session> {
        self.sessions.lock().await.remove(name)
    }

    /// The device binding the owning session already rejects a concurrent
    /// bind of. Returns the *other* session's name, if any.
    pub async fn owner_of(&self, device_id: &str) -> Option<String> {
        let guard = self.sessions.lock().await;
        Self::owner_of_locked(&guard, device_id)
    }

    fn owner_of_locked(sessions: &HashMap<String, Session>, device_id: &str) -> Option<String> {
        sessions
            .values()
            .find(|s| s.device.device_id == device_id)
            .map(|s| s.name.clone())
    }

    /// Implements §4.F's default-session routing: if the caller used the
    /// default name, didn't set `session` explicitly in flags, and exactly
    /// one session is active, route to that session instead.
    pub async fn resolve_target_name(
        &self,
        requested_name: &str,
        default_name: &str,
        session_flag_was_explicit: bool,
    ) -> String {
        if requested_name == default_name && !session_flag_was_explicit {
            let guard = self.sessions.lock().await;
            if guard.len() == 1 {
                if let Some(only) = guard.keys().next() {
                    return only.clone();
                }
            }
        }
        requested_name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(device_id: &str) -> DeviceBinding {
        DeviceBinding {
            device_id: device_id.to_string(),
            platform: Platform::Ios,
            kind: DeviceKind::Simulator,
            device_name: Some("iPhone 15".to_string()),
            udid: None,
            serial: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_concurrent_binding_of_same_device() {
        let store = SessionStore::new();
        store
            .create(Session::new("main".to_string(), binding("udid-1")))
            .await
            .unwrap();

        let err = store
            .create(Session::new("second".to_string(), binding("udid-1")))
            .await
            .unwrap_err();

        assert_eq!(err.code, crate::error::ErrorCode::DeviceInUse);
    }

    #[tokio::test]
    async fn record_action_drops_no_record_entries() {
        let store = SessionStore::new();
        store
            .create(Session::new("main".to_string(), binding("udid-1")))
            .await
            .unwrap();

        store
            .mutate("main", |session| {
                session.record_action(
                    "click",
                    vec!["@e1".to_string()],
                    serde_json::json!({ "noRecord": true }),
                    None,
                );
            })
            .await
            .unwrap();

        let session = store.get("main").await.unwrap();
        assert!(session.actions.is_empty());
    }

    #[tokio::test]
    async fn record_action_strips_flags_to_allowlist() {
        let store = SessionStore::new();
        store
            .create(Session::new("main".to_string(), binding("udid-1")))
            .await
            .unwrap();

        store
            .mutate("main", |session| {
                session.record_action(
                    "click",
                    vec!["@e1".to_string()],
                    serde_json::json!({ "platform": "ios", "requestId": "abc-123" }),
                    None,
                );
            })
            .await
            .unwrap();

        let session = store.get("main").await.unwrap();
        let flags = &session.actions[0].flags;
        assert_eq!(flags["platform"], serde_json::json!("ios"));
        assert!(flags.get("requestId").is_none());
    }

    #[tokio::test]
    async fn record_action_keeps_gesture_series_flags() {
        let store = SessionStore::new();
        store
            .create(Session::new("main".to_string(), binding("udid-1")))
            .await
            .unwrap();

        store
            .mutate("main", |session| {
                session.record_action(
                    "press",
                    vec!["@e1".to_string()],
                    serde_json::json!({ "count": 3, "intervalMs": 50, "doubleTap": true, "requestId": "abc" }),
                    None,
                );
            })
            .await
            .unwrap();

        let session = store.get("main").await.unwrap();
        let flags = &session.actions[0].flags;
        assert_eq!(flags["count"], serde_json::json!(3));
        assert_eq!(flags["intervalMs"], serde_json::json!(50));
        assert_eq!(flags["doubleTap"], serde_json::json!(true));
        assert!(flags.get("requestId").is_none());
    }

    #[tokio::test]
    async fn resolve_target_name_routes_to_sole_active_session() {
        let store = SessionStore::new();
        store
            .create(Session::new("alpha".to_string(), binding("udid-1")))
            .await
            .unwrap();

        let resolved = store.resolve_target_name("default", "default", false).await;
        assert_eq!(resolved, "alpha");
    }

    #[tokio::test]
    async fn resolve_target_name_keeps_explicit_request() {
        let store = SessionStore::new();
        store
            .create(Session::new("alpha".to_string(), binding("udid-1")))
            .await
            .unwrap();

        let resolved = store.resolve_target_name("default", "default", true).await;
        assert_eq!(resolved, "default");
    }

    #[tokio::test]
    async fn mutate_on_missing_session_returns_session_not_found() {
        let store = SessionStore::new();
        let err = store.mutate("ghost", |_| ()).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::SessionNotFound);
    }
}
