use agent_device_snapshot::Platform;
use serde::{Deserialize, Serialize};

/// What kind of target a device id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Simulator,
    Device,
    Emulator,
    Unknown,
}

/// `{platform, id, name, kind, booted}` per the data model's Device entity.
/// Identity is `(platform, id)`; immutable once a session binds to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub platform: Platform,
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub booted: bool,
}

/// Outcome of a readiness probe (§4.E). `ready=false` always carries a hint
/// when one is derivable; `inconclusive` marks a probe that could not tell.
#[derive(Debug, Clone, PartialEq)]
pub struct Readiness {
    pub ready: bool,
    pub inconclusive: bool,
    pub hint: Option<String>,
}

impl Readiness {
    pub fn ready() -> Self {
        Readiness {
            ready: true,
            inconclusive: false,
            hint: None,
        }
    }

    pub fn not_ready(hint: impl Into<String>) -> Self {
        Readiness {
            ready: false,
            inconclusive: false,
            hint: Some(hint.into()),
        }
    }

    pub fn inconclusive() -> Self {
        Readiness {
            ready: false,
            inconclusive: true,
            hint: None,
        }
    }
}
