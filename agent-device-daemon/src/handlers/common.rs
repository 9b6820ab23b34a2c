use agent_device_adapters::Device;
use agent_device_core::{DaemonError, DeviceBinding, Session};
use agent_device_selector::{parse_chain, split_selector_from_args, Resolution, ResolveOptions};
use agent_device_snapshot::{attach_refs, prune_group_nodes, Backend, Node, Platform, RawNode, Snapshot};

use crate::context::DispatchContext;
use crate::wire::Request;

/// Reconstructs the `Device` a session is bound to, for dispatch into
/// `crate::platform`. Sessions only persist the lightweight `DeviceBinding`;
/// `booted` is always `true` here since a session never binds to a device
/// that failed its readiness probe.
pub fn device_from_binding(binding: &DeviceBinding) -> Device {
    Device {
        platform: binding.platform,
        id: binding.device_id.clone(),
        name: binding.device_name.clone().unwrap_or_default(),
        kind: binding.kind,
        booted: true,
    }
}

pub fn backend_for(platform: Platform) -> Backend {
    match platform {
        Platform::Android => Backend::Android,
        Platform::Ios => Backend::Xctest,
    }
}

/// Normalizes a freshly captured raw node list into a `Snapshot`, per
/// §4.G: `attachRefs(pruneGroupNodes(raw))` unless `--raw`, in which case
/// pruning is skipped but refs are still attached (refs are how every other
/// command addresses the snapshot's nodes; "raw" only waives the group-node
/// cleanup, not addressability).
pub fn normalize_snapshot(raw: Vec<RawNode>, backend: Backend, raw_flag: bool) -> Snapshot {
    let nodes: Vec<Node> = if raw_flag {
        attach_refs(&raw)
    } else {
        attach_refs(&prune_group_nodes(&raw))
    };
    Snapshot {
        nodes,
        truncated: false,
        created_at: chrono::Utc::now(),
        backend,
    }
}

pub async fn capture_snapshot(
    ctx: &DispatchContext,
    device: &Device,
    raw_flag: bool,
) -> Result<Snapshot, DaemonError> {
    let raw = crate::platform::capture_snapshot(ctx, device).await?;
    Ok(normalize_snapshot(raw, backend_for(device.platform), raw_flag))
}

/// Fetches the target session by the request's (already-routed) name.
pub async fn load_session(ctx: &DispatchContext, name: &str) -> Result<Session, DaemonError> {
    ctx.sessions
        .get(name)
        .await
        .ok_or_else(|| DaemonError::session_not_found(name))
}

/// Joins positionals back into the one string most handlers need (e.g. a
/// selector expression, a fill value, or free text for `find`/`wait`).
pub fn join_positionals(positionals: &[String]) -> String {
    positionals.join(" ")
}

pub fn is_bare_ref(token: &str) -> bool {
    agent_device_core::tokenize_line(token).is_ok() && token.starts_with('@')
}

pub fn is_numeric(token: &str) -> bool {
    token.parse::<f64>().is_ok()
}

/// Resolves a selector chain (already parsed) against `snapshot.nodes`,
/// requiring a rectangle and unique match, with disambiguation enabled —
/// the options §4.G prescribes for click/fill/press-via-selector.
pub fn resolve_unique<'a>(
    snapshot: &'a Snapshot,
    chain_expr: &str,
    platform: Platform,
) -> Result<Resolution<'a>, DaemonError> {
    let chain = parse_chain(chain_expr)?;
    let opts = ResolveOptions {
        require_rect: true,
        require_unique: true,
        disambiguate_ambiguous: true,
    };
    Ok(agent_device_selector::resolve_selector_chain(&snapshot.nodes, &chain, platform, opts))
}

/// Splits a command's positionals into a leading selector expression (if
/// the first tokens look like selector syntax) and the remaining value
/// tokens, per §4.B. `prefer_trailing_value` keeps a sole selector-looking
/// token as a value when nothing else would remain (e.g. `fill Name`).
pub fn split_selector(positionals: &[String], prefer_trailing_value: bool) -> (Option<String>, Vec<String>) {
    let (selector_tokens, rest) = split_selector_from_args(positionals, prefer_trailing_value);
    if selector_tokens.is_empty() {
        (None, rest)
    } else {
        (Some(selector_tokens.join(" ")), rest)
    }
}

pub fn ambiguous_or_not_found(expr: &str, resolution: &Resolution) -> DaemonError {
    let details = serde_json::json!({ "selector": expr, "diagnostics": resolution.diagnostics });
    if resolution.diagnostics.iter().any(|d| d.matches > 1) {
        DaemonError::new(agent_device_core::ErrorCode::AmbiguousMatch, "selector matched more than one element")
            .with_details(details)
    } else {
        DaemonError::invalid_args(format!("no element matched selector '{expr}'")).with_details(details)
    }
}

pub fn request_flags_as_value(req: &Request) -> serde_json::Value {
    serde_json::Value::Object(req.flags.clone().into_iter().collect())
}
