use agent_device_core::DaemonError;
use agent_device_selector::{find_selector_chain_match, parse_chain};
use agent_device_snapshot::{diff_snapshots, resolve_ref_label, Node, Snapshot};
use serde_json::{json, Value};

use crate::context::DispatchContext;
use crate::wire::Request;

use super::common::{backend_for, device_from_binding, load_session, normalize_snapshot};

fn node_json(node: &Node) -> Value {
    json!({
        "ref": node.r#ref,
        "index": node.index,
        "parentIndex": node.parent_index,
        "depth": node.depth,
        "type": node.node_type,
        "label": node.label,
        "value": node.value,
        "identifier": node.identifier,
        "rect": node.rect,
        "enabled": node.enabled,
        "selected": node.selected,
        "hittable": node.hittable,
    })
}

fn is_descendant_of(nodes: &[Node], candidate: &Node, ancestor_index: usize) -> bool {
    let mut cursor = candidate.parent_index;
    let mut guard = 0;
    while let Some(idx) = cursor {
        if idx == ancestor_index {
            return true;
        }
        guard += 1;
        if guard > nodes.len() {
            return false;
        }
        cursor = nodes.get(idx).and_then(|n| n.parent_index);
    }
    false
}

/// Restricts `nodes` to a matched node and its descendants, per `-s`
/// scoping. The match is found by selector syntax when the scope parses as
/// one, otherwise by exact `text` equality.
fn apply_scope<'a>(nodes: &'a [Node], scope: &str, platform: agent_device_snapshot::Platform) -> Vec<&'a Node> {
    let target = if let Ok(chain) = parse_chain(scope) {
        find_selector_chain_match(nodes, &chain, platform, false)
    } else {
        None
    };
    let target = target.or_else(|| {
        nodes
            .iter()
            .find(|n| agent_device_snapshot::extract_node_text(n) == Some(scope))
    });

    match target {
        Some(root) => nodes
            .iter()
            .filter(|n| n.r#ref == root.r#ref || is_descendant_of(nodes, n, root.index))
            .collect(),
        None => Vec::new(),
    }
}

/// Resolves a `-s @eN` scope (a ref minted by the *previous* snapshot) to
/// the text query that re-establishes scope against a freshly captured one,
/// since refs are snapshot-local (§3).
fn resolve_ref_scope(prior: Option<&Snapshot>, scope: &str) -> Option<String> {
    let r#ref = scope.strip_prefix('@')?;
    let prior = prior?;
    let node = prior.nodes.iter().find(|n| n.r#ref == r#ref)?;
    resolve_ref_label(node, &prior.nodes)
}

/// `snapshot`: capture, normalize, and shape per §4.G/§10.5's snapshot
/// flags.
pub async fn snapshot(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let raw_flag = req.flag_bool("snapshotRaw");

    let captured = super::common::capture_snapshot(ctx, &device, raw_flag).await?;

    let mut view: Vec<&Node> = captured.nodes.iter().collect();
    let mut truncated = false;

    if let Some(depth) = req.flag_u64("snapshotDepth") {
        view.retain(|n| (n.depth as u64) <= depth);
        truncated = truncated || view.len() < captured.nodes.len();
    }

    if req.flag_bool("snapshotInteractiveOnly") {
        view.retain(|n| n.is_visible());
    }

    if let Some(raw_scope) = req.flag_str("snapshotScope") {
        let scope = resolve_ref_scope(session.snapshot.as_ref(), &raw_scope).unwrap_or(raw_scope);
        let scoped = apply_scope(&captured.nodes, &scope, device.platform);
        let scoped_refs: std::collections::HashSet<&str> = scoped.iter().map(|n| n.r#ref.as_str()).collect();
        view.retain(|n| scoped_refs.contains(n.r#ref.as_str()));
    }

    let nodes_json: Vec<Value> = view.iter().map(|n| node_json(n)).collect();
    let compact = req.flag_bool("snapshotCompact");

    ctx.sessions
        .mutate(session_name, |s| s.replace_snapshot(captured.clone()))
        .await?;

    let result = json!({
        "nodes": nodes_json,
        "truncated": truncated || captured.truncated,
        "createdAt": captured.created_at,
        "backend": captured.backend,
        "compact": compact,
    });

    ctx.sessions
        .mutate(session_name, |s| {
            s.record_action("snapshot", req.positionals.clone(), super::common::request_flags_as_value(req), Some(result.clone()));
        })
        .await?;

    Ok(result)
}

/// `diff snapshot`: captures a fresh snapshot, diffs it against the
/// session's prior baseline, and replaces the baseline.
pub async fn diff(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    if req.positionals.first().map(String::as_str) != Some("snapshot") {
        return Err(DaemonError::invalid_args("diff currently only supports 'diff snapshot'"));
    }

    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let raw = crate::platform::capture_snapshot(ctx, &device).await?;
    let current = normalize_snapshot(raw, backend_for(device.platform), false);

    let previous = session.snapshot.clone();
    let diff = diff_snapshots(previous.as_ref(), &current);
    let baseline_initialized = previous.is_none();

    ctx.sessions
        .mutate(session_name, |s| s.replace_snapshot(current))
        .await?;

    let result = json!({
        "baselineInitialized": baseline_initialized,
        "lines": diff.lines,
        "summary": diff.summary,
    });

    ctx.sessions
        .mutate(session_name, |s| {
            s.record_action("diff", req.positionals.clone(), super::common::request_flags_as_value(req), Some(result.clone()));
        })
        .await?;

    Ok(result)
}
