use std::time::Duration;

use agent_device_core::{DaemonError, Deadline};
use agent_device_snapshot::{Node, Snapshot};
use serde_json::{json, Value};

use crate::context::DispatchContext;
use crate::wire::Request;

use super::common::{capture_snapshot, device_from_binding, load_session};

const POLL_INTERVAL: Duration = Duration::from_millis(300);
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Scores a node against a free-text query by reusing the selector engine's
/// notion of a node's matchable text fields, ranked by specificity: an
/// exact identifier match beats an exact label match, which beats a
/// substring hit anywhere. Ties are broken by the selector chain's own
/// smallest-rectangle rule (applied by the caller).
fn score(node: &Node, query: &str) -> Option<i32> {
    let query_lower = query.to_lowercase();
    let fields = [
        (node.identifier.as_deref(), 100),
        (node.label.as_deref(), 80),
        (node.value.as_deref(), 60),
    ];

    let mut best: Option<i32> = None;
    for (field, base) in fields {
        let Some(field) = field else { continue };
        let field_lower = field.to_lowercase();
        let points = if field_lower == query_lower {
            base + 20
        } else if field_lower.contains(&query_lower) {
            base
        } else {
            continue;
        };
        best = Some(best.map_or(points, |b| b.max(points)));
    }
    best
}

fn best_match<'a>(nodes: &'a [Node], query: &str) -> Option<&'a Node> {
    nodes
        .iter()
        .filter_map(|n| score(n, query).map(|s| (s, n)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, n)| n)
}

fn center(node: &Node) -> Result<(f64, f64), DaemonError> {
    let rect = node
        .rect
        .ok_or_else(|| DaemonError::command_failed("matched element has no rectangle", false))?;
    Ok((rect.x + rect.width / 2.0, rect.y + rect.height / 2.0))
}

enum Action {
    Click,
    Fill(String),
    Type(String),
    Focus,
    GetText,
    GetAttrs,
    Wait(u64),
    Exists,
}

fn parse_action(rest: &[String]) -> Result<(String, Action), DaemonError> {
    // The query is everything up to the action keyword; since queries are
    // free text we require the action keyword to be the first token that
    // isn't part of the query and take everything after as its argument.
    let action_positions = ["click", "fill", "type", "focus", "get", "wait", "exists"];
    let split_at = rest
        .iter()
        .position(|tok| action_positions.contains(&tok.as_str()))
        .ok_or_else(|| DaemonError::invalid_args("find requires an action: click|fill|type|focus|get|wait|exists"))?;
    let query = rest[..split_at].join(" ");
    if query.trim().is_empty() {
        return Err(DaemonError::invalid_args("find requires a query before the action"));
    }
    let action_tokens = &rest[split_at..];
    let action = match action_tokens[0].as_str() {
        "click" => Action::Click,
        "focus" => Action::Focus,
        "exists" => Action::Exists,
        "fill" => {
            let value = action_tokens[1..].join(" ");
            if value.is_empty() {
                return Err(DaemonError::invalid_args("find ... fill requires a value"));
            }
            Action::Fill(value)
        }
        "type" => {
            let value = action_tokens[1..].join(" ");
            if value.is_empty() {
                return Err(DaemonError::invalid_args("find ... type requires a value"));
            }
            Action::Type(value)
        }
        "get" => match action_tokens.get(1).map(String::as_str) {
            Some("attrs") => Action::GetAttrs,
            _ => Action::GetText,
        },
        "wait" => {
            let timeout = action_tokens
                .get(1)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_TIMEOUT_MS);
            Action::Wait(timeout)
        }
        other => return Err(DaemonError::invalid_args(format!("unknown find action '{other}'"))),
    };
    Ok((query, action))
}

async fn snapshot_now(ctx: &DispatchContext, session_name: &str) -> Result<Snapshot, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let snapshot = capture_snapshot(ctx, &device, false).await?;
    ctx.sessions.mutate(session_name, |s| s.replace_snapshot(snapshot.clone())).await?;
    Ok(snapshot)
}

/// `find <query> <action> [value]`, per §4.G: reuses the selector engine's
/// ranked-match heuristics over free text instead of a structured selector.
pub async fn find(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let (query, action) = parse_action(&req.positionals)?;

    if let Action::Wait(timeout_ms) = action {
        let deadline = Deadline::after(Duration::from_millis(timeout_ms));
        loop {
            let snapshot = snapshot_now(ctx, session_name).await?;
            if best_match(&snapshot.nodes, &query).is_some() {
                let result = json!({ "query": query, "found": true });
                record(ctx, session_name, req, result.clone()).await;
                return Ok(result);
            }
            if deadline.is_expired() {
                let result = json!({ "query": query, "found": false });
                record(ctx, session_name, req, result.clone()).await;
                return Ok(result);
            }
            if ctx.cancellations.is_canceled(&request_id(req)) {
                return Err(DaemonError::canceled(&request_id(req)));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    if let Action::Exists = action {
        let snapshot = snapshot_now(ctx, session_name).await?;
        let found = best_match(&snapshot.nodes, &query).is_some();
        let result = json!({ "query": query, "result": found });
        record(ctx, session_name, req, result.clone()).await;
        return Ok(result);
    }

    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let snapshot = snapshot_now(ctx, session_name).await?;
    let node = best_match(&snapshot.nodes, &query)
        .ok_or_else(|| DaemonError::invalid_args(format!("no element matched find query '{query}'")))?;

    let result = match action {
        Action::Click => {
            let (x, y) = center(node)?;
            crate::platform::tap(ctx, &device, x, y).await?;
            json!({ "query": query, "x": x, "y": y })
        }
        Action::Focus => {
            let (x, y) = center(node)?;
            crate::platform::focus(ctx, &device, x, y).await?;
            json!({ "query": query, "x": x, "y": y })
        }
        Action::Fill(value) => {
            let (x, y) = center(node)?;
            crate::platform::focus(ctx, &device, x, y).await?;
            crate::platform::type_text(ctx, &device, &value).await?;
            json!({ "query": query, "x": x, "y": y, "value": value })
        }
        Action::Type(value) => {
            crate::platform::type_text(ctx, &device, &value).await?;
            json!({ "query": query, "value": value })
        }
        Action::GetText => json!({ "query": query, "text": agent_device_snapshot::extract_node_text(node) }),
        Action::GetAttrs => json!({
            "query": query,
            "type": node.node_type,
            "label": node.label,
            "value": node.value,
            "identifier": node.identifier,
            "rect": node.rect,
        }),
        Action::Wait(_) | Action::Exists => unreachable!(),
    };

    record(ctx, session_name, req, result.clone()).await;
    Ok(result)
}

fn request_id(req: &Request) -> String {
    req.meta
        .get("requestId")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

async fn record(ctx: &DispatchContext, session_name: &str, req: &Request, result: Value) {
    let _ = ctx
        .sessions
        .mutate(session_name, |s| {
            s.record_action("find", req.positionals.clone(), super::common::request_flags_as_value(req), Some(result));
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_device_snapshot::Rect;

    fn node(label: &str, rect: Rect) -> Node {
        Node {
            index: 0,
            parent_index: None,
            depth: 0,
            r#ref: "e1".to_string(),
            node_type: "button".to_string(),
            label: Some(label.to_string()),
            value: None,
            identifier: None,
            rect: Some(rect),
            enabled: Some(true),
            selected: Some(false),
            hittable: Some(true),
        }
    }

    #[test]
    fn exact_label_outranks_substring() {
        let rect = Rect { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
        let exact = node("Continue", rect);
        let substr = node("Continue to checkout", rect);
        assert!(score(&exact, "Continue").unwrap() > score(&substr, "Continue").unwrap());
    }

    #[test]
    fn parse_action_requires_known_verb() {
        let rest = vec!["Continue".to_string(), "press".to_string()];
        assert!(parse_action(&rest).is_err());
    }

    #[test]
    fn parse_action_splits_query_and_click() {
        let rest = vec!["Sign".to_string(), "in".to_string(), "click".to_string()];
        let (query, _action) = parse_action(&rest).unwrap();
        assert_eq!(query, "Sign in");
    }
}
