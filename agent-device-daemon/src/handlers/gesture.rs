use std::time::Duration;

use agent_device_core::{DaemonError, Deadline};
use agent_device_selector::{find_selector_chain_match, parse_chain};
use agent_device_snapshot::{extract_node_text, Node, Rect};
use serde_json::{json, Value};

use crate::context::DispatchContext;
use crate::wire::Request;

use super::common::{capture_snapshot, device_from_binding, join_positionals, is_bare_ref, load_session, request_flags_as_value};

const POLL_INTERVAL: Duration = Duration::from_millis(300);
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

async fn record(ctx: &DispatchContext, session_name: &str, command: &str, req: &Request, result: Value) {
    let _ = ctx
        .sessions
        .mutate(session_name, |s| {
            s.record_action(command, req.positionals.clone(), request_flags_as_value(req), Some(result));
        })
        .await;
}

fn center(node: &Node) -> Result<(f64, f64), DaemonError> {
    let rect = node
        .rect
        .ok_or_else(|| DaemonError::command_failed("matched element has no rectangle", false))?;
    Ok((rect.x + rect.width / 2.0, rect.y + rect.height / 2.0))
}

/// A fixed fraction of a rectangle's extent, used as a direction-agnostic
/// swipe distance when no explicit scroll container rectangle is known
/// (full-screen scroll uses a nominal phone-sized viewport).
fn default_viewport() -> Rect {
    Rect { x: 0.0, y: 0.0, width: 390.0, height: 844.0 }
}

fn swipe_for_direction(direction: &str, viewport: Rect) -> Option<(f64, f64, f64, f64)> {
    let cx = viewport.x + viewport.width / 2.0;
    let cy = viewport.y + viewport.height / 2.0;
    let margin_y = viewport.height * 0.2;
    let margin_x = viewport.width * 0.2;
    match direction {
        // Scrolling "down" reveals content below, i.e. the finger drags
        // from the bottom of the viewport toward the top.
        "down" => Some((cx, viewport.y + viewport.height - margin_y, cx, viewport.y + margin_y)),
        "up" => Some((cx, viewport.y + margin_y, cx, viewport.y + viewport.height - margin_y)),
        "left" => Some((viewport.x + viewport.width - margin_x, cy, viewport.x + margin_x, cy)),
        "right" => Some((viewport.x + margin_x, cy, viewport.x + viewport.width - margin_x, cy)),
        _ => None,
    }
}

/// `scroll <up|down|left|right> [count]`: a fixed-distance swipe repeated
/// `count` times (default 1), against the whole viewport.
pub async fn scroll(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let direction = req
        .positionals
        .first()
        .ok_or_else(|| DaemonError::invalid_args("scroll requires a direction: up|down|left|right"))?;
    let (x1, y1, x2, y2) = swipe_for_direction(direction, default_viewport())
        .ok_or_else(|| DaemonError::invalid_args(format!("unknown scroll direction '{direction}'")))?;
    let count = req
        .positionals
        .get(1)
        .and_then(|s| s.parse::<u32>().ok())
        .or_else(|| req.flag_u64("count").map(|c| c as u32))
        .unwrap_or(1)
        .max(1);

    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    for _ in 0..count {
        crate::platform::swipe(ctx, &device, x1, y1, x2, y2, 300).await?;
    }

    let result = json!({ "direction": direction, "count": count });
    record(ctx, session_name, "scroll", req, result.clone()).await;
    Ok(result)
}

/// `scrollintoview <selector>`: scrolls down up to a bounded number of times,
/// re-snapshotting between each attempt, until the selector resolves.
pub async fn scroll_into_view(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    const MAX_ATTEMPTS: u32 = 8;
    let expr = join_positionals(&req.positionals);
    if expr.trim().is_empty() {
        return Err(DaemonError::invalid_args("scrollintoview requires a selector"));
    }
    let chain = parse_chain(&expr)?;

    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);

    for attempt in 0..MAX_ATTEMPTS {
        let snapshot = capture_snapshot(ctx, &device, false).await?;
        ctx.sessions.mutate(session_name, |s| s.replace_snapshot(snapshot.clone())).await?;
        if let Some(node) = find_selector_chain_match(&snapshot.nodes, &chain, device.platform, true) {
            let (x, y) = center(node)?;
            let result = json!({ "found": true, "attempts": attempt, "x": x, "y": y });
            record(ctx, session_name, "scrollintoview", req, result.clone()).await;
            return Ok(result);
        }
        let (x1, y1, x2, y2) = swipe_for_direction("down", default_viewport()).expect("direction is valid");
        crate::platform::swipe(ctx, &device, x1, y1, x2, y2, 300).await?;
    }

    let result = json!({ "found": false, "attempts": MAX_ATTEMPTS });
    record(ctx, session_name, "scrollintoview", req, result.clone()).await;
    Err(DaemonError::invalid_args(format!("selector '{expr}' did not come into view")).with_details(result))
}

const ACCEPT_KEYWORDS: &[&str] = &["ok", "allow", "accept", "continue", "yes"];
const DISMISS_KEYWORDS: &[&str] = &["cancel", "don't allow", "dismiss", "no", "not now"];

fn matches_keyword(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower == *k)
}

/// `alert accept|dismiss [buttonText]`: taps the first button whose text
/// matches either the explicit `buttonText` or one of the standard
/// accept/dismiss keyword sets.
pub async fn alert(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let mode = req
        .positionals
        .first()
        .ok_or_else(|| DaemonError::invalid_args("alert requires accept|dismiss"))?
        .clone();
    let explicit_text = req.positionals.get(1).cloned();

    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let snapshot = capture_snapshot(ctx, &device, false).await?;
    ctx.sessions.mutate(session_name, |s| s.replace_snapshot(snapshot.clone())).await?;

    let keywords: &[&str] = match mode.as_str() {
        "accept" => ACCEPT_KEYWORDS,
        "dismiss" => DISMISS_KEYWORDS,
        other => return Err(DaemonError::invalid_args(format!("unknown alert mode '{other}'"))),
    };

    let node = snapshot
        .nodes
        .iter()
        .find(|n| {
            let text = extract_node_text(n);
            match (&explicit_text, text) {
                (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
                (None, Some(actual)) => matches_keyword(actual, keywords),
                _ => false,
            }
        })
        .ok_or_else(|| DaemonError::invalid_args(format!("no alert button matched '{mode}'")))?;

    let (x, y) = center(node)?;
    crate::platform::tap(ctx, &device, x, y).await?;

    let result = json!({ "mode": mode, "x": x, "y": y });
    record(ctx, session_name, "alert", req, result.clone()).await;
    Ok(result)
}

enum WaitTarget {
    Duration(u64),
    Ref(String),
    Selector(String),
    Text(String),
}

fn classify_wait(positionals: &[String]) -> Result<WaitTarget, DaemonError> {
    if positionals.len() == 1 {
        if let Ok(ms) = positionals[0].parse::<u64>() {
            return Ok(WaitTarget::Duration(ms));
        }
        if is_bare_ref(&positionals[0]) {
            return Ok(WaitTarget::Ref(positionals[0].clone()));
        }
    }
    let joined = join_positionals(positionals);
    if joined.trim().is_empty() {
        return Err(DaemonError::invalid_args("wait requires a duration, selector, @ref, or free text"));
    }
    if parse_chain(&joined).is_ok() && joined.contains('=') {
        return Ok(WaitTarget::Selector(joined));
    }
    Ok(WaitTarget::Text(joined))
}

/// `wait <duration|selector|@ref|text>`, per §4.G: a pure duration sleeps; a
/// selector chain or `@ref` (resolved to its last-known label) or free text
/// polls snapshots every 300ms until the target text appears or the
/// deadline expires.
pub async fn wait(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let target = classify_wait(&req.positionals)?;
    let timeout_ms = req.flag_u64("timeoutMs").unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);

    if let WaitTarget::Duration(ms) = target {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        let result = json!({ "waited": ms });
        record(ctx, session_name, "wait", req, result.clone()).await;
        return Ok(result);
    }

    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);

    let query_text = match &target {
        WaitTarget::Ref(r#ref) => {
            let r#ref = r#ref.strip_prefix('@').unwrap_or(r#ref);
            let node = session
                .snapshot
                .as_ref()
                .and_then(|s| s.find_by_ref(r#ref))
                .ok_or_else(|| DaemonError::invalid_args(format!("unknown ref '@{ref}'")))?;
            agent_device_snapshot::resolve_ref_label(node, &session.snapshot.as_ref().unwrap().nodes)
                .ok_or_else(|| DaemonError::invalid_args("ref has no resolvable label to wait for"))?
        }
        WaitTarget::Text(text) => text.clone(),
        WaitTarget::Selector(_) | WaitTarget::Duration(_) => String::new(),

    };

    let chain = if let WaitTarget::Selector(expr) = &target {
        Some(parse_chain(expr)?)
    } else {
        None
    };

    let deadline = Deadline::after(Duration::from_millis(timeout_ms));
    loop {
        let snapshot = capture_snapshot(ctx, &device, false).await?;
        ctx.sessions.mutate(session_name, |s| s.replace_snapshot(snapshot.clone())).await?;

        let found = if let Some(chain) = &chain {
            find_selector_chain_match(&snapshot.nodes, chain, device.platform, false).is_some()
        } else {
            snapshot.nodes.iter().any(|n| extract_node_text(n) == Some(query_text.as_str()))
        };

        if found {
            let result = json!({ "found": true });
            record(ctx, session_name, "wait", req, result.clone()).await;
            return Ok(result);
        }
        if deadline.is_expired() {
            let result = json!({ "found": false });
            record(ctx, session_name, "wait", req, result.clone()).await;
            return Ok(result);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
