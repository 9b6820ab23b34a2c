use std::time::Duration;

use agent_device_core::DaemonError;
use agent_device_selector::{build_selector_chain_for_node, Resolution, SynthAction};
use agent_device_snapshot::{resolve_ref_label, Node, Platform, Rect};
use rand::Rng;
use serde_json::{json, Value};

use crate::context::DispatchContext;
use crate::wire::Request;

use super::common::{ambiguous_or_not_found, capture_snapshot, device_from_binding, is_bare_ref, is_numeric, join_positionals, load_session, resolve_unique};

fn center_of(rect: Rect) -> (f64, f64) {
    (rect.x + rect.width / 2.0, rect.y + rect.height / 2.0)
}

/// The three input shapes §4.G's interaction paragraph names: raw
/// coordinates, an `@ref` minted by the last snapshot, or a selector
/// expression.
enum Target {
    Coordinates(f64, f64),
    Ref(String),
    Selector(String),
}

fn classify(positionals: &[String], allow_coordinates: bool) -> Result<Target, DaemonError> {
    if allow_coordinates && positionals.len() == 2 && is_numeric(&positionals[0]) && is_numeric(&positionals[1]) {
        let x: f64 = positionals[0].parse().unwrap();
        let y: f64 = positionals[1].parse().unwrap();
        return Ok(Target::Coordinates(x, y));
    }
    let joined = join_positionals(positionals);
    if is_bare_ref(&joined) {
        return Ok(Target::Ref(joined));
    }
    if joined.trim().is_empty() {
        return Err(DaemonError::invalid_args("missing target: expected coordinates, @ref, or a selector"));
    }
    Ok(Target::Selector(joined))
}

struct Resolved {
    x: f64,
    y: f64,
    node: Option<Node>,
    selector_chain: Option<Vec<String>>,
    ref_label: Option<String>,
}

/// Resolves any of the three input shapes to a screen point, capturing a
/// fresh interactive+compact snapshot for the selector/ref paths, per
/// §4.G: "capture a fresh interactive+compact snapshot, resolve (with
/// rectangle + uniqueness, disambiguation enabled), compute center point".
fn snapshot_shape_flags_present(req: &Request) -> bool {
    req.flag_u64("snapshotDepth").is_some()
        || req.flag_str("snapshotScope").is_some()
        || req.flag_bool("snapshotRaw")
}

async fn resolve_target(
    ctx: &DispatchContext,
    req: &Request,
    session_name: &str,
    target: Target,
    platform: Platform,
    synth_action: SynthAction,
) -> Result<Resolved, DaemonError> {
    match target {
        Target::Coordinates(x, y) => {
            if snapshot_shape_flags_present(req) {
                return Err(DaemonError::invalid_args("--snapshotDepth/--snapshotScope/--snapshotRaw are not supported with coordinate targets"));
            }
            Ok(Resolved { x, y, node: None, selector_chain: None, ref_label: None })
        }
        Target::Ref(r#ref) => {
            if snapshot_shape_flags_present(req) {
                return Err(DaemonError::invalid_args("--snapshotDepth/--snapshotScope/--snapshotRaw are not supported with @ref targets"));
            }
            let session = load_session(ctx, session_name).await?;
            let snapshot = session
                .snapshot
                .as_ref()
                .ok_or_else(|| DaemonError::invalid_args("no snapshot to resolve @ref against; run snapshot first"))?;
            let node = snapshot
                .find_by_ref(&r#ref)
                .cloned()
                .ok_or_else(|| DaemonError::invalid_args(format!("unknown ref '{ref}'")))?;
            let rect = node
                .rect
                .ok_or_else(|| DaemonError::command_failed(format!("ref '{ref}' has no rectangle"), false))?;
            let (x, y) = center_of(rect);
            let ref_label = resolve_ref_label(&node, &snapshot.nodes);
            let selector_chain = Some(build_selector_chain_for_node(&node, platform, synth_action));
            Ok(Resolved { x, y, node: Some(node), selector_chain, ref_label })
        }
        Target::Selector(expr) => {
            let device = device_from_binding(&load_session(ctx, session_name).await?.device);
            let snapshot = capture_snapshot(ctx, &device, false).await?;
            let resolution: Resolution = resolve_unique(&snapshot, &expr, platform)?;
            let node = resolution.node.ok_or_else(|| ambiguous_or_not_found(&expr, &resolution))?;
            let rect = node
                .rect
                .ok_or_else(|| DaemonError::command_failed("matched element has no rectangle", false))?;
            let (x, y) = center_of(rect);
            let ref_label = resolve_ref_label(node, &snapshot.nodes);
            let selector_chain = Some(build_selector_chain_for_node(node, platform, synth_action));
            let node = node.clone();
            ctx.sessions.mutate(session_name, |s| s.replace_snapshot(snapshot.clone())).await?;
            Ok(Resolved { x, y, node: Some(node), selector_chain, ref_label })
        }
    }
}

fn record_result(resolved: &Resolved, extra: Value) -> Value {
    let mut obj = json!({
        "x": resolved.x,
        "y": resolved.y,
        "selectorChain": resolved.selector_chain,
        "refLabel": resolved.ref_label,
    });
    if let Value::Object(extra_map) = extra {
        if let Value::Object(map) = &mut obj {
            map.extend(extra_map);
        }
    }
    obj
}

async fn record(ctx: &DispatchContext, session_name: &str, command: &str, req: &Request, result: Value) {
    let _ = ctx
        .sessions
        .mutate(session_name, |s| {
            s.record_action(command, req.positionals.clone(), super::common::request_flags_as_value(req), Some(result));
        })
        .await;
}

/// One step of a `press` gesture series: either a plain tap or a held tap.
#[derive(Clone, Copy)]
enum GestureStep {
    Tap,
    LongPress(u64),
}

/// Parses the "Gesture series knobs" flag group (§6) into an ordered list
/// of steps plus the pause/interval timings between them. `pattern`, when
/// given, is a comma-separated list of `tap`/`long-press` tokens and wins
/// over `count`/`doubleTap`/`holdMs`; otherwise the series is `count`
/// repetitions (`doubleTap` forcing a 2-tap series) of a single step kind
/// determined by `holdMs`.
fn parse_gesture_series(req: &Request) -> Result<(Vec<GestureStep>, u64, u64, f64), DaemonError> {
    let interval_ms = req.flag_u64("intervalMs").unwrap_or(0);
    let pause_ms = req.flag_u64("pauseMs").unwrap_or(0);
    let jitter_px = req.flag_str("jitterPx").and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
    let hold_ms = req.flag_u64("holdMs");

    if let Some(pattern) = req.flag_str("pattern") {
        let steps = pattern
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|token| match token {
                "tap" => Ok(GestureStep::Tap),
                "long-press" | "long_press" => Ok(GestureStep::LongPress(hold_ms.unwrap_or(600))),
                other => Err(DaemonError::invalid_args(format!("unknown gesture pattern step '{other}'"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if steps.is_empty() {
            return Err(DaemonError::invalid_args("pattern must name at least one gesture step"));
        }
        return Ok((steps, interval_ms, pause_ms, jitter_px));
    }

    let step = match hold_ms {
        Some(ms) => GestureStep::LongPress(ms),
        None => GestureStep::Tap,
    };
    let count = if req.flag_bool("doubleTap") { 2 } else { req.flag_u64("count").unwrap_or(1).max(1) };
    Ok((vec![step; count as usize], interval_ms, pause_ms, jitter_px))
}

fn jittered(x: f64, y: f64, jitter_px: f64) -> (f64, f64) {
    if jitter_px <= 0.0 {
        return (x, y);
    }
    let mut rng = rand::thread_rng();
    let dx = rng.gen_range(-jitter_px..=jitter_px);
    let dy = rng.gen_range(-jitter_px..=jitter_px);
    (x + dx, y + dy)
}

/// Runs a parsed gesture series at a resolved point, sleeping `pause_ms`
/// before the first step and `interval_ms` between subsequent ones.
async fn run_gesture_series(
    ctx: &DispatchContext,
    device: &agent_device_adapters::Device,
    x: f64,
    y: f64,
    req: &Request,
) -> Result<u32, DaemonError> {
    let (steps, interval_ms, pause_ms, jitter_px) = parse_gesture_series(req)?;
    if pause_ms > 0 {
        tokio::time::sleep(Duration::from_millis(pause_ms)).await;
    }
    for (i, step) in steps.iter().enumerate() {
        if i > 0 && interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
        let (jx, jy) = jittered(x, y, jitter_px);
        match step {
            GestureStep::Tap => crate::platform::tap(ctx, device, jx, jy).await?,
            GestureStep::LongPress(hold_ms) => crate::platform::long_press(ctx, device, jx, jy, *hold_ms).await?,
        }
    }
    Ok(steps.len() as u32)
}

/// `press`: the only command accepting direct coordinates. Honors the
/// gesture series knobs (`count`/`intervalMs`/`holdMs`/`jitterPx`/
/// `doubleTap`/`pauseMs`/`pattern`) from §6's flag table.
pub async fn press(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let target = classify(&req.positionals, true)?;
    let resolved = resolve_target(ctx, req, session_name, target, device.platform, SynthAction::Click).await?;
    let steps = run_gesture_series(ctx, &device, resolved.x, resolved.y, req).await?;
    let result = record_result(&resolved, json!({ "steps": steps }));
    record(ctx, session_name, "press", req, result.clone()).await;
    Ok(result)
}

/// `long-press <target> [--holdMs]`: a single held tap, defaulting to 600ms.
pub async fn long_press(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let target = classify(&req.positionals, false)?;
    let resolved = resolve_target(ctx, req, session_name, target, device.platform, SynthAction::Click).await?;
    let hold_ms = req.flag_u64("holdMs").unwrap_or(600);
    crate::platform::long_press(ctx, &device, resolved.x, resolved.y, hold_ms).await?;
    let result = record_result(&resolved, json!({ "holdMs": hold_ms }));
    record(ctx, session_name, "long-press", req, result.clone()).await;
    Ok(result)
}

/// `pinch <target> <scale>`: `scale` > 1 pinches open, < 1 pinches closed.
pub async fn pinch(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let (selector, rest) = super::common::split_selector(&req.positionals, true);
    let scale: f64 = rest
        .first()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DaemonError::invalid_args("pinch requires a numeric scale"))?;
    let expr = selector.ok_or_else(|| DaemonError::invalid_args("pinch requires a target"))?;

    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let target = if is_bare_ref(&expr) { Target::Ref(expr) } else { Target::Selector(expr) };
    let resolved = resolve_target(ctx, req, session_name, target, device.platform, SynthAction::Click).await?;
    crate::platform::pinch(ctx, &device, resolved.x, resolved.y, scale).await?;
    let result = record_result(&resolved, json!({ "scale": scale }));
    record(ctx, session_name, "pinch", req, result.clone()).await;
    Ok(result)
}

/// `focus <target>`: resolves and focuses an element without typing into it.
pub async fn focus(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let target = classify(&req.positionals, false)?;
    let resolved = resolve_target(ctx, req, session_name, target, device.platform, SynthAction::Click).await?;
    crate::platform::focus(ctx, &device, resolved.x, resolved.y).await?;
    let result = record_result(&resolved, json!({}));
    record(ctx, session_name, "focus", req, result.clone()).await;
    Ok(result)
}

/// `type <text>`: keystrokes into whatever element is currently focused, no
/// target resolution (pair this with `focus` first, same split `find ...
/// type` uses).
pub async fn type_text(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let text = join_positionals(&req.positionals);
    if text.is_empty() {
        return Err(DaemonError::invalid_args("type requires text"));
    }
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    crate::platform::type_text(ctx, &device, &text).await?;
    let result = json!({ "value": text });
    record(ctx, session_name, "type", req, result.clone()).await;
    Ok(result)
}

/// `click`: identical dispatch to `press` but never accepts coordinates
/// directly (it is the selector/ref-first gesture, per §4.B's examples).
pub async fn click(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let target = classify(&req.positionals, false)?;
    let resolved = resolve_target(ctx, req, session_name, target, device.platform, SynthAction::Click).await?;
    crate::platform::tap(ctx, &device, resolved.x, resolved.y).await?;
    let result = record_result(&resolved, json!({}));
    record(ctx, session_name, "click", req, result.clone()).await;
    Ok(result)
}

/// `fill <target> <value>`: the trailing positional is the value; anything
/// before it is the target, split via `common::split_selector`.
pub async fn fill(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let (selector, rest) = super::common::split_selector(&req.positionals, true);
    let value = rest.join(" ");
    if value.is_empty() {
        return Err(DaemonError::invalid_args("fill requires a value"));
    }

    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let target = match selector {
        Some(expr) if is_bare_ref(&expr) => Target::Ref(expr),
        Some(expr) => Target::Selector(expr),
        None => return Err(DaemonError::invalid_args("fill requires a target")),
    };

    let mut warnings: Vec<String> = Vec::new();
    let resolved = resolve_target(ctx, req, session_name, target, device.platform, SynthAction::Fill).await?;
    if let Some(node) = &resolved.node {
        if !agent_device_snapshot::is_fillable_type(&node.node_type, device.platform) {
            warnings.push("attempting fill on a non-fillable role".to_string());
        }
    }

    crate::platform::focus(ctx, &device, resolved.x, resolved.y).await?;
    crate::platform::type_text(ctx, &device, &value).await?;

    let result = record_result(&resolved, json!({ "value": value, "warnings": warnings }));
    record(ctx, session_name, "fill", req, result.clone()).await;
    Ok(result)
}

enum GetKind {
    Text,
    Attrs,
}

fn get_kind(positionals: &[String]) -> (GetKind, Vec<String>) {
    if positionals.first().map(String::as_str) == Some("attrs") {
        (GetKind::Attrs, positionals[1..].to_vec())
    } else if positionals.first().map(String::as_str) == Some("text") {
        (GetKind::Text, positionals[1..].to_vec())
    } else {
        (GetKind::Text, positionals.to_vec())
    }
}

fn node_attrs(node: &Node) -> Value {
    json!({
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

/// `get text|attrs <target>`: resolves without dispatching any gesture.
pub async fn get(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let (kind, rest) = get_kind(&req.positionals);
    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);
    let target = classify(&rest, false)?;

    let node = match target {
        Target::Ref(r#ref) => {
            let snapshot = session
                .snapshot
                .as_ref()
                .ok_or_else(|| DaemonError::invalid_args("no snapshot to resolve @ref against; run snapshot first"))?;
            snapshot
                .find_by_ref(&r#ref)
                .cloned()
                .ok_or_else(|| DaemonError::invalid_args(format!("unknown ref '{ref}'")))?
        }
        Target::Selector(expr) => {
            let snapshot = capture_snapshot(ctx, &device, false).await?;
            let resolution = resolve_unique(&snapshot, &expr, device.platform)?;
            let node = resolution.node.cloned().ok_or_else(|| ambiguous_or_not_found(&expr, &resolution))?;
            ctx.sessions.mutate(session_name, |s| s.replace_snapshot(snapshot)).await?;
            node
        }
        Target::Coordinates(_, _) => return Err(DaemonError::invalid_args("get does not accept coordinates")),
    };

    let result = match kind {
        GetKind::Text => json!({ "text": agent_device_snapshot::extract_node_text(&node) }),
        GetKind::Attrs => node_attrs(&node),
    };
    record(ctx, session_name, "get", req, result.clone()).await;
    Ok(result)
}

enum Predicate {
    Exists,
    Visible,
    Hidden,
    Editable,
    Selected,
    Text,
}

fn parse_predicate(name: &str) -> Result<Predicate, DaemonError> {
    match name {
        "exists" => Ok(Predicate::Exists),
        "visible" => Ok(Predicate::Visible),
        "hidden" => Ok(Predicate::Hidden),
        "editable" => Ok(Predicate::Editable),
        "selected" => Ok(Predicate::Selected),
        "text" => Ok(Predicate::Text),
        other => Err(DaemonError::invalid_args(format!("unknown 'is' predicate '{other}'"))),
    }
}

/// `is <predicate> <target> [value]`: `exists` uses existence matching
/// (first match, no uniqueness requirement); every other predicate
/// requires a unique resolution first.
pub async fn is(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let predicate_name = req
        .positionals
        .first()
        .ok_or_else(|| DaemonError::invalid_args("is requires a predicate"))?
        .clone();
    let predicate = parse_predicate(&predicate_name)?;
    let rest = &req.positionals[1..];

    let session = load_session(ctx, session_name).await?;
    let device = device_from_binding(&session.device);

    if matches!(predicate, Predicate::Exists) {
        let expr = join_positionals(rest);
        let chain = agent_device_selector::parse_chain(&expr)?;
        let snapshot = capture_snapshot(ctx, &device, false).await?;
        let found = agent_device_selector::find_selector_chain_match(&snapshot.nodes, &chain, device.platform, false).is_some();
        ctx.sessions.mutate(session_name, |s| s.replace_snapshot(snapshot)).await?;
        let result = json!({ "result": found });
        record(ctx, session_name, "is", req, result.clone()).await;
        return Ok(result);
    }

    let (selector, value_tokens) = super::common::split_selector(rest, false);
    let expr = selector.ok_or_else(|| DaemonError::invalid_args("is requires a target"))?;
    let snapshot = capture_snapshot(ctx, &device, false).await?;
    let resolution = resolve_unique(&snapshot, &expr, device.platform)?;
    let node = resolution.node.ok_or_else(|| ambiguous_or_not_found(&expr, &resolution))?;

    let outcome = match predicate {
        Predicate::Visible => node.is_visible(),
        Predicate::Hidden => !node.is_visible(),
        Predicate::Editable => agent_device_snapshot::is_fillable_type(&node.node_type, device.platform),
        Predicate::Selected => node.is_selected(),
        Predicate::Text => agent_device_snapshot::extract_node_text(node) == Some(value_tokens.join(" ").as_str()),
        Predicate::Exists => unreachable!(),
    };
    let node = node.clone();
    ctx.sessions.mutate(session_name, |s| s.replace_snapshot(snapshot)).await?;

    let result = json!({ "result": outcome });
    record(ctx, session_name, "is", req, result.clone()).await;
    let _ = node;
    Ok(result)
}
