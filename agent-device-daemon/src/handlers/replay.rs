use agent_device_core::{parse_ad_line, write_atomic, DaemonError, ParsedLine};
use agent_device_selector::{build_selector_chain_for_node, resolve_selector_chain, ResolveOptions, SynthAction};
use agent_device_snapshot::{extract_node_text, resolve_ref_label, Node, Snapshot};
use serde_json::{json, Value};

use crate::context::DispatchContext;
use crate::wire::Request;

use super::common::{capture_snapshot, device_from_binding, load_session, request_flags_as_value};

fn is_ref_positional(token: &str) -> bool {
    token.starts_with("@e") && token[2..].chars().all(|c| c.is_ascii_digit())
}

fn is_numeric(token: &str) -> bool {
    token.parse::<f64>().is_ok()
}

struct Step {
    line_no: usize,
    parsed: ParsedLine,
}

fn read_steps(contents: &str) -> Result<Vec<Step>, DaemonError> {
    let mut steps = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        match parse_ad_line(line) {
            Ok(Some(parsed)) => steps.push(Step { line_no: idx, parsed }),
            Ok(None) => {}
            Err(e) => return Err(DaemonError::invalid_args(format!("malformed replay line {}: {e}", idx + 1))),
        }
    }
    Ok(steps)
}

/// Dispatches one parsed `.ad` line as if it had arrived over the wire,
/// reusing the same command table `dispatcher::handle_command` uses so
/// replay never diverges from live behavior.
async fn run_step(ctx: &DispatchContext, session_name: &str, parsed: &ParsedLine) -> Result<Value, DaemonError> {
    let flags: std::collections::HashMap<String, Value> = parsed.flags.clone().into_iter().collect();
    let synthetic = Request {
        token: String::new(),
        session: session_name.to_string(),
        command: parsed.command.clone(),
        positionals: parsed.positionals.clone(),
        flags,
        meta: Default::default(),
    };
    crate::dispatcher::handle_command(ctx, &synthetic, session_name).await
}

/// Candidate selectors to retry a failed step with, per §4.G's heal
/// algorithm: the prior result's `selectorChain` if any, the raw positional
/// if it isn't a ref/number, and four per-field fallbacks built from the
/// recorded `refLabel`.
fn heal_candidates(parsed: &ParsedLine, prior_result: Option<&Value>, is_fill: bool) -> Vec<String> {
    let mut candidates = Vec::new();

    if let Some(result) = prior_result {
        if let Some(chain) = result.get("selectorChain").and_then(Value::as_array) {
            let joined: Vec<&str> = chain.iter().filter_map(Value::as_str).collect();
            if !joined.is_empty() {
                candidates.push(joined.join(" || "));
            }
        }
    }

    if let Some(first) = parsed.positionals.first() {
        if !is_ref_positional(first) && !is_numeric(first) {
            candidates.push(first.clone());
        }
    }

    if let Some(result) = prior_result {
        if let Some(label) = result.get("refLabel").and_then(Value::as_str) {
            let suffix = if is_fill { " editable=true" } else { "" };
            let quoted = label.replace('\\', "\\\\").replace('"', "\\\"");
            for key in ["id", "label", "text", "value"] {
                candidates.push(format!(r#"{key}="{quoted}"{suffix}"#));
            }
        }
    }

    candidates
}

fn resolve_candidate(snapshot: &Snapshot, expr: &str, platform: agent_device_snapshot::Platform, require_rect: bool) -> Option<Node> {
    let chain = agent_device_selector::parse_chain(expr).ok()?;
    let opts = ResolveOptions { require_rect, require_unique: true, disambiguate_ambiguous: true };
    resolve_selector_chain(&snapshot.nodes, &chain, platform, opts).node.cloned()
}

/// Attempts to heal one failed step: snapshots the screen, tries each
/// candidate selector in turn, and on success rewrites the step's
/// positionals to the canonical synthesized chain.
async fn heal_step(
    ctx: &DispatchContext,
    session_name: &str,
    parsed: &ParsedLine,
    prior_result: Option<&Value>,
) -> Option<ParsedLine> {
    let is_fill = parsed.command == "fill";
    let requires_rect = matches!(
        parsed.command.as_str(),
        "click" | "fill" | "press" | "long-press" | "pinch" | "focus"
    );

    let session = load_session(ctx, session_name).await.ok()?;
    let device = device_from_binding(&session.device);
    let snapshot = capture_snapshot(ctx, &device, false).await.ok()?;

    let candidates = heal_candidates(parsed, prior_result, is_fill);
    for candidate in candidates {
        if let Some(node) = resolve_candidate(&snapshot, &candidate, device.platform, requires_rect) {
            let action = if is_fill { SynthAction::Fill } else { SynthAction::Click };
            let chain = build_selector_chain_for_node(&node, device.platform, action);
            let expr = chain.join(" || ");
            let mut healed = parsed.clone();
            if healed.positionals.is_empty() {
                healed.positionals.push(expr);
            } else {
                healed.positionals[0] = expr;
            }
            let _ = resolve_ref_label(&node, &snapshot.nodes);
            let _ = extract_node_text(&node);
            return Some(healed);
        }
    }
    None
}

/// `replay <path> [--update]`, per §4.G: replays every recorded step through
/// the daemon; with `--update`, a failing step triggers a heal attempt and,
/// if every step ultimately succeeds with at least one heal, the `.ad` file
/// is atomically rewritten with the healed selectors.
pub async fn replay(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let path = req
        .positionals
        .first()
        .ok_or_else(|| DaemonError::invalid_args("replay requires a script path"))?
        .clone();
    let update = req.flag_bool("replayUpdate") || req.flag_bool("update");

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| DaemonError::command_failed(format!("could not read replay script '{path}': {e}"), false))?;
    let mut steps = read_steps(&contents)?;

    let mut healed_count = 0usize;
    let mut rewritten_lines: Vec<Option<String>> = vec![None; steps.len()];

    for (idx, step) in steps.iter_mut().enumerate() {
        match run_step(ctx, session_name, &step.parsed).await {
            Ok(_) => continue,
            Err(err) if !update => {
                return Err(err.into_replay_failure(&path, idx + 1, &step.parsed.command, &step.parsed.positionals));
            }
            Err(first_err) => {
                let prior = session_prior_result(ctx, session_name, &step.parsed).await;
                let Some(healed) = heal_step(ctx, session_name, &step.parsed, prior.as_ref()).await else {
                    return Err(first_err.into_replay_failure(&path, idx + 1, &step.parsed.command, &step.parsed.positionals));
                };
                match run_step(ctx, session_name, &healed).await {
                    Ok(_) => {
                        healed_count += 1;
                        rewritten_lines[idx] = Some(render_healed_line(&healed));
                        step.parsed = healed;
                    }
                    Err(err) => {
                        return Err(err.into_replay_failure(&path, idx + 1, &step.parsed.command, &step.parsed.positionals));
                    }
                }
            }
        }
    }

    if update && healed_count > 0 {
        let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
        for step in &steps {
            if let Some(new_line) = rewritten_lines.get(step_index_by_line(&steps, step.line_no)).and_then(|o| o.clone()) {
                if step.line_no < lines.len() {
                    lines[step.line_no] = new_line;
                }
            }
        }
        let rewritten = lines.join("\n") + "\n";
        write_atomic(std::path::Path::new(&path), &rewritten)
            .map_err(|e| DaemonError::command_failed(format!("could not rewrite replay script: {e}"), false))?;
    }

    let _ = request_flags_as_value(req);
    Ok(json!({ "healed": healed_count, "replayed": steps.len() }))
}

fn step_index_by_line(steps: &[Step], line_no: usize) -> usize {
    steps.iter().position(|s| s.line_no == line_no).unwrap_or(0)
}

fn render_healed_line(parsed: &ParsedLine) -> String {
    let mut tokens = vec![parsed.command.clone()];
    tokens.extend(parsed.positionals.iter().map(|p| agent_device_core::quote_token(p)));
    for (key, value) in &parsed.flags {
        tokens.push(format!("--{key}"));
        if !matches!(value, Value::Bool(true)) {
            tokens.push(value.to_string());
        }
    }
    tokens.join(" ")
}

/// Looks at the session's last recorded action matching this step's command
/// and positionals, to recover the `selectorChain`/`refLabel` a prior
/// (pre-replay) run of the same action produced — replay itself doesn't
/// re-derive these from scratch, it reuses whatever the original recording
/// session captured.
async fn session_prior_result(ctx: &DispatchContext, session_name: &str, parsed: &ParsedLine) -> Option<Value> {
    let session = ctx.sessions.get(session_name).await?;
    session
        .actions
        .iter()
        .rev()
        .find(|a| a.command == parsed.command && a.positionals == parsed.positionals)
        .and_then(|a| a.result.clone())
}
