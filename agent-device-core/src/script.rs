use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use crate::session::{Action, DeviceBinding, Session};

/// Flag keys that round-trip through `.ad` emission verbatim as
/// `--kebab-case value`/`--kebab-case` pairs, per spec §4.D's "series flags
/// round-trip" note. Anything else recorded on an action either has
/// command-specific formatting (handled separately) or is dropped.
const SERIES_FLAGS: &[(&str, &str)] = &[
    ("count", "count"),
    ("intervalMs", "interval-ms"),
    ("holdMs", "hold-ms"),
    ("jitterPx", "jitter-px"),
    ("doubleTap", "double-tap"),
    ("pauseMs", "pause-ms"),
    ("pattern", "pattern"),
];

/// Replaces any character outside `[A-Za-z0-9._-]` with `_`, used for both
/// `.ad` and trace file names so session names are always safe path
/// segments.
pub fn safe_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// `<sessionsDir>/<safeName>-<ISOtime>.trace.log`, per spec §4.D.
pub fn default_trace_path(sessions_dir: &Path, session_name: &str) -> PathBuf {
    sessions_dir.join(format!("{}-{}.trace.log", safe_name(session_name), Utc::now().to_rfc3339()))
}

/// `<sessionsDir>/<safeName>-<ISOtime>.ad`, the companion script path, named
/// analogously (the spec gives `defaultTracePath` explicitly and implies the
/// same shape for `.ad` files via the persisted-state layout in §6).
pub fn default_script_path(sessions_dir: &Path, session_name: &str) -> PathBuf {
    sessions_dir.join(format!("{}-{}.ad", safe_name(session_name), Utc::now().to_rfc3339()))
}

fn is_bare_ref(token: &str) -> bool {
    token
        .strip_prefix('@')
        .map(|rest| !rest.is_empty() && rest.chars().next() == Some('e') && rest[1..].chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_bare_integer(token: &str) -> bool {
    !token.is_empty() && token.parse::<i64>().is_ok()
}

/// Stable quoting rule: bare for refs (`@eN`) and integers, otherwise
/// JSON-string-quoted (so the `.ad` tokenizer's JSON-unescape inverts this
/// exactly).
pub fn quote_token(token: &str) -> String {
    if is_bare_ref(token) || is_bare_integer(token) {
        token.to_string()
    } else {
        serde_json::to_string(token).expect("string always serializes to JSON")
    }
}

/// Tokenizes one `.ad` line: whitespace-separated tokens, with `"..."`
/// spans consumed as a single JSON string literal (including its interior
/// whitespace) and unescaped per JSON string rules.
pub fn tokenize_line(line: &str) -> Result<Vec<String>, String> {
    let chars: Vec<char> = line.chars().collect();
    let n = chars.len();
    let mut i = 0;
    let mut tokens = Vec::new();

    while i < n {
        while i < n && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= n {
            break;
        }

        if chars[i] == '"' {
            let start = i;
            i += 1;
            while i < n {
                if chars[i] == '\\' && i + 1 < n {
                    i += 2;
                    continue;
                }
                if chars[i] == '"' {
                    i += 1;
                    break;
                }
                i += 1;
            }
            if i > n || chars[start..i].last() != Some(&'"') || i - start < 2 {
                return Err(format!("unclosed quoted token starting at column {start}"));
            }
            let raw: String = chars[start..i].iter().collect();
            let unquoted: String = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
            tokens.push(unquoted);
        } else {
            let start = i;
            while i < n && !chars[i].is_whitespace() {
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        }
    }

    Ok(tokens)
}

/// One parsed `.ad` line: a command plus positionals and flags, ready to be
/// replayed as a dispatch request.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub command: String,
    pub positionals: Vec<String>,
    pub flags: serde_json::Map<String, Value>,
}

fn infer_flag_value(raw: &str) -> Value {
    if raw == "true" {
        Value::Bool(true)
    } else if raw == "false" {
        Value::Bool(false)
    } else if let Ok(n) = raw.parse::<i64>() {
        Value::Number(n.into())
    } else if let Ok(f) = raw.parse::<f64>() {
        serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::String(raw.to_string()))
    } else {
        Value::String(raw.to_string())
    }
}

/// Parses one `.ad` line, per spec §4.G's replay tokenizer. Blank lines,
/// whitespace-only lines, and `#`-prefixed comments (including the reserved
/// `context` command) return `None`.
pub fn parse_ad_line(line: &str) -> Result<Option<ParsedLine>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let tokens = tokenize_line(line)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    if tokens[0] == "context" {
        return Ok(None);
    }

    let command = tokens[0].clone();
    let mut positionals = Vec::new();
    let mut flags = serde_json::Map::new();
    let mut i = 1;
    while i < tokens.len() {
        let token = &tokens[i];
        if let Some(name) = token.strip_prefix("--") {
            let next_is_value = tokens
                .get(i + 1)
                .map(|t| !t.starts_with("--"))
                .unwrap_or(false);
            if next_is_value {
                flags.insert(name.to_string(), infer_flag_value(&tokens[i + 1]));
                i += 2;
            } else {
                flags.insert(name.to_string(), Value::Bool(true));
                i += 1;
            }
        } else {
            positionals.push(token.clone());
            i += 1;
        }
    }

    Ok(Some(ParsedLine { command, positionals, flags }))
}

fn context_line(device: &DeviceBinding) -> String {
    let platform = match device.platform {
        agent_device_snapshot::Platform::Ios => "ios",
        agent_device_snapshot::Platform::Android => "android",
    };
    let name = device.device_name.as_deref().unwrap_or(&device.device_id);
    format!(r#"context platform={platform} device={} kind=unknown theme=unknown"#, serde_json::to_string(name).unwrap())
}

fn snapshot_flag_tokens(flags: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if flags.get("snapshotInteractiveOnly").and_then(Value::as_bool).unwrap_or(false) {
        out.push("-i".to_string());
    }
    if flags.get("snapshotCompact").and_then(Value::as_bool).unwrap_or(false) {
        out.push("-c".to_string());
    }
    if let Some(depth) = flags.get("snapshotDepth").and_then(Value::as_u64) {
        out.push("-d".to_string());
        out.push(depth.to_string());
    }
    if let Some(scope) = flags.get("snapshotScope").and_then(Value::as_str) {
        out.push("-s".to_string());
        out.push(quote_token(scope));
    }
    if flags.get("snapshotRaw").and_then(Value::as_bool).unwrap_or(false) {
        out.push("--raw".to_string());
    }
    if let Some(backend) = flags.get("snapshotBackend").and_then(Value::as_str) {
        out.push("--backend".to_string());
        out.push(quote_token(backend));
    }
    out
}

fn series_flag_tokens(flags: &Value) -> Vec<String> {
    let mut out = Vec::new();
    for (wire_name, kebab_name) in SERIES_FLAGS {
        if let Some(value) = flags.get(*wire_name) {
            out.push(format!("--{kebab_name}"));
            match value {
                Value::Bool(true) => {}
                Value::Bool(false) => {}
                Value::String(s) => out.push(quote_token(s)),
                other => out.push(other.to_string()),
            }
        }
    }
    out
}

/// Renders one action as a `.ad` line, applying command-specific formatting
/// (snapshot shaping flags, `open --relaunch`, series flags) but *not* the
/// selector-rewrite optimizer — callers apply that to `positionals` first.
fn format_action_line(command: &str, positionals: &[String], flags: &Value) -> String {
    let mut tokens = vec![command.to_string()];
    tokens.extend(positionals.iter().map(|p| quote_token(p)));

    match command {
        "snapshot" => tokens.extend(snapshot_flag_tokens(flags)),
        "open" => {
            if flags.get("relaunch").and_then(Value::as_bool).unwrap_or(false) {
                tokens.push("--relaunch".to_string());
            }
        }
        _ => {}
    }

    tokens.extend(series_flag_tokens(flags));
    tokens.join(" ")
}

fn selector_chain_from_result(result: &Value) -> Option<String> {
    result
        .get("selectorChain")
        .and_then(Value::as_array)
        .filter(|entries| !entries.is_empty())
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" || ")
        })
}

fn ref_label_from_result(result: &Value) -> Option<&str> {
    result.get("refLabel").and_then(Value::as_str)
}

/// Applies the §4.D optimizer to one action: `click`/`fill`/`get` actions
/// whose first positional is a ref and whose recorded result carries a
/// `selectorChain` are rewritten to use the joined selector directly. When
/// only a `refLabel` is available, a scoped `snapshot` line is prepended so
/// replay re-establishes a fresh, matching ref before the action runs.
fn optimize_action(action: &Action) -> (Option<String>, Vec<String>) {
    let is_ref_based = matches!(action.command.as_str(), "click" | "fill" | "get")
        && action.positionals.first().map(|p| is_bare_ref(p)).unwrap_or(false);

    if !is_ref_based {
        return (None, action.positionals.clone());
    }

    let Some(result) = &action.result else {
        return (None, action.positionals.clone());
    };

    if let Some(chain) = selector_chain_from_result(result) {
        let mut positionals = action.positionals.clone();
        positionals[0] = chain;
        return (None, positionals);
    }

    if let Some(label) = ref_label_from_result(result) {
        let prefix = format!(r#"snapshot -s {}"#, quote_token(&format!(r#"text="{label}""#)));
        return (Some(prefix), action.positionals.clone());
    }

    (None, action.positionals.clone())
}

/// Renders a session's full `.ad` script: the `context` header followed by
/// one optimized line per recorded action.
pub fn render_script(session: &Session) -> String {
    let mut lines = vec![context_line(&session.device)];
    for action in &session.actions {
        let (prefix, positionals) = optimize_action(action);
        if let Some(prefix) = prefix {
            lines.push(prefix);
        }
        lines.push(format_action_line(&action.command, &positionals, &action.flags));
    }
    lines.join("\n") + "\n"
}

/// Atomically rewrites `path` with `contents`: write to a sibling temp file,
/// then rename over the original, so a reader never observes a partial
/// write (used by replay heal's rewrite-in-place step).
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_device_adapters::DeviceKind;
    use agent_device_snapshot::Platform;
    use serde_json::json;

    fn binding() -> DeviceBinding {
        DeviceBinding {
            device_id: "udid-1".to_string(),
            platform: Platform::Ios,
            kind: DeviceKind::Simulator,
            device_name: Some("iPhone 15".to_string()),
            udid: Some("udid-1".to_string()),
            serial: None,
        }
    }

    #[test]
    fn safe_name_replaces_unsafe_characters() {
        assert_eq!(safe_name("my session/1"), "my_session_1");
        assert_eq!(safe_name("keep-this.ok_123"), "keep-this.ok_123");
    }

    #[test]
    fn quote_token_leaves_refs_and_integers_bare() {
        assert_eq!(quote_token("@e3"), "@e3");
        assert_eq!(quote_token("42"), "42");
        assert_eq!(quote_token("Continue"), "\"Continue\"");
    }

    #[test]
    fn tokenize_line_handles_quoted_selector_with_escapes() {
        let line = r#"click "id=\"old_continue\" || label=\"Continue\"""#;
        let tokens = tokenize_line(line).unwrap();
        assert_eq!(tokens, vec!["click", r#"id="old_continue" || label="Continue""#]);
    }

    #[test]
    fn parse_ad_line_splits_positionals_and_flags() {
        let parsed = parse_ad_line(r#"click @e3 --count 2 --double-tap"#).unwrap().unwrap();
        assert_eq!(parsed.command, "click");
        assert_eq!(parsed.positionals, vec!["@e3".to_string()]);
        assert_eq!(parsed.flags.get("count"), Some(&json!(2)));
        assert_eq!(parsed.flags.get("double-tap"), Some(&json!(true)));
    }

    #[test]
    fn parse_ad_line_skips_comments_blanks_and_context() {
        assert!(parse_ad_line("").unwrap().is_none());
        assert!(parse_ad_line("   ").unwrap().is_none());
        assert!(parse_ad_line("# a comment").unwrap().is_none());
        assert!(parse_ad_line(r#"context platform=ios device="iPhone" kind=simulator theme=unknown"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn render_script_starts_with_context_line() {
        let session = Session::new("main".to_string(), binding());
        let script = render_script(&session);
        assert!(script.starts_with("context platform=ios device=\"iPhone 15\""));
    }

    #[test]
    fn optimizer_rewrites_ref_to_selector_chain_when_available() {
        let mut session = Session::new("main".to_string(), binding());
        session.record_action(
            "click",
            vec!["@e3".to_string()],
            json!({}),
            Some(json!({ "selectorChain": ["id=\"auth_continue\"", "label=\"Continue\""] })),
        );
        let script = render_script(&session);
        let line = script.lines().nth(1).unwrap();
        assert_eq!(line, r#"click "id=\"auth_continue\" || label=\"Continue\"""#);
    }

    #[test]
    fn optimizer_prepends_scoped_snapshot_when_only_ref_label_is_known() {
        let mut session = Session::new("main".to_string(), binding());
        session.record_action(
            "click",
            vec!["@e3".to_string()],
            json!({}),
            Some(json!({ "refLabel": "Continue" })),
        );
        let script = render_script(&session);
        let lines: Vec<&str> = script.lines().collect();
        assert!(lines[1].starts_with("snapshot -s"));
        assert_eq!(lines[2], "click @e3");
    }
}
