use std::collections::HashMap;

use serde_json::Value;

/// Maps a CLI-facing flag spelling to its wire name. The CLI accepts
/// kebab-case long flags and a handful of short snapshot-shaping aliases;
/// the daemon only ever sees the camelCase names from spec §6's flag table.
const FLAG_ALIASES: &[(&str, &str)] = &[
    ("platform", "platform"),
    ("device", "device"),
    ("udid", "udid"),
    ("serial", "serial"),
    ("i", "snapshotInteractiveOnly"),
    ("interactive-only", "snapshotInteractiveOnly"),
    ("c", "snapshotCompact"),
    ("compact", "snapshotCompact"),
    ("d", "snapshotDepth"),
    ("depth", "snapshotDepth"),
    ("s", "snapshotScope"),
    ("scope", "snapshotScope"),
    ("raw", "snapshotRaw"),
    ("backend", "snapshotBackend"),
    ("relaunch", "relaunch"),
    ("save-script", "saveScript"),
    ("no-record", "noRecord"),
    ("replay-update", "replayUpdate"),
    ("update", "replayUpdate"),
    ("count", "count"),
    ("interval-ms", "intervalMs"),
    ("hold-ms", "holdMs"),
    ("jitter-px", "jitterPx"),
    ("double-tap", "doubleTap"),
    ("pause-ms", "pauseMs"),
    ("pattern", "pattern"),
    ("apps-filter", "appsFilter"),
    ("apps-metadata", "appsMetadata"),
    ("out", "out"),
    ("activity", "activity"),
    ("timeout-ms", "timeoutMs"),
];

fn wire_name(cli_name: &str) -> String {
    FLAG_ALIASES
        .iter()
        .find(|(alias, _)| *alias == cli_name)
        .map(|(_, wire)| wire.to_string())
        .unwrap_or_else(|| cli_name.to_string())
}

fn infer_value(raw: &str) -> Value {
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

/// Splits the trailing argv (everything after the command name) into
/// positionals and flags. `--name value` pairs a flag with the following
/// token unless that token itself looks like another flag, in which case
/// `--name` is recorded as a boolean; single-dash short aliases (`-i`, `-c`,
/// `-d`, `-s`) follow the same rule. Mirrors `agent_device_core::parse_ad_line`'s
/// tokenizer so a hand-typed command and its recorded `.ad` replay agree.
pub fn split_args(args: &[String]) -> (Vec<String>, HashMap<String, Value>) {
    let mut positionals = Vec::new();
    let mut flags = HashMap::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let name = if let Some(rest) = arg.strip_prefix("--") {
            Some(rest)
        } else if let Some(rest) = arg.strip_prefix('-') {
            if rest.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                None
            } else {
                Some(rest)
            }
        } else {
            None
        };

        match name {
            Some(name) => {
                let next_is_value = args.get(i + 1).map(|t| !t.starts_with('-') || is_negative_number(t)).unwrap_or(false);
                if next_is_value {
                    flags.insert(wire_name(name), infer_value(&args[i + 1]));
                    i += 2;
                } else {
                    flags.insert(wire_name(name), Value::Bool(true));
                    i += 1;
                }
            }
            None => {
                positionals.push(arg.clone());
                i += 1;
            }
        }
    }
    (positionals, flags)
}

fn is_negative_number(token: &str) -> bool {
    token.strip_prefix('-').map(|rest| rest.parse::<f64>().is_ok()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_positionals_and_long_flags() {
        let args: Vec<String> = vec!["label=Continue".into(), "--count".into(), "3".into(), "--double-tap".into()];
        let (positionals, flags) = split_args(&args);
        assert_eq!(positionals, vec!["label=Continue".to_string()]);
        assert_eq!(flags.get("count"), Some(&Value::Number(3.into())));
        assert_eq!(flags.get("doubleTap"), Some(&Value::Bool(true)));
    }

    #[test]
    fn short_snapshot_aliases_map_to_wire_names() {
        let args: Vec<String> = vec!["-i".into(), "-d".into(), "4".into()];
        let (positionals, flags) = split_args(&args);
        assert!(positionals.is_empty());
        assert_eq!(flags.get("snapshotInteractiveOnly"), Some(&Value::Bool(true)));
        assert_eq!(flags.get("snapshotDepth"), Some(&Value::Number(4.into())));
    }

    #[test]
    fn negative_number_positional_is_not_mistaken_for_a_flag() {
        let args: Vec<String> = vec!["100".into(), "-50".into()];
        let (positionals, flags) = split_args(&args);
        assert_eq!(positionals, vec!["100".to_string(), "-50".to_string()]);
        assert!(flags.is_empty());
    }
}
