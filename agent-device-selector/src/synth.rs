use std::collections::HashSet;

use agent_device_snapshot::{extract_node_text, normalize_type, Node, Platform};

/// The handler action a synthesized chain is destined for; only `Fill`
/// changes output (every entry gets an `editable=true` suffix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthAction {
    Click,
    Fill,
    Get,
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Produces a deduplicated, ordered list of canonical selector expressions
/// for a node, used both for `.ad` script optimization and replay healing.
///
/// `_platform` is accepted for symmetry with the rest of the selector API
/// even though current synthesis doesn't branch on it.
pub fn build_selector_chain_for_node(
    node: &Node,
    _platform: Platform,
    action: SynthAction,
) -> Vec<String> {
    let mut entries = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push = |entries: &mut Vec<String>, expr: String| {
        if seen.insert(expr.clone()) {
            entries.push(expr);
        }
    };

    let identifier = present(&node.identifier);
    let label = present(&node.label);
    let value = present(&node.value);
    let role = normalize_type(&node.node_type);
    let text = extract_node_text(node);

    if let Some(id) = identifier {
        push(&mut entries, format!("id={}", quote(id)));
    }
    if let Some(l) = label {
        if !role.is_empty() {
            push(&mut entries, format!("role={} label={}", quote(&role), quote(l)));
        }
    }
    if let Some(l) = label {
        push(&mut entries, format!("label={}", quote(l)));
    }
    if let Some(v) = value {
        push(&mut entries, format!("value={}", quote(v)));
    }
    if let Some(t) = text {
        if Some(t) != label && Some(t) != value {
            push(&mut entries, format!("text={}", quote(t)));
        }
    }
    if !role.is_empty() {
        push(&mut entries, format!("role={}", quote(&role)));
    }
    if label.is_none() && node.is_hittable() {
        push(&mut entries, "visible=true".to_string());
    }

    if action == SynthAction::Fill {
        if entries.is_empty() {
            entries.push("editable=true".to_string());
        } else {
            for entry in entries.iter_mut() {
                entry.push_str(" editable=true");
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(
        identifier: Option<&str>,
        label: Option<&str>,
        value: Option<&str>,
        node_type: &str,
        hittable: Option<bool>,
    ) -> Node {
        Node {
            index: 0,
            parent_index: None,
            depth: 0,
            r#ref: "e1".to_string(),
            node_type: node_type.to_string(),
            label: label.map(|s| s.to_string()),
            value: value.map(|s| s.to_string()),
            identifier: identifier.map(|s| s.to_string()),
            rect: None,
            enabled: None,
            selected: None,
            hittable,
        }
    }

    #[test]
    fn prefers_id_then_role_label_then_label() {
        let n = node(
            Some("auth_continue"),
            Some("Continue"),
            None,
            "XCUIElementTypeButton",
            None,
        );
        let chain = build_selector_chain_for_node(&n, Platform::Ios, SynthAction::Click);
        assert_eq!(chain[0], r#"id="auth_continue""#);
        assert_eq!(chain[1], r#"role="button" label="Continue""#);
        assert_eq!(chain[2], r#"label="Continue""#);
        assert!(chain.contains(&r#"role="button""#.to_string()));
    }

    #[test]
    fn fill_appends_editable_true_to_every_entry() {
        let n = node(None, Some("Amount"), None, "XCUIElementTypeTextField", None);
        let chain = build_selector_chain_for_node(&n, Platform::Ios, SynthAction::Fill);
        assert!(!chain.is_empty());
        assert!(chain.iter().all(|e| e.ends_with("editable=true")));
    }

    #[test]
    fn labelless_hittable_node_falls_back_to_visible() {
        let n = node(None, None, None, "XCUIElementTypeButton", Some(true));
        let chain = build_selector_chain_for_node(&n, Platform::Ios, SynthAction::Click);
        assert!(chain.contains(&"visible=true".to_string()));
    }

    #[test]
    fn entries_are_deduplicated() {
        let n = node(None, Some("Go"), Some("Go"), "Button", None);
        let chain = build_selector_chain_for_node(&n, Platform::Ios, SynthAction::Click);
        let unique: HashSet<_> = chain.iter().collect();
        assert_eq!(unique.len(), chain.len());
    }
}
