use agent_device_snapshot::{extract_node_text, is_fillable_type, normalize_type, Node, Platform};

use crate::grammar::{Selector, Term, TermKey, TermValue};

fn normalize_for_compare(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn str_eq_normalized(a: &str, b: &str) -> bool {
    normalize_for_compare(a) == normalize_for_compare(b)
}

fn expect_str(value: &TermValue) -> &str {
    match value {
        TermValue::Str(s) => s,
        TermValue::Bool(_) => "",
    }
}

fn expect_bool(value: &TermValue) -> bool {
    match value {
        TermValue::Bool(b) => *b,
        TermValue::Str(_) => false,
    }
}

/// Evaluates a single term against a node. Boolean terms compare against an
/// explicit expected value so that e.g. `editable=false` is meaningful, not
/// just the bare-key implicit-true form.
pub fn node_matches_term(node: &Node, platform: Platform, term: &Term) -> bool {
    match term.key {
        TermKey::Id => node
            .identifier
            .as_deref()
            .map(|id| str_eq_normalized(id, expect_str(&term.value)))
            .unwrap_or(false),
        TermKey::Label => node
            .label
            .as_deref()
            .map(|label| str_eq_normalized(label, expect_str(&term.value)))
            .unwrap_or(false),
        TermKey::Value => node
            .value
            .as_deref()
            .map(|value| str_eq_normalized(value, expect_str(&term.value)))
            .unwrap_or(false),
        TermKey::Text => extract_node_text(node)
            .map(|text| str_eq_normalized(text, expect_str(&term.value)))
            .unwrap_or(false),
        TermKey::Role => {
            str_eq_normalized(&normalize_type(&node.node_type), &normalize_type(expect_str(&term.value)))
        }
        TermKey::Visible => node.is_visible() == expect_bool(&term.value),
        TermKey::Hidden => (!node.is_visible()) == expect_bool(&term.value),
        TermKey::Editable => {
            (is_fillable_type(&node.node_type, platform) && node.is_enabled())
                == expect_bool(&term.value)
        }
        TermKey::Selected => node.is_selected() == expect_bool(&term.value),
        TermKey::Enabled => node.is_enabled() == expect_bool(&term.value),
        TermKey::Hittable => node.is_hittable() == expect_bool(&term.value),
    }
}

fn node_matches_selector(node: &Node, platform: Platform, selector: &Selector) -> bool {
    selector
        .terms
        .iter()
        .all(|term| node_matches_term(node, platform, term))
}

/// Nodes matching every term in `selector`, optionally filtered to those
/// carrying a rectangle (`opts.requireRect` in the spec).
pub fn candidate_set<'a>(
    nodes: &'a [Node],
    selector: &Selector,
    platform: Platform,
    require_rect: bool,
) -> Vec<&'a Node> {
    nodes
        .iter()
        .filter(|node| !require_rect || node.rect.is_some())
        .filter(|node| node_matches_selector(node, platform, selector))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_chain;
    use agent_device_snapshot::Rect;

    fn node(label: Option<&str>, identifier: Option<&str>, node_type: &str) -> Node {
        Node {
            index: 0,
            parent_index: None,
            depth: 0,
            r#ref: "e1".to_string(),
            node_type: node_type.to_string(),
            label: label.map(|s| s.to_string()),
            value: None,
            identifier: identifier.map(|s| s.to_string()),
            rect: None,
            enabled: None,
            selected: None,
            hittable: None,
        }
    }

    #[test]
    fn label_match_is_case_and_whitespace_insensitive() {
        let n = node(Some("  Continue  Now "), None, "XCUIElementTypeButton");
        let chain = parse_chain(r#"label="continue now""#).unwrap();
        assert!(node_matches_selector(&n, Platform::Ios, &chain.selectors[0]));
    }

    #[test]
    fn role_match_normalizes_both_sides() {
        let n = node(None, None, "XCUIElementTypeButton");
        let chain = parse_chain(r#"role="button""#).unwrap();
        assert!(node_matches_selector(&n, Platform::Ios, &chain.selectors[0]));
    }

    #[test]
    fn editable_requires_fillable_type_and_enabled() {
        let mut n = node(None, None, "XCUIElementTypeTextField");
        let chain = parse_chain("editable=true").unwrap();
        assert!(node_matches_selector(&n, Platform::Ios, &chain.selectors[0]));

        n.enabled = Some(false);
        assert!(!node_matches_selector(&n, Platform::Ios, &chain.selectors[0]));
    }

    #[test]
    fn candidate_set_respects_require_rect() {
        let mut n = node(Some("Go"), None, "Button");
        let chain = parse_chain(r#"label="Go""#).unwrap();
        let nodes = vec![n.clone()];
        assert_eq!(
            candidate_set(&nodes, &chain.selectors[0], Platform::Ios, true).len(),
            0
        );

        n.rect = Some(Rect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        });
        let nodes = vec![n];
        assert_eq!(
            candidate_set(&nodes, &chain.selectors[0], Platform::Ios, true).len(),
            1
        );
    }
}
