use std::cmp::Ordering;

use agent_device_snapshot::{Node, Platform};
use serde::{Deserialize, Serialize};

use crate::grammar::SelectorChain;
use crate::matcher::candidate_set;

/// Per-selector match count, reported alongside a failed resolution so
/// callers can explain why nothing qualified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorDiagnostic {
    pub selector: String,
    pub matches: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub require_rect: bool,
    pub require_unique: bool,
    pub disambiguate_ambiguous: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            require_rect: false,
            require_unique: true,
            disambiguate_ambiguous: true,
        }
    }
}

pub struct Resolution<'a> {
    pub node: Option<&'a Node>,
    pub diagnostics: Vec<SelectorDiagnostic>,
}

impl<'a> Resolution<'a> {
    pub fn is_resolved(&self) -> bool {
        self.node.is_some()
    }
}

/// Resolves a selector chain to a single node, trying each fallback selector
/// in order. Each attempt contributes one diagnostic entry regardless of
/// whether it ultimately resolves.
pub fn resolve_selector_chain<'a>(
    nodes: &'a [Node],
    chain: &SelectorChain,
    platform: Platform,
    opts: ResolveOptions,
) -> Resolution<'a> {
    let mut diagnostics = Vec::with_capacity(chain.selectors.len());

    for selector in &chain.selectors {
        let candidates = candidate_set(nodes, selector, platform, opts.require_rect);
        diagnostics.push(SelectorDiagnostic {
            selector: selector.raw.clone(),
            matches: candidates.len(),
        });

        if !opts.require_unique {
            if let Some(first) = candidates.first() {
                return Resolution {
                    node: Some(first),
                    diagnostics,
                };
            }
            continue;
        }

        match candidates.len() {
            1 => {
                return Resolution {
                    node: Some(candidates[0]),
                    diagnostics,
                };
            }
            n if n > 1 && opts.disambiguate_ambiguous => {
                if let Some(winner) = smallest_rect_area(candidates) {
                    return Resolution {
                        node: Some(winner),
                        diagnostics,
                    };
                }
            }
            _ => {}
        }
    }

    Resolution {
        node: None,
        diagnostics,
    }
}

/// Returns the first selector in the chain yielding at least one match, with
/// no uniqueness requirement. Used for `is exists` checks.
pub fn find_selector_chain_match<'a>(
    nodes: &'a [Node],
    chain: &SelectorChain,
    platform: Platform,
    require_rect: bool,
) -> Option<&'a Node> {
    for selector in &chain.selectors {
        let candidates = candidate_set(nodes, selector, platform, require_rect);
        if let Some(first) = candidates.first() {
            return Some(first);
        }
    }
    None
}

fn smallest_rect_area<'a>(candidates: Vec<&'a Node>) -> Option<&'a Node> {
    candidates.into_iter().min_by(|a, b| {
        let area_a = a.rect.map(|r| r.area()).unwrap_or(f64::INFINITY);
        let area_b = b.rect.map(|r| r.area()).unwrap_or(f64::INFINITY);
        area_a.partial_cmp(&area_b).unwrap_or(Ordering::Equal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_chain;
    use agent_device_snapshot::Rect;

    fn node(r#ref: &str, label: &str, identifier: &str, rect: Rect) -> Node {
        Node {
            index: 0,
            parent_index: None,
            depth: 0,
            r#ref: r#ref.to_string(),
            node_type: "Button".to_string(),
            label: Some(label.to_string()),
            value: None,
            identifier: Some(identifier.to_string()),
            rect: Some(rect),
            enabled: None,
            selected: None,
            hittable: None,
        }
    }

    #[test]
    fn fallback_resolves_ambiguity_via_second_selector() {
        let rect = Rect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let nodes = vec![
            node("e1", "Continue", "auth_continue", rect),
            node("e2", "Continue", "secondary_continue", rect),
        ];
        let chain = parse_chain(r#"label="Continue" || id=auth_continue"#).unwrap();

        let resolution =
            resolve_selector_chain(&nodes, &chain, Platform::Ios, ResolveOptions::default());

        assert_eq!(resolution.node.unwrap().r#ref, "e1");
        assert_eq!(resolution.diagnostics.len(), 2);
        assert_eq!(resolution.diagnostics[0].matches, 2);
        assert_eq!(resolution.diagnostics[1].matches, 1);
    }

    #[test]
    fn disambiguates_by_smallest_rectangle_area() {
        let big = Rect {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
        };
        let small = Rect {
            x: 0.0,
            y: 0.0,
            width: 5.0,
            height: 5.0,
        };
        let nodes = vec![
            node("e1", "Continue", "a", big),
            node("e2", "Continue", "b", small),
        ];
        let chain = parse_chain(r#"label="Continue""#).unwrap();

        let resolution =
            resolve_selector_chain(&nodes, &chain, Platform::Ios, ResolveOptions::default());

        assert_eq!(resolution.node.unwrap().r#ref, "e2");
    }

    #[test]
    fn returns_none_with_per_selector_diagnostics_when_nothing_matches() {
        let nodes: Vec<Node> = Vec::new();
        let chain = parse_chain(r#"label="Continue" || id=x"#).unwrap();

        let resolution =
            resolve_selector_chain(&nodes, &chain, Platform::Ios, ResolveOptions::default());

        assert!(resolution.node.is_none());
        assert_eq!(resolution.diagnostics.len(), 2);
        assert!(resolution.diagnostics.iter().all(|d| d.matches == 0));
    }

    #[test]
    fn find_selector_chain_match_ignores_uniqueness() {
        let rect = Rect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let nodes = vec![
            node("e1", "Continue", "a", rect),
            node("e2", "Continue", "b", rect),
        ];
        let chain = parse_chain(r#"label="Continue""#).unwrap();

        let found = find_selector_chain_match(&nodes, &chain, Platform::Ios, false);
        assert!(found.is_some());
    }
}
