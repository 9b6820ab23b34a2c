use std::collections::HashSet;

use crate::node::{is_meaningful, meaningful_text, Node, Platform, RawNode};

/// Strips platform-specific type prefixes, lowercases, and keeps the segment
/// after the last `.` or `/` separator.
///
/// `XCUIElementTypeTextField` -> `textfield`, `android.widget.Button` -> `button`.
pub fn normalize_type(node_type: &str) -> String {
    let stripped = node_type
        .strip_prefix("XCUIElementType")
        .unwrap_or(node_type);
    let segment = stripped
        .rsplit(|c| c == '.' || c == '/')
        .next()
        .unwrap_or(stripped);
    segment.to_lowercase()
}

/// Whether a node of the given (raw, un-normalized) type accepts text input
/// on the given platform.
pub fn is_fillable_type(node_type: &str, platform: Platform) -> bool {
    let normalized = normalize_type(node_type);
    match platform {
        Platform::Android => normalized == "edittext" || normalized == "autocompletetextview",
        Platform::Ios => matches!(
            normalized.as_str(),
            "textfield" | "securetextfield" | "searchfield" | "textview" | "textarea" | "search"
        ),
    }
}

fn is_group_wrapper_type(node_type: &str) -> bool {
    matches!(normalize_type(node_type).as_str(), "group" | "ioscontentgroup")
}

/// Removes semantically empty `group`/`ioscontentgroup` wrappers (no
/// meaningful label/value/identifier) from a raw preorder node list,
/// remapping `parent_index` past removed ancestors and rebalancing `depth`
/// by the count of pruned ancestors above each surviving node.
///
/// Preserves the relative order of kept nodes (prune monotonicity).
pub fn prune_group_nodes(raw: &[RawNode]) -> Vec<RawNode> {
    let n = raw.len();
    let mut pruned = vec![false; n];
    for (i, node) in raw.iter().enumerate() {
        if is_group_wrapper_type(&node.node_type)
            && meaningful_text(&node.label, &node.value, &node.identifier).is_none()
        {
            pruned[i] = true;
        }
    }

    // Map each original index to its new index in the output list, if kept.
    let mut new_index_of: Vec<Option<usize>> = vec![None; n];
    let mut next_new_index = 0usize;
    for i in 0..n {
        if !pruned[i] {
            new_index_of[i] = Some(next_new_index);
            next_new_index += 1;
        }
    }

    // For a pruned ancestor chain, find the nearest kept ancestor (new index)
    // and count how many pruned ancestors sit between this node and the root.
    fn resolve_ancestor(
        raw: &[RawNode],
        pruned: &[bool],
        new_index_of: &[Option<usize>],
        mut cursor: Option<usize>,
    ) -> (Option<usize>, usize) {
        let mut pruned_count = 0usize;
        let mut visited = HashSet::new();
        while let Some(idx) = cursor {
            if !visited.insert(idx) {
                break; // cycle guard
            }
            if pruned[idx] {
                pruned_count += 1;
                cursor = raw[idx].parent_index;
                continue;
            }
            return (new_index_of[idx], pruned_count);
        }
        (None, pruned_count)
    }

    let mut out = Vec::with_capacity(next_new_index);
    for (i, node) in raw.iter().enumerate() {
        if pruned[i] {
            continue;
        }
        let (new_parent, ancestors_pruned) =
            resolve_ancestor(raw, &pruned, &new_index_of, node.parent_index);
        let original_depth = node.depth.unwrap_or(0);
        let new_depth = original_depth.saturating_sub(ancestors_pruned);

        out.push(RawNode {
            index: Some(new_index_of[i].unwrap()),
            parent_index: new_parent,
            depth: Some(new_depth),
            node_type: node.node_type.clone(),
            label: node.label.clone(),
            value: node.value.clone(),
            identifier: node.identifier.clone(),
            rect: node.rect,
            enabled: node.enabled,
            selected: node.selected,
            hittable: node.hittable,
        });
    }

    out
}

/// Assigns `ref = "e" + (k+1)` by final list position and normalizes missing
/// `depth` to zero. Refs are stable only within the returned snapshot.
pub fn attach_refs(raw: &[RawNode]) -> Vec<Node> {
    raw.iter()
        .enumerate()
        .map(|(k, node)| Node {
            index: k,
            parent_index: node.parent_index,
            depth: node.depth.unwrap_or(0),
            r#ref: format!("e{}", k + 1),
            node_type: node.node_type.clone(),
            label: node.label.clone(),
            value: node.value.clone(),
            identifier: node.identifier.clone(),
            rect: node.rect,
            enabled: node.enabled,
            selected: node.selected,
            hittable: node.hittable,
        })
        .collect()
}

/// Walks the `parent_index` chain from `start` until a hittable node is
/// found. Returns `None` if the root is reached without one, and guards
/// against malformed cyclic parent links.
pub fn find_nearest_hittable_ancestor<'a>(nodes: &'a [Node], start: &Node) -> Option<&'a Node> {
    let mut cursor = start.parent_index;
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.r#ref.clone());
    while let Some(idx) = cursor {
        let node = nodes.get(idx)?;
        if !visited.insert(node.r#ref.clone()) {
            return None;
        }
        if node.is_hittable() {
            return Some(node);
        }
        cursor = node.parent_index;
    }
    None
}

/// Returns the first meaningful of `label/value/identifier` for `node`; if
/// none is meaningful, falls back to the meaningful text of the spatially
/// nearest node (by absolute center-Y distance) that has a rectangle.
pub fn resolve_ref_label(node: &Node, nodes: &[Node]) -> Option<String> {
    if let Some(text) = meaningful_text(&node.label, &node.value, &node.identifier) {
        return Some(text.to_string());
    }

    let node_rect = node.rect?;
    let node_center_y = node_rect.center_y();

    let nearest = nodes
        .iter()
        .filter(|candidate| candidate.r#ref != node.r#ref)
        .filter_map(|candidate| candidate.rect.map(|r| (candidate, r)))
        .min_by(|(_, a), (_, b)| {
            let da = (a.center_y() - node_center_y).abs();
            let db = (b.center_y() - node_center_y).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })?;

    meaningful_text(&nearest.0.label, &nearest.0.value, &nearest.0.identifier)
        .map(|s| s.to_string())
}

/// Extracts the "first meaningful text field" for a node: label, then value,
/// then identifier. Used by selector `text` matching.
pub fn extract_node_text(node: &Node) -> Option<&str> {
    meaningful_text(&node.label, &node.value, &node.identifier)
}

pub fn is_meaningful_str(value: &str) -> bool {
    is_meaningful(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Rect;

    fn raw(
        node_type: &str,
        parent_index: Option<usize>,
        depth: usize,
        label: Option<&str>,
    ) -> RawNode {
        RawNode {
            index: None,
            parent_index,
            depth: Some(depth),
            node_type: node_type.to_string(),
            label: label.map(|s| s.to_string()),
            value: None,
            identifier: None,
            rect: None,
            enabled: None,
            selected: None,
            hittable: None,
        }
    }

    #[test]
    fn normalizes_platform_prefixes_and_separators() {
        assert_eq!(normalize_type("XCUIElementTypeTextField"), "textfield");
        assert_eq!(normalize_type("android.widget.Button"), "button");
        assert_eq!(normalize_type("some/path/Label"), "label");
    }

    #[test]
    fn fillable_types_are_platform_specific() {
        assert!(is_fillable_type("XCUIElementTypeTextField", Platform::Ios));
        assert!(is_fillable_type(
            "android.widget.EditText",
            Platform::Android
        ));
        assert!(!is_fillable_type("XCUIElementTypeButton", Platform::Ios));
        assert!(!is_fillable_type(
            "android.widget.Button",
            Platform::Android
        ));
    }

    #[test]
    fn prune_drops_empty_group_wrappers_and_rebalances_depth() {
        // window(0) -> group(1, empty) -> button(2, label="Go")
        let nodes = vec![
            raw("window", None, 0, None),
            raw("group", Some(0), 1, None),
            raw("button", Some(1), 2, Some("Go")),
        ];

        let pruned = prune_group_nodes(&nodes);
        assert_eq!(pruned.len(), 2);
        assert_eq!(pruned[0].node_type, "window");
        assert_eq!(pruned[1].node_type, "button");
        assert_eq!(pruned[1].parent_index, Some(0));
        assert_eq!(pruned[1].depth, Some(1));
    }

    #[test]
    fn prune_keeps_group_with_meaningful_text() {
        let nodes = vec![
            raw("window", None, 0, None),
            raw("group", Some(0), 1, Some("Toolbar")),
            raw("button", Some(1), 2, Some("Go")),
        ];

        let pruned = prune_group_nodes(&nodes);
        assert_eq!(pruned.len(), 3);
        assert_eq!(pruned[1].node_type, "group");
    }

    #[test]
    fn prune_preserves_relative_order_of_kept_nodes() {
        let nodes = vec![
            raw("window", None, 0, None),
            raw("group", Some(0), 1, None),
            raw("button", Some(1), 2, Some("First")),
            raw("group", Some(0), 1, None),
            raw("button", Some(3), 2, Some("Second")),
        ];

        let pruned = prune_group_nodes(&nodes);
        let labels: Vec<_> = pruned.iter().map(|n| n.label.clone()).collect();
        assert_eq!(
            labels,
            vec![None, Some("First".to_string()), Some("Second".to_string())]
        );
    }

    #[test]
    fn attach_refs_assigns_unique_sequential_refs() {
        let nodes = vec![
            raw("window", None, 0, None),
            raw("button", Some(0), 1, Some("Go")),
            raw("button", Some(0), 1, Some("Cancel")),
        ];
        let attached = attach_refs(&nodes);
        let refs: Vec<_> = attached.iter().map(|n| n.r#ref.clone()).collect();
        assert_eq!(refs, vec!["e1", "e2", "e3"]);

        let unique: HashSet<_> = refs.iter().collect();
        assert_eq!(unique.len(), refs.len());
    }

    #[test]
    fn nearest_hittable_ancestor_walks_up_and_stops_at_root() {
        let mut nodes = attach_refs(&[
            raw("window", None, 0, None),
            raw("group", Some(0), 1, None),
            raw("button", Some(1), 2, None),
        ]);
        nodes[0].hittable = Some(true);
        let start = nodes[2].clone();

        let ancestor = find_nearest_hittable_ancestor(&nodes, &start).unwrap();
        assert_eq!(ancestor.r#ref, "e1");
    }

    #[test]
    fn nearest_hittable_ancestor_none_when_absent() {
        let nodes = attach_refs(&[
            raw("window", None, 0, None),
            raw("button", Some(0), 1, None),
        ]);
        let start = nodes[1].clone();
        assert!(find_nearest_hittable_ancestor(&nodes, &start).is_none());
    }

    #[test]
    fn resolve_ref_label_falls_back_to_nearest_rect_neighbor() {
        let mut nodes = attach_refs(&[
            raw("label", None, 0, Some("Amount")),
            raw("textfield", None, 0, None),
        ]);
        nodes[0].rect = Some(Rect {
            x: 0.0,
            y: 10.0,
            width: 50.0,
            height: 20.0,
        });
        nodes[1].rect = Some(Rect {
            x: 60.0,
            y: 12.0,
            width: 50.0,
            height: 20.0,
        });

        let resolved = resolve_ref_label(&nodes[1], &nodes);
        assert_eq!(resolved.as_deref(), Some("Amount"));
    }

    #[test]
    fn resolve_ref_label_none_without_rect_or_neighbor() {
        let nodes = attach_refs(&[raw("textfield", None, 0, None)]);
        assert!(resolve_ref_label(&nodes[0], &nodes).is_none());
    }
}
