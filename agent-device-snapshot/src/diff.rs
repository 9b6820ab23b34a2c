use serde::{Deserialize, Serialize};

use crate::attach::normalize_type;
use crate::node::{Node, Snapshot};

/// Above this combined node count, `diff_snapshots` falls back to a linear
/// prefix/suffix diff instead of running Myers' algorithm.
pub const LINEAR_FALLBACK_THRESHOLD: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: DiffKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub additions: usize,
    pub removals: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub lines: Vec<DiffLine>,
    pub summary: DiffSummary,
}

/// Canonical comparable string for a node: semantic identity only. Rects and
/// refs are deliberately excluded.
pub fn comparable_string(node: &Node) -> String {
    let mut s = String::new();
    s.push_str(&"  ".repeat(node.depth));
    s.push_str(&normalize_type(&node.node_type));

    let mut push_field = |key: &str, value: &Option<String>| {
        if let Some(v) = value {
            if !v.trim().is_empty() {
                s.push(' ');
                s.push_str(key);
                s.push_str("=\"");
                s.push_str(v);
                s.push('"');
            }
        }
    };
    push_field("label", &node.label);
    push_field("value", &node.value);
    push_field("id", &node.identifier);

    if node.enabled == Some(false) {
        s.push_str(" disabled");
    }
    if node.selected == Some(true) {
        s.push_str(" selected");
    }
    if node.hittable == Some(false) {
        s.push_str(" not-hittable");
    }

    s
}

/// Produces a unified add/remove/unchanged diff between two snapshots.
pub fn diff_snapshots(previous: Option<&Snapshot>, current: &Snapshot) -> SnapshotDiff {
    let prev_strings: Vec<String> = previous
        .map(|s| s.nodes.iter().map(comparable_string).collect())
        .unwrap_or_default();
    let curr_strings: Vec<String> = current.nodes.iter().map(comparable_string).collect();

    diff_strings(&prev_strings, &curr_strings)
}

/// Diffs two line lists directly; exposed for testing against the spec's
/// comparable-string-level scenarios without constructing full snapshots.
pub fn diff_strings(prev: &[String], curr: &[String]) -> SnapshotDiff {
    let lines = if prev.len() + curr.len() > LINEAR_FALLBACK_THRESHOLD {
        linear_diff(prev, curr)
    } else {
        myers_diff(prev, curr)
    };

    let mut summary = DiffSummary::default();
    for line in &lines {
        match line.kind {
            DiffKind::Added => summary.additions += 1,
            DiffKind::Removed => summary.removals += 1,
            DiffKind::Unchanged => summary.unchanged += 1,
        }
    }

    SnapshotDiff { lines, summary }
}

/// Shared-prefix / shared-suffix diff used when the combined node count
/// exceeds `LINEAR_FALLBACK_THRESHOLD`. Linear time and space.
fn linear_diff(prev: &[String], curr: &[String]) -> Vec<DiffLine> {
    let mut prefix = 0usize;
    while prefix < prev.len() && prefix < curr.len() && prev[prefix] == curr[prefix] {
        prefix += 1;
    }

    let mut suffix = 0usize;
    while suffix < prev.len() - prefix
        && suffix < curr.len() - prefix
        && prev[prev.len() - 1 - suffix] == curr[curr.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let mut lines = Vec::with_capacity(prev.len() + curr.len());
    for line in &curr[..prefix] {
        lines.push(DiffLine {
            kind: DiffKind::Unchanged,
            text: line.clone(),
        });
    }
    for line in &prev[prefix..prev.len() - suffix] {
        lines.push(DiffLine {
            kind: DiffKind::Removed,
            text: line.clone(),
        });
    }
    for line in &curr[prefix..curr.len() - suffix] {
        lines.push(DiffLine {
            kind: DiffKind::Added,
            text: line.clone(),
        });
    }
    for line in &curr[curr.len() - suffix..] {
        lines.push(DiffLine {
            kind: DiffKind::Unchanged,
            text: line.clone(),
        });
    }

    lines
}

/// Myers' O((N+M)D) shortest-edit-script diff with full backtrack.
fn myers_diff(prev: &[String], curr: &[String]) -> Vec<DiffLine> {
    let n = prev.len();
    let m = curr.len();
    let trace = myers_trace(prev, curr);

    let ops = backtrack(prev, curr, &trace, n, m);

    let mut lines = Vec::with_capacity(ops.len());
    for op in ops {
        match op {
            EditOp::Unchanged(curr_idx) => lines.push(DiffLine {
                kind: DiffKind::Unchanged,
                text: curr[curr_idx].clone(),
            }),
            EditOp::Removed(prev_idx) => lines.push(DiffLine {
                kind: DiffKind::Removed,
                text: prev[prev_idx].clone(),
            }),
            EditOp::Added(curr_idx) => lines.push(DiffLine {
                kind: DiffKind::Added,
                text: curr[curr_idx].clone(),
            }),
        }
    }

    lines
}

enum EditOp {
    Unchanged(usize),
    Removed(usize),
    Added(usize),
}

/// Forward pass: builds the per-D frontier snapshots needed for backtrack.
fn myers_trace(a: &[String], b: &[String]) -> Vec<Vec<isize>> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = (n + m).max(1);
    let offset = max as usize;
    let mut v = vec![0isize; 2 * max as usize + 1];
    let mut trace = Vec::new();

    let idx = |k: isize| -> usize { (k + offset as isize) as usize };

    for d in 0..=max {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
                v[idx(k + 1)]
            } else {
                v[idx(k - 1)] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx(k)] = x;
            if x >= n && y >= m {
                return trace;
            }
            k += 2;
        }
    }

    trace
}

/// Walks the recorded frontiers backward from `(n, m)` to `(0, 0)`, emitting
/// edit operations in reverse, then returns them in forward order.
fn backtrack(
    _a: &[String],
    _b: &[String],
    trace: &[Vec<isize>],
    n: usize,
    m: usize,
) -> Vec<EditOp> {
    let max = trace.last().map(|v| (v.len() - 1) / 2).unwrap_or(0) as isize;
    let offset = max as usize;
    let idx = |k: isize| -> usize { (k + offset as isize) as usize };

    let mut x = n as isize;
    let mut y = m as isize;
    let mut ops_reversed = Vec::new();

    for d in (0..trace.len()).rev() {
        let d = d as isize;
        let v = &trace[d as usize];
        let k = x - y;

        let prev_k = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[idx(prev_k)];
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            ops_reversed.push(EditOp::Unchanged((y - 1) as usize));
            x -= 1;
            y -= 1;
        }

        if d > 0 {
            if x == prev_x {
                ops_reversed.push(EditOp::Added((y - 1) as usize));
            } else {
                ops_reversed.push(EditOp::Removed((x - 1) as usize));
            }
        }

        x = prev_x;
        y = prev_y;
    }

    ops_reversed.reverse();
    ops_reversed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn text_value_change_yields_single_add_and_remove() {
        let prev = lines(&["window", "textfield label=\"Amount\" value=\"67\""]);
        let curr = lines(&["window", "textfield label=\"Amount\" value=\"134\""]);

        let diff = diff_strings(&prev, &curr);
        assert_eq!(diff.summary.additions, 1);
        assert_eq!(diff.summary.removals, 1);
        assert_eq!(diff.summary.unchanged, 1);

        let kinds: Vec<_> = diff.lines.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![DiffKind::Unchanged, DiffKind::Removed, DiffKind::Added]
        );
        assert_eq!(diff.lines[0].text, "window");
        assert!(diff.lines[1].text.contains("67"));
        assert!(diff.lines[2].text.contains("134"));
    }

    #[test]
    fn identical_snapshots_are_entirely_unchanged() {
        let lines_vec = lines(&["window", "button label=\"Go\""]);
        let diff = diff_strings(&lines_vec, &lines_vec);
        assert_eq!(diff.summary.additions, 0);
        assert_eq!(diff.summary.removals, 0);
        assert_eq!(diff.summary.unchanged, 2);
    }

    #[test]
    fn empty_previous_is_all_additions() {
        let curr = lines(&["window", "button label=\"Go\""]);
        let diff = diff_strings(&[], &curr);
        assert_eq!(diff.summary.additions, 2);
        assert_eq!(diff.summary.removals, 0);
        assert_eq!(diff.summary.unchanged, 0);
    }

    #[test]
    fn empty_current_is_all_removals() {
        let prev = lines(&["window", "button label=\"Go\""]);
        let diff = diff_strings(&prev, &[]);
        assert_eq!(diff.summary.additions, 0);
        assert_eq!(diff.summary.removals, 2);
        assert_eq!(diff.summary.unchanged, 0);
    }

    #[test]
    fn both_empty_is_a_no_op_diff() {
        let diff = diff_strings(&[], &[]);
        assert!(diff.lines.is_empty());
        assert_eq!(diff.summary.additions, 0);
        assert_eq!(diff.summary.removals, 0);
        assert_eq!(diff.summary.unchanged, 0);
    }

    #[test]
    fn large_trees_use_the_linear_fallback_and_stay_consistent() {
        let mut prev = Vec::new();
        let mut curr = Vec::new();
        for i in 0..2100 {
            prev.push(format!("cell value=\"{i}\""));
            curr.push(format!("cell value=\"{i}\""));
        }
        // Perturb a single middle element so the fallback has real work to do.
        curr[1000] = "cell value=\"changed\"".to_string();

        assert!(prev.len() + curr.len() > LINEAR_FALLBACK_THRESHOLD);
        let diff = diff_strings(&prev, &curr);
        assert_eq!(diff.summary.additions, 1);
        assert_eq!(diff.summary.removals, 1);
        assert_eq!(diff.summary.unchanged, prev.len() - 1);
    }

    #[test]
    fn diff_is_closed_over_inputs() {
        // Every removed line came from prev and every added line from curr;
        // unchanged + removed reconstructs prev, unchanged + added reconstructs curr.
        let prev = lines(&["a", "b", "c"]);
        let curr = lines(&["a", "x", "c"]);
        let diff = diff_strings(&prev, &curr);

        let reconstructed_prev: Vec<_> = diff
            .lines
            .iter()
            .filter(|l| l.kind != DiffKind::Added)
            .map(|l| l.text.clone())
            .collect();
        let reconstructed_curr: Vec<_> = diff
            .lines
            .iter()
            .filter(|l| l.kind != DiffKind::Removed)
            .map(|l| l.text.clone())
            .collect();

        assert_eq!(reconstructed_prev, prev);
        assert_eq!(reconstructed_curr, curr);
    }
}
