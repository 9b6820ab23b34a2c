pub mod attach;
pub mod diff;
pub mod node;

pub use attach::{
    attach_refs, extract_node_text, find_nearest_hittable_ancestor, is_fillable_type,
    is_meaningful_str, normalize_type, prune_group_nodes, resolve_ref_label,
};
pub use diff::{
    comparable_string, diff_snapshots, diff_strings, DiffKind, DiffLine, DiffSummary,
    SnapshotDiff, LINEAR_FALLBACK_THRESHOLD,
};
pub use node::{is_meaningful, meaningful_text, Backend, Node, Platform, RawNode, Rect, Snapshot};
