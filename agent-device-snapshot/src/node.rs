use serde::{Deserialize, Serialize};

/// The backend that produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Xctest,
    Android,
}

/// The platform a device belongs to. Lives here (rather than in a higher-level
/// crate) because matching semantics in this crate and in the selector engine
/// are parameterized by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

/// A finite, non-negative rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }
}

/// One node as handed to the daemon by a platform adapter, before ref
/// attachment or pruning. Backends emit these in preorder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNode {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub parent_index: Option<usize>,
    #[serde(default)]
    pub depth: Option<usize>,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub selected: Option<bool>,
    #[serde(default)]
    pub hittable: Option<bool>,
}

/// A node after ref attachment: the unit the selector engine and handlers
/// operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub index: usize,
    pub parent_index: Option<usize>,
    pub depth: usize,
    pub r#ref: String,
    pub node_type: String,
    pub label: Option<String>,
    pub value: Option<String>,
    pub identifier: Option<String>,
    pub rect: Option<Rect>,
    pub enabled: Option<bool>,
    pub selected: Option<bool>,
    pub hittable: Option<bool>,
}

impl Node {
    /// External form of this node's ref, e.g. `@e3`.
    pub fn external_ref(&self) -> String {
        format!("@{}", self.r#ref)
    }

    /// True iff `hittable` is explicitly true, or a rectangle with positive
    /// area is present.
    pub fn is_visible(&self) -> bool {
        self.hittable == Some(true) || self.rect.map(|r| r.area() > 0.0).unwrap_or(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    pub fn is_selected(&self) -> bool {
        self.selected == Some(true)
    }

    pub fn is_hittable(&self) -> bool {
        self.hittable == Some(true)
    }
}

/// A frozen, normalized accessibility tree for the foreground UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub truncated: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub backend: Backend,
}

impl Snapshot {
    /// Looks up a node by its short ref token (e.g. `"e3"`, with or without
    /// the leading `@`).
    pub fn find_by_ref(&self, r#ref: &str) -> Option<&Node> {
        let key = r#ref.strip_prefix('@').unwrap_or(r#ref);
        self.nodes.iter().find(|n| n.r#ref == key)
    }
}

/// Returns true for strings that carry no useful display information: empty,
/// purely numeric, or a boolean literal.
pub fn is_meaningful(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.parse::<f64>().is_ok() {
        return false;
    }
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return false;
    }
    true
}

/// Returns the first meaningful value among label, value, identifier — the
/// "first meaningful text field" used throughout the spec.
pub fn meaningful_text<'a>(
    label: &'a Option<String>,
    value: &'a Option<String>,
    identifier: &'a Option<String>,
) -> Option<&'a str> {
    for candidate in [label, value, identifier] {
        if let Some(s) = candidate {
            if is_meaningful(s) {
                return Some(s.as_str());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_numeric_and_boolean_strings() {
        assert!(!is_meaningful(""));
        assert!(!is_meaningful("   "));
        assert!(!is_meaningful("42"));
        assert!(!is_meaningful("-3.5"));
        assert!(!is_meaningful("true"));
        assert!(!is_meaningful("FALSE"));
    }

    #[test]
    fn accepts_ordinary_text() {
        assert!(is_meaningful("Amount"));
        assert!(is_meaningful("Submit"));
    }

    #[test]
    fn meaningful_text_prefers_label_then_value_then_identifier() {
        let label = Some("Amount".to_string());
        let value = Some("67".to_string());
        let identifier = Some("amount_field".to_string());
        assert_eq!(meaningful_text(&label, &value, &identifier), Some("Amount"));

        let no_label = None;
        assert_eq!(
            meaningful_text(&no_label, &value, &identifier),
            Some("amount_field")
        );

        let no_label = None;
        let no_value = None;
        assert_eq!(meaningful_text(&no_label, &no_value, &identifier), Some("amount_field"));
    }

    #[test]
    fn rect_center_y_and_area() {
        let rect = Rect {
            x: 0.0,
            y: 10.0,
            width: 20.0,
            height: 30.0,
        };
        assert_eq!(rect.center_y(), 25.0);
        assert_eq!(rect.area(), 600.0);
        assert!(rect.is_valid());
    }

    #[test]
    fn node_visibility_and_enablement() {
        let node = Node {
            index: 0,
            parent_index: None,
            depth: 0,
            r#ref: "e1".to_string(),
            node_type: "Button".to_string(),
            label: Some("Go".to_string()),
            value: None,
            identifier: None,
            rect: None,
            enabled: Some(false),
            selected: None,
            hittable: None,
        };
        assert!(!node.is_enabled());
        assert!(!node.is_visible());
        assert_eq!(node.external_ref(), "@e1");
    }
}
