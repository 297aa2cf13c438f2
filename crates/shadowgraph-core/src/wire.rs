//! Line-oriented sync format.
//!
//! One JSON object per line, three shapes told apart by their key fields:
//! node (`id`), anchor (`symbol_name`) and edge (`source_id`). Every record
//! carries a `sync_id` derived from its fields, which doubles as the
//! deterministic merge tie-break.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::hash::fingerprint;
use crate::{
    format_timestamp, Anchor, AnchorStatus, Edge, GraphError, Node, NodeId, NodeKind, Relation,
    SymbolKey,
};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub kind: NodeKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub sync_id: String,
}

impl NodeRecord {
    /// # Errors
    /// Returns [`GraphError::IntegrityViolation`] when `created_at` cannot be formatted.
    pub fn from_node(node: &Node) -> Result<Self, GraphError> {
        let sync_id = Self::compute_sync_id(
            &node.id,
            node.kind,
            &node.content,
            node.path.as_deref(),
            node.created_at,
        )?;
        Ok(Self {
            id: node.id.clone(),
            kind: node.kind,
            content: node.content.clone(),
            path: node.path.clone(),
            created_at: node.created_at,
            sync_id,
        })
    }

    /// # Errors
    /// Returns [`GraphError::IntegrityViolation`] when `created_at` cannot be formatted.
    pub fn compute_sync_id(
        id: &NodeId,
        kind: NodeKind,
        content: &str,
        path: Option<&str>,
        created_at: OffsetDateTime,
    ) -> Result<String, GraphError> {
        let created_at = format_timestamp(created_at)?;
        Ok(fingerprint(&[
            id.as_str(),
            kind.as_str(),
            content,
            path.unwrap_or(""),
            &created_at,
        ]))
    }

    #[must_use]
    pub fn same_payload(&self, other: &Self) -> bool {
        self.kind == other.kind && self.content == other.content && self.path == other.path
    }

    #[must_use]
    pub fn into_node(self) -> Node {
        Node {
            id: self.id,
            kind: self.kind,
            content: self.content,
            path: self.path,
            created_at: self.created_at,
        }
    }

    fn verify(&self) -> Result<(), String> {
        let expected = Self::compute_sync_id(
            &self.id,
            self.kind,
            &self.content,
            self.path.as_deref(),
            self.created_at,
        )
        .map_err(|err| err.to_string())?;
        check_sync_id(&expected, &self.sync_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AnchorRecord {
    pub node_id: NodeId,
    pub file_path: String,
    pub symbol_name: SymbolKey,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    pub start_line: u32,
    pub status: AnchorStatus,
    pub sync_id: String,
}

impl AnchorRecord {
    #[must_use]
    pub fn from_anchor(anchor: &Anchor) -> Self {
        Self {
            node_id: anchor.node_id.clone(),
            file_path: anchor.file_path.clone(),
            symbol_name: anchor.symbol.clone(),
            content_hash: anchor.content_hash.clone(),
            previous_hash: anchor.previous_hash.clone(),
            start_line: anchor.start_line,
            status: anchor.status,
            sync_id: Self::compute_sync_id(anchor),
        }
    }

    #[must_use]
    pub fn compute_sync_id(anchor: &Anchor) -> String {
        let symbol = anchor.symbol.to_string();
        fingerprint(&[
            anchor.node_id.as_str(),
            &anchor.file_path,
            &symbol,
            &anchor.content_hash,
            anchor.status.as_str(),
        ])
    }

    #[must_use]
    pub fn to_anchor(&self) -> Anchor {
        Anchor {
            node_id: self.node_id.clone(),
            file_path: self.file_path.clone(),
            symbol: self.symbol_name.clone(),
            content_hash: self.content_hash.clone(),
            previous_hash: self.previous_hash.clone(),
            start_line: self.start_line,
            status: self.status,
        }
    }

    fn verify(&self) -> Result<(), String> {
        check_sync_id(&Self::compute_sync_id(&self.to_anchor()), &self.sync_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EdgeRecord {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub relation: Relation,
    pub sync_id: String,
}

impl EdgeRecord {
    #[must_use]
    pub fn from_edge(edge: &Edge) -> Self {
        Self {
            source_id: edge.source_id.clone(),
            target_id: edge.target_id.clone(),
            relation: edge.relation,
            sync_id: Self::compute_sync_id(edge),
        }
    }

    #[must_use]
    pub fn compute_sync_id(edge: &Edge) -> String {
        fingerprint(&[edge.source_id.as_str(), edge.target_id.as_str(), edge.relation.as_str()])
    }

    #[must_use]
    pub fn to_edge(&self) -> Edge {
        Edge::new(self.source_id.clone(), self.target_id.clone(), self.relation)
    }

    fn verify(&self) -> Result<(), String> {
        check_sync_id(&Self::compute_sync_id(&self.to_edge()), &self.sync_id)
    }
}

fn check_sync_id(expected: &str, actual: &str) -> Result<(), String> {
    if expected == actual {
        Ok(())
    } else {
        Err(format!("sync_id {actual} does not match record fields (expected {expected})"))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecordKey {
    Node(NodeId),
    Anchor { file_path: String, symbol: SymbolKey },
    Edge(Edge),
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {id}"),
            Self::Anchor { file_path, symbol } => write!(f, "anchor {file_path}#{symbol}"),
            Self::Edge(edge) => write!(
                f,
                "edge {} -[{}]-> {}",
                edge.source_id,
                edge.relation.as_str(),
                edge.target_id
            ),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WireRecord {
    Node(NodeRecord),
    Anchor(AnchorRecord),
    Edge(EdgeRecord),
}

impl WireRecord {
    /// Parse one serialized line. `line` is the 1-based line number used in errors.
    ///
    /// # Errors
    /// Returns [`GraphError::Parse`] for malformed JSON, an unknown shape, invalid
    /// field values, or a `sync_id` that does not match the record.
    pub fn parse_line(line: usize, raw: &str) -> Result<Self, GraphError> {
        let parse_err = |message: String| GraphError::Parse { line, message };

        let value: Value =
            serde_json::from_str(raw).map_err(|err| parse_err(format!("invalid JSON: {err}")))?;
        let Some(object) = value.as_object() else {
            return Err(parse_err("record MUST be a JSON object".to_string()));
        };
        let is_edge = object.contains_key("source_id");
        let is_anchor = object.contains_key("symbol_name");
        let is_node = object.contains_key("id");

        let decoded = if is_edge {
            serde_json::from_value(value).map(Self::Edge)
        } else if is_anchor {
            serde_json::from_value(value).map(Self::Anchor)
        } else if is_node {
            serde_json::from_value(value).map(Self::Node)
        } else {
            return Err(parse_err("unrecognized record shape".to_string()));
        };
        let record = decoded.map_err(|err| parse_err(format!("invalid record: {err}")))?;

        let verified = match &record {
            Self::Node(node) => node.verify(),
            Self::Anchor(anchor) => anchor.verify(),
            Self::Edge(edge) => edge.verify(),
        };
        verified.map_err(parse_err)?;
        Ok(record)
    }

    /// Render as a single line without the trailing newline.
    ///
    /// # Errors
    /// Returns [`GraphError::IntegrityViolation`] when JSON encoding fails.
    pub fn to_line(&self) -> Result<String, GraphError> {
        let encoded = match self {
            Self::Node(node) => serde_json::to_string(node),
            Self::Anchor(anchor) => serde_json::to_string(anchor),
            Self::Edge(edge) => serde_json::to_string(edge),
        };
        encoded.map_err(|err| GraphError::IntegrityViolation(format!("failed to encode: {err}")))
    }

    #[must_use]
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Node(node) => RecordKey::Node(node.id.clone()),
            Self::Anchor(anchor) => RecordKey::Anchor {
                file_path: anchor.file_path.clone(),
                symbol: anchor.symbol_name.clone(),
            },
            Self::Edge(edge) => RecordKey::Edge(edge.to_edge()),
        }
    }
}

/// Two or more lines of one sync file that disagree about the same key.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Conflict {
    pub key: String,
    pub lines: Vec<usize>,
    pub sync_ids: Vec<String>,
}

/// Find keys that appear with different sync ids inside one sync file.
///
/// Typical source is a text merge of two exports that kept both sides of a
/// node. Exact duplicate lines and edges are not conflicts; unparsable lines
/// are skipped here and reported by the importer.
#[must_use]
pub fn detect_conflicts(text: &str) -> Vec<Conflict> {
    let mut seen: BTreeMap<RecordKey, Vec<(usize, String)>> = BTreeMap::new();
    for (index, raw) in text.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let Ok(record) = WireRecord::parse_line(index + 1, raw) else {
            continue;
        };
        let sync_id = match &record {
            WireRecord::Node(node) => node.sync_id.clone(),
            WireRecord::Anchor(anchor) => anchor.sync_id.clone(),
            WireRecord::Edge(_) => continue,
        };
        seen.entry(record.key()).or_default().push((index + 1, sync_id));
    }

    seen.into_iter()
        .filter_map(|(key, occurrences)| {
            let mut sync_ids = occurrences.iter().map(|(_, id)| id.clone()).collect::<Vec<_>>();
            sync_ids.sort();
            sync_ids.dedup();
            (sync_ids.len() > 1).then(|| Conflict {
                key: key.to_string(),
                lines: occurrences.into_iter().map(|(line, _)| line).collect(),
                sync_ids,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_timestamp;

    fn fixture_node() -> Result<Node, GraphError> {
        Ok(Node {
            id: NodeId::new("thought:01"),
            kind: NodeKind::Thought,
            content: "remember the retry budget".to_string(),
            path: None,
            created_at: parse_timestamp("2024-05-01T10:00:00Z")?,
        })
    }

    #[test]
    fn node_record_line_has_stable_field_order() -> Result<(), GraphError> {
        let record = NodeRecord::from_node(&fixture_node()?)?;
        let line = WireRecord::Node(record.clone()).to_line()?;
        assert!(line.starts_with(
            r#"{"id":"thought:01","kind":"THOUGHT","content":"remember the retry budget","created_at":"2024-05-01T10:00:00Z","sync_id":""#
        ));
        assert_eq!(WireRecord::parse_line(1, &line)?, WireRecord::Node(record));
        Ok(())
    }

    #[test]
    fn shapes_are_detected_by_key_fields() -> Result<(), GraphError> {
        let edge = Edge::new(NodeId::new("a"), NodeId::new("b"), Relation::DependsOn);
        let line = WireRecord::Edge(EdgeRecord::from_edge(&edge)).to_line()?;
        assert!(matches!(WireRecord::parse_line(1, &line)?, WireRecord::Edge(_)));

        let anchor = Anchor {
            node_id: NodeId::new("code:a.py:function:foo"),
            file_path: "a.py".to_string(),
            symbol: "function:foo".parse()?,
            content_hash: "h1".to_string(),
            previous_hash: None,
            start_line: 4,
            status: AnchorStatus::Valid,
        };
        let line = WireRecord::Anchor(AnchorRecord::from_anchor(&anchor)).to_line()?;
        assert!(!line.contains("previous_hash"));
        let parsed = WireRecord::parse_line(1, &line)?;
        let WireRecord::Anchor(record) = parsed else {
            panic!("expected anchor record, got {parsed:?}");
        };
        assert_eq!(record.to_anchor(), anchor);
        Ok(())
    }

    #[test]
    fn malformed_lines_are_scoped_parse_errors() {
        for (raw, needle) in [
            ("{not json", "invalid JSON"),
            ("[1,2]", "JSON object"),
            (r#"{"foo":1}"#, "unrecognized"),
            (r#"{"source_id":"a","target_id":"b","relation":"CALLS","sync_id":"x"}"#, "invalid"),
        ] {
            match WireRecord::parse_line(7, raw) {
                Err(GraphError::Parse { line, message }) => {
                    assert_eq!(line, 7);
                    assert!(message.contains(needle), "{message} should mention {needle}");
                }
                other => panic!("expected parse error for {raw}, got {other:?}"),
            }
        }
    }

    #[test]
    fn tampered_content_fails_sync_id_check() -> Result<(), GraphError> {
        let mut record = NodeRecord::from_node(&fixture_node()?)?;
        record.content.push_str(" (edited)");
        let line = WireRecord::Node(record).to_line()?;
        assert!(matches!(
            WireRecord::parse_line(3, &line),
            Err(GraphError::Parse { line: 3, .. })
        ));
        Ok(())
    }

    #[test]
    fn conflicting_versions_of_a_node_are_reported() -> Result<(), GraphError> {
        let original = fixture_node()?;
        let mut edited = original.clone();
        edited.content = "remember the retry budget of 3".to_string();
        let edge = Edge::new(NodeId::new("a"), NodeId::new("b"), Relation::DependsOn);
        let edge_line = WireRecord::Edge(EdgeRecord::from_edge(&edge)).to_line()?;
        let text = [
            WireRecord::Node(NodeRecord::from_node(&original)?).to_line()?,
            edge_line.clone(),
            WireRecord::Node(NodeRecord::from_node(&edited)?).to_line()?,
            edge_line,
            WireRecord::Node(NodeRecord::from_node(&original)?).to_line()?,
            "{garbage".to_string(),
        ]
        .join("\n");

        let conflicts = detect_conflicts(&text);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].key, "node thought:01");
        assert_eq!(conflicts[0].lines, vec![1, 3, 5]);
        assert_eq!(conflicts[0].sync_ids.len(), 2);
        Ok(())
    }

    #[test]
    fn record_keys_render_readably() -> Result<(), GraphError> {
        let key = RecordKey::Anchor { file_path: "a.py".to_string(), symbol: "class:A".parse()? };
        assert_eq!(key.to_string(), "anchor a.py#class:A");
        Ok(())
    }
}
