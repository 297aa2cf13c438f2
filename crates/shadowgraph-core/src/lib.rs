use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub mod constraint;
pub mod drift;
pub mod hash;
pub mod merge;
pub mod traversal;
pub mod wire;

pub use constraint::{
    ConstraintKind, ConstraintPayload, ConstraintSummary, Severity, ValidationConfig, Violation,
    ViolationReason,
};
pub use drift::{DriftChange, DriftReport, ExtractedSymbol, Transition};
pub use hash::{content_digest, fingerprint, sha256_hex};
pub use merge::{last_write_wins, merge_anchor, MergeOutcome};
pub use traversal::{
    explore, partition_radius, Adjacency, Direction, EdgeIndex, Radius, Reached,
    MAX_BLAST_RADIUS_DEPTH,
};
pub use wire::{
    detect_conflicts, AnchorRecord, Conflict, EdgeRecord, NodeRecord, RecordKey, WireRecord,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum GraphError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("ambiguous merge for {key}: equal created_at and sync_id but different payloads")]
    AmbiguousMerge { key: String },
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Id of the code block bound to `symbol` inside `file_path`.
    #[must_use]
    pub fn code(file_path: &str, symbol: &SymbolKey) -> Self {
        Self(format!("code:{file_path}:{symbol}"))
    }

    #[must_use]
    pub fn folder(path: &str) -> Self {
        Self(format!("folder:{path}"))
    }

    #[must_use]
    pub fn new_thought() -> Self {
        Self(format!("thought:{}", Ulid::new()))
    }

    #[must_use]
    pub fn new_constraint() -> Self {
        Self(format!("constraint:{}", Ulid::new()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    CodeBlock,
    Thought,
    Requirement,
    Constraint,
    Folder,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeBlock => "CODE_BLOCK",
            Self::Thought => "THOUGHT",
            Self::Requirement => "REQUIREMENT",
            Self::Constraint => "CONSTRAINT",
            Self::Folder => "FOLDER",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CODE_BLOCK" => Some(Self::CodeBlock),
            "THOUGHT" => Some(Self::Thought),
            "REQUIREMENT" => Some(Self::Requirement),
            "CONSTRAINT" => Some(Self::Constraint),
            "FOLDER" => Some(Self::Folder),
            _ => None,
        }
    }
}

impl FromStr for NodeKind {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
            .ok_or_else(|| GraphError::IntegrityViolation(format!("unknown node kind: {value}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    HasThought,
    DependsOn,
    RequiredBy,
    Impacts,
}

impl Relation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HasThought => "HAS_THOUGHT",
            Self::DependsOn => "DEPENDS_ON",
            Self::RequiredBy => "REQUIRED_BY",
            Self::Impacts => "IMPACTS",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HAS_THOUGHT" => Some(Self::HasThought),
            "DEPENDS_ON" => Some(Self::DependsOn),
            "REQUIRED_BY" => Some(Self::RequiredBy),
            "IMPACTS" => Some(Self::Impacts),
            _ => None,
        }
    }
}

impl FromStr for Relation {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
            .ok_or_else(|| GraphError::IntegrityViolation(format!("unknown relation: {value}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorStatus {
    Valid,
    Stale,
}

impl AnchorStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Stale => "STALE",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "VALID" => Some(Self::Valid),
            "STALE" => Some(Self::Stale),
            _ => None,
        }
    }
}

impl FromStr for AnchorStatus {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| {
            GraphError::IntegrityViolation(format!("unknown anchor status: {value}"))
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Interface,
    Module,
}

impl SymbolKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Interface => "interface",
            Self::Module => "module",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "function" => Some(Self::Function),
            "class" => Some(Self::Class),
            "method" => Some(Self::Method),
            "interface" => Some(Self::Interface),
            "module" => Some(Self::Module),
            _ => None,
        }
    }
}

/// Structured form of a `kind:name` symbol such as `function:charge`.
///
/// The kind prefix keeps a function and a class with the same bare name from
/// colliding on one anchor. The string form only appears at the storage and
/// wire boundaries.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct SymbolKey {
    pub kind: SymbolKind,
    pub name: String,
}

impl SymbolKey {
    /// Build a key from its parts.
    ///
    /// # Errors
    /// Returns [`GraphError::Validation`] when the bare name is empty or
    /// contains whitespace or `:`.
    pub fn new(kind: SymbolKind, name: impl Into<String>) -> Result<Self, GraphError> {
        let name = name.into();
        if name.is_empty() || name.chars().any(|ch| ch.is_whitespace() || ch == ':') {
            return Err(GraphError::Validation(format!(
                "symbol name MUST be a non-empty identifier without ':', got {name:?}"
            )));
        }
        Ok(Self { kind, name })
    }
}

impl Display for SymbolKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.name)
    }
}

impl FromStr for SymbolKey {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((kind_raw, name)) = value.split_once(':') else {
            return Err(GraphError::Validation(format!(
                "symbol {value:?} MUST carry a kind prefix such as function: or class:"
            )));
        };
        let kind = SymbolKind::parse(kind_raw).ok_or_else(|| {
            GraphError::IntegrityViolation(format!("unknown symbol kind: {kind_raw}"))
        })?;
        Self::new(kind, name)
    }
}

impl TryFrom<String> for SymbolKey {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SymbolKey> for String {
    fn from(value: SymbolKey) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub content: String,
    pub path: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Input for a node write. `created_at` only applies when the node is new.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NodeDraft {
    pub id: NodeId,
    pub kind: NodeKind,
    pub content: String,
    pub path: Option<String>,
    pub created_at: Option<OffsetDateTime>,
}

impl NodeDraft {
    #[must_use]
    pub fn new(id: NodeId, kind: NodeKind, content: impl Into<String>) -> Self {
        Self { id, kind, content: content.into(), path: None, created_at: None }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Anchor {
    pub node_id: NodeId,
    pub file_path: String,
    pub symbol: SymbolKey,
    pub content_hash: String,
    pub previous_hash: Option<String>,
    pub start_line: u32,
    pub status: AnchorStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Edge {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub relation: Relation,
}

impl Edge {
    #[must_use]
    pub fn new(source_id: NodeId, target_id: NodeId, relation: Relation) -> Self {
        Self { source_id, target_id, relation }
    }
}

/// Format a timestamp the way it is stored and serialized.
///
/// # Errors
/// Returns [`GraphError::IntegrityViolation`] when the value has no RFC3339 form.
pub fn format_timestamp(value: OffsetDateTime) -> Result<String, GraphError> {
    value.format(&time::format_description::well_known::Rfc3339).map_err(|err| {
        GraphError::IntegrityViolation(format!("timestamp is not RFC3339-representable: {err}"))
    })
}

/// Parse a stored RFC3339 timestamp.
///
/// # Errors
/// Returns [`GraphError::IntegrityViolation`] when `value` is not RFC3339.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, GraphError> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339).map_err(|err| {
        GraphError::IntegrityViolation(format!("invalid RFC3339 timestamp {value:?}: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_key_round_trips_through_string_form() -> Result<(), GraphError> {
        let key: SymbolKey = "function:charge".parse()?;
        assert_eq!(key.kind, SymbolKind::Function);
        assert_eq!(key.name, "charge");
        assert_eq!(key.to_string(), "function:charge");
        Ok(())
    }

    #[test]
    fn same_bare_name_with_different_kinds_is_distinct() -> Result<(), GraphError> {
        let function: SymbolKey = "function:Auth".parse()?;
        let class: SymbolKey = "class:Auth".parse()?;
        assert_ne!(function, class);
        assert_ne!(NodeId::code("auth.py", &function), NodeId::code("auth.py", &class));
        Ok(())
    }

    #[test]
    fn symbol_key_rejects_missing_prefix_and_unknown_kind() {
        assert!(matches!("charge".parse::<SymbolKey>(), Err(GraphError::Validation(_))));
        assert!(matches!(
            "lambda:charge".parse::<SymbolKey>(),
            Err(GraphError::IntegrityViolation(_))
        ));
        assert!(matches!("function:".parse::<SymbolKey>(), Err(GraphError::Validation(_))));
    }

    #[test]
    fn symbol_name_with_a_colon_is_rejected() {
        assert!(matches!(
            "function:function:b".parse::<SymbolKey>(),
            Err(GraphError::Validation(_))
        ));
        assert!(matches!(SymbolKey::new(SymbolKind::Class, "a:b"), Err(GraphError::Validation(_))));
        assert!(serde_json::from_str::<SymbolKey>(r#""method:Auth:login""#).is_err());
        assert!("method:Auth.login".parse::<SymbolKey>().is_ok());
    }

    #[test]
    fn symbol_key_serializes_as_prefixed_string() -> Result<(), serde_json::Error> {
        let key = SymbolKey { kind: SymbolKind::Class, name: "AuthService".to_string() };
        assert_eq!(serde_json::to_string(&key)?, "\"class:AuthService\"");
        let parsed: SymbolKey = serde_json::from_str("\"method:AuthService.login\"")?;
        assert_eq!(parsed.kind, SymbolKind::Method);
        Ok(())
    }

    #[test]
    fn enums_use_wire_spelling() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&NodeKind::CodeBlock)?, "\"CODE_BLOCK\"");
        assert_eq!(serde_json::to_string(&Relation::DependsOn)?, "\"DEPENDS_ON\"");
        assert_eq!(serde_json::to_string(&AnchorStatus::Stale)?, "\"STALE\"");
        for kind in [
            NodeKind::CodeBlock,
            NodeKind::Thought,
            NodeKind::Requirement,
            NodeKind::Constraint,
            NodeKind::Folder,
        ] {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        assert!(matches!("EDGE".parse::<NodeKind>(), Err(GraphError::IntegrityViolation(_))));
        assert!(matches!("CALLS".parse::<Relation>(), Err(GraphError::IntegrityViolation(_))));
        Ok(())
    }

    #[test]
    fn timestamps_format_stably() -> Result<(), GraphError> {
        let parsed = parse_timestamp("2024-05-01T10:00:00.000Z")?;
        let formatted = format_timestamp(parsed)?;
        assert_eq!(formatted, "2024-05-01T10:00:00Z");
        assert_eq!(format_timestamp(parse_timestamp(&formatted)?)?, formatted);
        Ok(())
    }
}
