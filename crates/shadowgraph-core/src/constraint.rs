use serde::{Deserialize, Serialize};

use crate::{GraphError, NodeId, SymbolKey};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    Rule,
    Forbidden,
    RequiredPattern,
    RequiresEdge,
}

impl ConstraintKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rule => "RULE",
            Self::Forbidden => "FORBIDDEN",
            Self::RequiredPattern => "REQUIRED_PATTERN",
            Self::RequiresEdge => "REQUIRES_EDGE",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RULE" => Some(Self::Rule),
            "FORBIDDEN" => Some(Self::Forbidden),
            "REQUIRED_PATTERN" => Some(Self::RequiredPattern),
            "REQUIRES_EDGE" => Some(Self::RequiresEdge),
            _ => None,
        }
    }
}

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Body of a `CONSTRAINT` node, stored as JSON in the node content.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ConstraintPayload {
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    pub rule: String,
    pub severity: Severity,
    pub symbol_name: SymbolKey,
    pub file_path: String,
}

impl ConstraintPayload {
    /// Decode a constraint node's content.
    ///
    /// # Errors
    /// Returns [`GraphError::IntegrityViolation`] when the content is not a constraint payload.
    pub fn from_content(content: &str) -> Result<Self, GraphError> {
        serde_json::from_str(content).map_err(|err| {
            GraphError::IntegrityViolation(format!("constraint content is not valid: {err}"))
        })
    }

    /// Encode for storage as node content.
    ///
    /// # Errors
    /// Returns [`GraphError::IntegrityViolation`] when serialization fails.
    pub fn to_content(&self) -> Result<String, GraphError> {
        serde_json::to_string(self).map_err(|err| {
            GraphError::IntegrityViolation(format!("failed to encode constraint: {err}"))
        })
    }

    /// Text a `FORBIDDEN` rule bans: the first single-quoted span, or the
    /// rule's last word when nothing is quoted.
    #[must_use]
    pub fn forbidden_pattern(&self) -> Option<&str> {
        if self.kind != ConstraintKind::Forbidden {
            return None;
        }
        let pattern = self
            .rule
            .split('\'')
            .nth(1)
            .unwrap_or_else(|| self.rule.split_whitespace().last().unwrap_or_default())
            .trim();
        (!pattern.is_empty()).then_some(pattern)
    }

    /// Whether `code` contains the forbidden pattern, ignoring case.
    #[must_use]
    pub fn forbids(&self, code: &str) -> bool {
        self.forbidden_pattern()
            .is_some_and(|pattern| code.to_lowercase().contains(&pattern.to_lowercase()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ConstraintSummary {
    pub id: NodeId,
    #[serde(flatten)]
    pub payload: ConstraintPayload,
}

/// Why a constraint was reported.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationReason {
    /// The constrained symbol changed since it was last recorded.
    StaleAnchor,
    /// The symbol's current code contains text a `FORBIDDEN` rule bans.
    ForbiddenPattern { pattern: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
pub struct Violation {
    pub file_path: String,
    pub symbol: SymbolKey,
    pub constraint_id: NodeId,
    pub constraint_type: ConstraintKind,
    pub severity: Severity,
    pub rule: String,
    pub reason: ViolationReason,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct ValidationConfig {
    /// Violations below this severity are not reported.
    pub threshold: Severity,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { threshold: Severity::Warning }
    }
}

impl ValidationConfig {
    #[must_use]
    pub fn reports(&self, severity: Severity) -> bool {
        severity >= self.threshold
    }
}
