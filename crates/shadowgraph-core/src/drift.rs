use serde::{Deserialize, Serialize};

use crate::{AnchorStatus, SymbolKey};

/// One symbol as yielded by the external extractor.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExtractedSymbol {
    #[serde(rename = "symbol_name")]
    pub symbol: SymbolKey,
    pub content: String,
    pub start_line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum DriftChange {
    Added,
    Unchanged,
    Modified { previous_hash: String, current_hash: String },
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Transition {
    pub symbol: SymbolKey,
    pub previous_status: Option<AnchorStatus>,
    pub new_status: Option<AnchorStatus>,
    #[serde(flatten)]
    pub change: DriftChange,
}

impl Transition {
    #[must_use]
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.new_status
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DriftReport {
    pub file: String,
    pub transitions: Vec<Transition>,
}

impl DriftReport {
    /// Transitions that left the anchor stale.
    pub fn stale(&self) -> impl Iterator<Item = &Transition> {
        self.transitions
            .iter()
            .filter(|transition| transition.new_status == Some(AnchorStatus::Stale))
    }

    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.stale().count()
    }

    #[must_use]
    pub fn transition_for(&self, symbol: &SymbolKey) -> Option<&Transition> {
        self.transitions.iter().find(|transition| &transition.symbol == symbol)
    }
}
