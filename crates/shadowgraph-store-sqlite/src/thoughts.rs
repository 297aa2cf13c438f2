use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shadowgraph_core::{
    Anchor, ConstraintSummary, Edge, GraphError, Node, NodeDraft, NodeId, NodeKind, Relation,
    SymbolKey,
};

use crate::constraints::constraints_for_node;
use crate::{
    insert_edge, load_anchor, load_node, sort_newest_first, targets_of_kind, upsert_node_in,
    SqliteStore,
};

/// Everything the graph knows about one symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolContext {
    pub file_path: String,
    pub symbol: SymbolKey,
    pub node: Node,
    pub anchor: Option<Anchor>,
    pub thoughts: Vec<Node>,
    pub constraints: Vec<ConstraintSummary>,
}

impl SqliteStore {
    /// Attach a new thought to the code block of `symbol` in `file_path`.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] when the symbol has no code node and
    /// [`GraphError::Validation`] for blank text.
    pub fn add_thought(&mut self, file_path: &str, symbol: &SymbolKey, text: &str) -> Result<Node> {
        self.attach_thought(&NodeId::code(file_path, symbol), text)
    }

    /// Attach a new thought to any node, for example a folder.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] when `target` does not exist and
    /// [`GraphError::Validation`] for blank text.
    pub fn attach_thought(&mut self, target: &NodeId, text: &str) -> Result<Node> {
        if text.trim().is_empty() {
            return Err(GraphError::Validation("thought text MUST NOT be blank".to_string()).into());
        }
        let tx = self.write_tx()?;
        let target_node =
            load_node(&tx, target)?.ok_or_else(|| GraphError::NotFound(format!("node {target}")))?;
        let mut draft = NodeDraft::new(NodeId::new_thought(), NodeKind::Thought, text);
        draft.path = target_node.path;
        let thought = upsert_node_in(&tx, &draft)?;
        insert_edge(&tx, &Edge::new(target.clone(), thought.id.clone(), Relation::HasThought))?;
        tx.commit().context("failed to commit thought")?;
        tracing::info!("attached thought {} to {target}", thought.id);
        Ok(thought)
    }

    /// Thoughts attached to a symbol, newest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn thoughts_for_symbol(&self, file_path: &str, symbol: &SymbolKey) -> Result<Vec<Node>> {
        let Some(anchor) = self.anchor_for_symbol(file_path, symbol)? else {
            return Ok(Vec::new());
        };
        let mut thoughts = targets_of_kind(
            &self.conn,
            &anchor.node_id,
            Relation::HasThought,
            &[NodeKind::Thought],
        )?;
        sort_newest_first(&mut thoughts);
        Ok(thoughts)
    }

    /// Code node, anchor, thoughts and constraints of one symbol.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] when the symbol was never indexed.
    pub fn symbol_context(&self, file_path: &str, symbol: &SymbolKey) -> Result<SymbolContext> {
        let snapshot = self.conn.unchecked_transaction().context("failed to open read snapshot")?;
        let anchor = load_anchor(&snapshot, file_path, symbol)?;
        let node_id =
            anchor.as_ref().map_or_else(|| NodeId::code(file_path, symbol), |a| a.node_id.clone());
        let node = load_node(&snapshot, &node_id)?
            .ok_or_else(|| GraphError::NotFound(format!("symbol {symbol} in {file_path}")))?;

        let mut thoughts =
            targets_of_kind(&snapshot, &node_id, Relation::HasThought, &[NodeKind::Thought])?;
        sort_newest_first(&mut thoughts);
        let constraints = constraints_for_node(&snapshot, &node_id, file_path, symbol)?;
        snapshot.finish().context("failed to close read snapshot")?;

        Ok(SymbolContext {
            file_path: file_path.to_string(),
            symbol: symbol.clone(),
            node,
            anchor,
            thoughts,
            constraints,
        })
    }
}
