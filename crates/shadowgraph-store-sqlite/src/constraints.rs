use anyhow::{Context, Result};
use rusqlite::Connection;
use shadowgraph_core::{
    AnchorStatus, ConstraintKind, ConstraintPayload, ConstraintSummary, Edge, GraphError, Node,
    NodeDraft, NodeId, NodeKind, Relation, Severity, SymbolKey, ValidationConfig, Violation,
    ViolationReason,
};

use crate::{
    anchors_for_file, insert_edge, load_node, query_nodes, require_node, targets_of_kind,
    upsert_node_in, SqliteStore,
};

impl SqliteStore {
    /// Record a constraint on an indexed symbol.
    ///
    /// The constraint becomes a `CONSTRAINT` node linked from the symbol's
    /// code block with a `REQUIRED_BY` edge.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] when the symbol has no code node and
    /// [`GraphError::Validation`] for a blank rule.
    pub fn add_constraint(
        &mut self,
        file_path: &str,
        symbol: &SymbolKey,
        rule: &str,
        kind: ConstraintKind,
        severity: Severity,
    ) -> Result<ConstraintSummary> {
        if rule.trim().is_empty() {
            return Err(
                GraphError::Validation("constraint rule MUST NOT be blank".to_string()).into()
            );
        }
        let payload = ConstraintPayload {
            kind,
            rule: rule.to_string(),
            severity,
            symbol_name: symbol.clone(),
            file_path: file_path.to_string(),
        };
        let code_id = NodeId::code(file_path, symbol);

        let tx = self.write_tx()?;
        require_node(&tx, &code_id)?;
        let constraint = upsert_node_in(
            &tx,
            &NodeDraft::new(NodeId::new_constraint(), NodeKind::Constraint, payload.to_content()?)
                .with_path(file_path),
        )?;
        insert_edge(&tx, &Edge::new(code_id, constraint.id.clone(), Relation::RequiredBy))?;
        tx.commit().context("failed to commit constraint")?;

        tracing::info!(
            "constraint {} ({}, {}) added to {file_path}#{symbol}",
            constraint.id,
            kind.as_str(),
            severity.as_str()
        );
        Ok(ConstraintSummary { id: constraint.id, payload })
    }

    /// Constraints attached to one symbol, ordered by id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn constraints_for_symbol(
        &self,
        file_path: &str,
        symbol: &SymbolKey,
    ) -> Result<Vec<ConstraintSummary>> {
        let node_id = self
            .anchor_for_symbol(file_path, symbol)?
            .map_or_else(|| NodeId::code(file_path, symbol), |anchor| anchor.node_id);
        constraints_for_node(&self.conn, &node_id, file_path, symbol)
    }

    /// Every `CONSTRAINT` node in the graph.
    ///
    /// Nodes whose content is not a constraint payload are skipped with a warning.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_constraints(&self) -> Result<Vec<ConstraintSummary>> {
        let nodes = query_nodes(
            &self.conn,
            "SELECT id, kind, content, path, created_at FROM nodes
             WHERE kind = 'CONSTRAINT' ORDER BY id ASC",
            [],
        )?;
        let mut summaries = Vec::with_capacity(nodes.len());
        for node in nodes {
            match ConstraintPayload::from_content(&node.content) {
                Ok(payload) => summaries.push(ConstraintSummary { id: node.id, payload }),
                Err(err) => tracing::warn!("skipping constraint {}: {err}", node.id),
            }
        }
        Ok(summaries)
    }

    /// Check every anchored symbol of `file_path` against its constraints.
    ///
    /// A constraint on a stale symbol is reported with
    /// [`ViolationReason::StaleAnchor`]. A `FORBIDDEN` constraint whose
    /// pattern occurs in the symbol's current code is reported with
    /// [`ViolationReason::ForbiddenPattern`], stale or not. Constraints below
    /// the configured threshold are skipped. The whole check reads one
    /// snapshot. Output is sorted.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn validate(&self, file_path: &str, config: &ValidationConfig) -> Result<Vec<Violation>> {
        let snapshot = self.conn.unchecked_transaction().context("failed to open read snapshot")?;
        let violations = validate_file(&snapshot, file_path, config)?;
        snapshot.finish().context("failed to close read snapshot")?;
        Ok(violations)
    }

    /// [`validate`](Self::validate) over every file with an anchor, in one snapshot.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn validate_all(&self, config: &ValidationConfig) -> Result<Vec<Violation>> {
        let snapshot = self.conn.unchecked_transaction().context("failed to open read snapshot")?;
        let mut violations = Vec::new();
        for file_path in anchored_files(&snapshot)? {
            violations.extend(validate_file(&snapshot, &file_path, config)?);
        }
        snapshot.finish().context("failed to close read snapshot")?;
        if !violations.is_empty() {
            tracing::warn!("{} constraint violations found", violations.len());
        }
        Ok(violations)
    }
}

fn validate_file(
    conn: &Connection,
    file_path: &str,
    config: &ValidationConfig,
) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    for anchor in anchors_for_file(conn, file_path)? {
        let code = load_node(conn, &anchor.node_id)?.map(|node| node.content).unwrap_or_default();
        for constraint in constraints_for_node(conn, &anchor.node_id, file_path, &anchor.symbol)? {
            let payload = &constraint.payload;
            if !config.reports(payload.severity) {
                continue;
            }
            let mut reasons = Vec::new();
            if anchor.status == AnchorStatus::Stale {
                reasons.push(ViolationReason::StaleAnchor);
            }
            if payload.forbids(&code) {
                let pattern = payload.forbidden_pattern().unwrap_or_default().to_string();
                reasons.push(ViolationReason::ForbiddenPattern { pattern });
            }
            for reason in reasons {
                violations.push(Violation {
                    file_path: file_path.to_string(),
                    symbol: anchor.symbol.clone(),
                    constraint_id: constraint.id.clone(),
                    constraint_type: payload.kind,
                    severity: payload.severity,
                    rule: payload.rule.clone(),
                    reason,
                });
            }
        }
    }
    violations.sort();
    Ok(violations)
}

/// Constraints reachable from `node_id` over `REQUIRED_BY`.
///
/// `REQUIREMENT` nodes and constraint nodes with free-text content are read
/// as warning-level rules.
pub(crate) fn constraints_for_node(
    conn: &Connection,
    node_id: &NodeId,
    file_path: &str,
    symbol: &SymbolKey,
) -> Result<Vec<ConstraintSummary>> {
    let nodes = targets_of_kind(
        conn,
        node_id,
        Relation::RequiredBy,
        &[NodeKind::Constraint, NodeKind::Requirement],
    )?;
    Ok(nodes.into_iter().map(|node| summarize(node, file_path, symbol)).collect())
}

fn summarize(node: Node, file_path: &str, symbol: &SymbolKey) -> ConstraintSummary {
    let payload = ConstraintPayload::from_content(&node.content).unwrap_or_else(|_| {
        ConstraintPayload {
            kind: ConstraintKind::Rule,
            rule: node.content.clone(),
            severity: Severity::Warning,
            symbol_name: symbol.clone(),
            file_path: file_path.to_string(),
        }
    });
    ConstraintSummary { id: node.id, payload }
}

fn anchored_files(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT file_path FROM anchors ORDER BY file_path ASC")
        .context("failed to prepare anchored file query")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut files = Vec::new();
    for row in rows {
        files.push(row?);
    }
    Ok(files)
}
