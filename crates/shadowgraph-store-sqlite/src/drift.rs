use std::collections::BTreeSet;

use anyhow::{Context, Result};
use shadowgraph_core::{
    content_digest, Anchor, AnchorStatus, DriftChange, DriftReport, ExtractedSymbol, GraphError,
    NodeDraft, NodeId, NodeKind, SymbolKey, Transition,
};

use crate::{anchors_for_file, load_anchor, mark_stale, upsert_node_in, write_anchor, SqliteStore};

impl SqliteStore {
    /// Record a fresh extraction of `file_path`.
    ///
    /// Every symbol gets a `CODE_BLOCK` node and an anchor. New and unchanged
    /// symbols end up `VALID`; a changed hash is stored and the anchor turns
    /// `STALE` with the old hash kept as `previous_hash`. Anchors of the file
    /// whose symbol is missing from `symbols` turn `STALE`. One transaction.
    ///
    /// # Errors
    /// Returns [`GraphError::Validation`] for an empty file path or a symbol
    /// listed twice, or a storage error.
    pub fn index_symbols(
        &mut self,
        file_path: &str,
        symbols: &[ExtractedSymbol],
    ) -> Result<DriftReport> {
        ensure_unique(file_path, symbols)?;
        let tx = self.write_tx()?;
        let mut transitions = Vec::with_capacity(symbols.len());

        for extracted in symbols {
            let current_hash = content_digest(&extracted.content);
            let node_id = NodeId::code(file_path, &extracted.symbol);
            upsert_node_in(
                &tx,
                &NodeDraft::new(node_id.clone(), NodeKind::CodeBlock, extracted.content.clone())
                    .with_path(file_path),
            )?;

            let existing = load_anchor(&tx, file_path, &extracted.symbol)?;
            let (change, status, previous_hash) = match &existing {
                None => (DriftChange::Added, AnchorStatus::Valid, None),
                Some(anchor) if anchor.content_hash == current_hash => {
                    (DriftChange::Unchanged, AnchorStatus::Valid, None)
                }
                Some(anchor) => (
                    DriftChange::Modified {
                        previous_hash: anchor.content_hash.clone(),
                        current_hash: current_hash.clone(),
                    },
                    AnchorStatus::Stale,
                    Some(anchor.content_hash.clone()),
                ),
            };

            write_anchor(
                &tx,
                &Anchor {
                    node_id,
                    file_path: file_path.to_string(),
                    symbol: extracted.symbol.clone(),
                    content_hash: current_hash,
                    previous_hash,
                    start_line: extracted.start_line,
                    status,
                },
            )?;
            transitions.push(Transition {
                symbol: extracted.symbol.clone(),
                previous_status: existing.map(|anchor| anchor.status),
                new_status: Some(status),
                change,
            });
        }

        transitions.extend(stale_missing(&tx, file_path, symbols)?);
        tx.commit().context("failed to commit symbol index")?;

        let report = DriftReport { file: file_path.to_string(), transitions };
        tracing::info!(
            "indexed {} symbols in {file_path}, {} stale",
            symbols.len(),
            report.stale_count()
        );
        Ok(report)
    }

    /// Compare a fresh extraction of `file_path` against the stored anchors
    /// without re-recording it.
    ///
    /// Anchors whose hash differs, or whose symbol disappeared, are marked
    /// `STALE` and keep their stored hash. Unknown symbols are reported as
    /// added and nothing is created for them.
    ///
    /// # Errors
    /// Returns [`GraphError::Validation`] for an empty file path or a symbol
    /// listed twice, or a storage error.
    pub fn check_drift(
        &mut self,
        file_path: &str,
        symbols: &[ExtractedSymbol],
    ) -> Result<DriftReport> {
        ensure_unique(file_path, symbols)?;
        let tx = self.write_tx()?;
        let mut transitions = Vec::with_capacity(symbols.len());

        for extracted in symbols {
            let current_hash = content_digest(&extracted.content);
            let transition = match load_anchor(&tx, file_path, &extracted.symbol)? {
                None => Transition {
                    symbol: extracted.symbol.clone(),
                    previous_status: None,
                    new_status: None,
                    change: DriftChange::Added,
                },
                Some(anchor) if anchor.content_hash == current_hash => Transition {
                    symbol: extracted.symbol.clone(),
                    previous_status: Some(anchor.status),
                    new_status: Some(anchor.status),
                    change: DriftChange::Unchanged,
                },
                Some(anchor) => {
                    mark_stale(&tx, file_path, &extracted.symbol)?;
                    Transition {
                        symbol: extracted.symbol.clone(),
                        previous_status: Some(anchor.status),
                        new_status: Some(AnchorStatus::Stale),
                        change: DriftChange::Modified {
                            previous_hash: anchor.content_hash,
                            current_hash,
                        },
                    }
                }
            };
            transitions.push(transition);
        }

        transitions.extend(stale_missing(&tx, file_path, symbols)?);
        tx.commit().context("failed to commit drift check")?;

        let report = DriftReport { file: file_path.to_string(), transitions };
        if report.stale_count() > 0 {
            tracing::warn!("{} stale anchors in {file_path}", report.stale_count());
        }
        Ok(report)
    }
}

fn ensure_unique(file_path: &str, symbols: &[ExtractedSymbol]) -> Result<()> {
    if file_path.is_empty() {
        return Err(GraphError::Validation("file_path MUST NOT be empty".to_string()).into());
    }
    let mut seen = BTreeSet::new();
    for extracted in symbols {
        if !seen.insert(&extracted.symbol) {
            return Err(GraphError::Validation(format!(
                "symbol {} listed twice for {file_path}",
                extracted.symbol
            ))
            .into());
        }
    }
    Ok(())
}

/// Mark anchors of `file_path` that `symbols` no longer mentions as stale.
fn stale_missing(
    conn: &rusqlite::Connection,
    file_path: &str,
    symbols: &[ExtractedSymbol],
) -> Result<Vec<Transition>> {
    let present =
        symbols.iter().map(|extracted| &extracted.symbol).collect::<BTreeSet<&SymbolKey>>();
    let mut transitions = Vec::new();

    for anchor in anchors_for_file(conn, file_path)? {
        if present.contains(&anchor.symbol) {
            continue;
        }
        mark_stale(conn, file_path, &anchor.symbol)?;
        transitions.push(Transition {
            symbol: anchor.symbol,
            previous_status: Some(anchor.status),
            new_status: Some(AnchorStatus::Stale),
            change: DriftChange::Missing,
        });
    }

    Ok(transitions)
}
