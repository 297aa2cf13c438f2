//! JSONL export and the merging import.
//!
//! Export order is fixed: nodes by id, anchors by `(file_path, symbol)`,
//! edges by `(source, target, relation)`. Identical graphs therefore
//! serialize to identical bytes, which is what the checksum relies on.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use shadowgraph_core::{
    last_write_wins, merge_anchor, sha256_hex, AnchorRecord, EdgeRecord, GraphError, MergeOutcome,
    NodeRecord, RecordKey, WireRecord,
};

use crate::{
    insert_edge, load_anchor, load_node, node_exists, query_anchors, query_edges, query_nodes,
    write_anchor, write_node, SqliteStore, ANCHOR_COLUMNS, NODE_COLUMNS,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Merge records into the existing graph, last write wins.
    #[default]
    Merge,
    /// Clear the graph first, then load the records.
    Replace,
}

/// A record that was skipped during import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordError {
    pub line: usize,
    pub key: Option<String>,
    pub message: String,
}

impl RecordError {
    fn new(line: usize, key: Option<String>, err: &GraphError) -> Self {
        Self { line, key, message: err.to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeReport {
    pub mode: ImportMode,
    pub nodes_inserted: usize,
    pub nodes_updated: usize,
    pub nodes_kept: usize,
    pub nodes_identical: usize,
    pub anchors_inserted: usize,
    pub anchors_updated: usize,
    pub anchors_unchanged: usize,
    pub edges_inserted: usize,
    pub edges_existing: usize,
    pub errors: Vec<RecordError>,
}

impl MergeReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: String,
    pub nodes: usize,
    pub anchors: usize,
    pub edges: usize,
    pub sha256: String,
}

struct Parsed {
    nodes: Vec<(usize, NodeRecord)>,
    anchors: Vec<(usize, AnchorRecord)>,
    edges: Vec<(usize, EdgeRecord)>,
    errors: Vec<RecordError>,
}

impl SqliteStore {
    /// Render the whole graph as JSONL lines in canonical order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or encoded.
    pub fn serialize(&self) -> Result<Vec<String>> {
        let snapshot = self.conn.unchecked_transaction().context("failed to open read snapshot")?;
        let lines = serialize_records(&snapshot)?;
        snapshot.finish().context("failed to close read snapshot")?;
        Ok(lines.into_iter().map(|(_, line)| line).collect())
    }

    /// The serialized graph as one newline-terminated document.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or encoded.
    pub fn serialize_to_string(&self) -> Result<String> {
        Ok(join_lines(&self.serialize()?))
    }

    /// SHA-256 of the serialized graph; equal graphs give equal checksums.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or encoded.
    pub fn checksum(&self) -> Result<String> {
        Ok(sha256_hex(self.serialize_to_string()?.as_bytes()))
    }

    /// Write the serialized graph to `path`, replacing it atomically.
    ///
    /// # Errors
    /// Returns an error when the graph cannot be read or the file cannot be written.
    pub fn export_to(&self, path: &Path) -> Result<ExportSummary> {
        let snapshot = self.conn.unchecked_transaction().context("failed to open read snapshot")?;
        let records = serialize_records(&snapshot)?;
        snapshot.finish().context("failed to close read snapshot")?;

        let mut summary = ExportSummary {
            path: path.display().to_string(),
            nodes: 0,
            anchors: 0,
            edges: 0,
            sha256: String::new(),
        };
        for (kind, _) in &records {
            match kind {
                RecordKind::Node => summary.nodes += 1,
                RecordKind::Anchor => summary.anchors += 1,
                RecordKind::Edge => summary.edges += 1,
            }
        }
        let lines = records.into_iter().map(|(_, line)| line).collect::<Vec<_>>();
        let document = join_lines(&lines);
        summary.sha256 = sha256_hex(document.as_bytes());

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let staging = PathBuf::from(format!("{}.tmp", path.display()));
        fs::write(&staging, document.as_bytes())
            .with_context(|| format!("failed to write export file {}", staging.display()))?;
        fs::rename(&staging, path)
            .with_context(|| format!("failed to move export into place at {}", path.display()))?;

        tracing::info!(
            "exported {} nodes, {} anchors, {} edges to {}",
            summary.nodes,
            summary.anchors,
            summary.edges,
            path.display()
        );
        Ok(summary)
    }

    /// Merge serialized lines into the graph.
    ///
    /// Lines that fail to parse or reference missing nodes are collected in
    /// [`MergeReport::errors`] and skipped. Everything else is applied in a
    /// single transaction: nodes first, then anchors, then edges, so an edge
    /// never lands ahead of its endpoints.
    ///
    /// # Errors
    /// Returns an error only for storage failures, in which case nothing is applied.
    pub fn deserialize<'a, I>(&mut self, lines: I, mode: ImportMode) -> Result<MergeReport>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let parsed = parse_lines(lines);
        let mut report = MergeReport { mode, errors: parsed.errors, ..MergeReport::default() };

        let tx = self.write_tx()?;
        if mode == ImportMode::Replace {
            tx.execute_batch("DELETE FROM edges; DELETE FROM anchors; DELETE FROM nodes;")
                .context("failed to clear graph before replace")?;
        }
        for (line, record) in parsed.nodes {
            merge_node(&tx, line, record, &mut report)?;
        }
        for (line, record) in parsed.anchors {
            merge_anchor_record(&tx, line, &record, &mut report)?;
        }
        for (line, record) in parsed.edges {
            merge_edge(&tx, line, &record, &mut report)?;
        }
        tx.commit().context("failed to commit import")?;

        report.errors.sort_by_key(|error| error.line);
        for error in &report.errors {
            tracing::warn!("skipped line {}: {}", error.line, error.message);
        }
        tracing::info!(
            "import ({:?}): {} nodes inserted, {} updated, {} edges inserted, {} errors",
            mode,
            report.nodes_inserted,
            report.nodes_updated,
            report.edges_inserted,
            report.errors.len()
        );
        Ok(report)
    }

    /// Read a JSONL file and [`deserialize`](Self::deserialize) it.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or storage fails.
    pub fn import_from(&mut self, path: &Path, mode: ImportMode) -> Result<MergeReport> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read sync file {}", path.display()))?;
        self.deserialize(text.lines(), mode)
    }
}

#[derive(Debug, Clone, Copy)]
enum RecordKind {
    Node,
    Anchor,
    Edge,
}

fn serialize_records(conn: &Connection) -> Result<Vec<(RecordKind, String)>> {
    let nodes =
        query_nodes(conn, &format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id ASC"), [])?;
    let anchors = query_anchors(
        conn,
        &format!("SELECT {ANCHOR_COLUMNS} FROM anchors ORDER BY file_path ASC, symbol_name ASC"),
        [],
    )?;
    let edges = query_edges(
        conn,
        "SELECT source_id, target_id, relation FROM edges
         ORDER BY source_id ASC, target_id ASC, relation ASC",
        [],
    )?;

    let mut lines = Vec::with_capacity(nodes.len() + anchors.len() + edges.len());
    for node in &nodes {
        let line = WireRecord::Node(NodeRecord::from_node(node)?).to_line()?;
        lines.push((RecordKind::Node, line));
    }
    for anchor in &anchors {
        let line = WireRecord::Anchor(AnchorRecord::from_anchor(anchor)).to_line()?;
        lines.push((RecordKind::Anchor, line));
    }
    for edge in &edges {
        let line = WireRecord::Edge(EdgeRecord::from_edge(edge)).to_line()?;
        lines.push((RecordKind::Edge, line));
    }
    Ok(lines)
}

fn join_lines(lines: &[String]) -> String {
    let mut document = String::with_capacity(lines.iter().map(|line| line.len() + 1).sum());
    for line in lines {
        document.push_str(line);
        document.push('\n');
    }
    document
}

fn parse_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Parsed {
    let mut parsed =
        Parsed { nodes: Vec::new(), anchors: Vec::new(), edges: Vec::new(), errors: Vec::new() };
    for (index, raw) in lines.into_iter().enumerate() {
        let line = index + 1;
        if raw.trim().is_empty() {
            continue;
        }
        match WireRecord::parse_line(line, raw) {
            Ok(WireRecord::Node(record)) => parsed.nodes.push((line, record)),
            Ok(WireRecord::Anchor(record)) => parsed.anchors.push((line, record)),
            Ok(WireRecord::Edge(record)) => parsed.edges.push((line, record)),
            Err(err) => parsed.errors.push(RecordError::new(line, None, &err)),
        }
    }
    parsed
}

fn merge_node(
    conn: &Connection,
    line: usize,
    incoming: NodeRecord,
    report: &mut MergeReport,
) -> Result<()> {
    let Some(local) = load_node(conn, &incoming.id)? else {
        write_node(conn, &incoming.into_node())?;
        report.nodes_inserted += 1;
        return Ok(());
    };

    let local = NodeRecord::from_node(&local)?;
    match last_write_wins(&local, &incoming) {
        Ok(MergeOutcome::TakeIncoming) => {
            write_node(conn, &incoming.into_node())?;
            report.nodes_updated += 1;
        }
        Ok(MergeOutcome::KeepLocal) => report.nodes_kept += 1,
        Ok(MergeOutcome::Identical) => report.nodes_identical += 1,
        Err(err) => {
            let key = RecordKey::Node(local.id.clone()).to_string();
            report.errors.push(RecordError::new(line, Some(key), &err));
            report.nodes_kept += 1;
        }
    }
    Ok(())
}

fn merge_anchor_record(
    conn: &Connection,
    line: usize,
    record: &AnchorRecord,
    report: &mut MergeReport,
) -> Result<()> {
    if !node_exists(conn, &record.node_id)? {
        let key = RecordKey::Anchor {
            file_path: record.file_path.clone(),
            symbol: record.symbol_name.clone(),
        };
        let err = GraphError::NotFound(format!("node {}", record.node_id));
        report.errors.push(RecordError::new(line, Some(key.to_string()), &err));
        return Ok(());
    }

    let incoming = record.to_anchor();
    match load_anchor(conn, &record.file_path, &record.symbol_name)? {
        None => {
            write_anchor(conn, &incoming)?;
            report.anchors_inserted += 1;
        }
        Some(local) => {
            let merged = merge_anchor(&local, &incoming);
            if merged == local {
                report.anchors_unchanged += 1;
            } else {
                write_anchor(conn, &merged)?;
                report.anchors_updated += 1;
            }
        }
    }
    Ok(())
}

fn merge_edge(
    conn: &Connection,
    line: usize,
    record: &EdgeRecord,
    report: &mut MergeReport,
) -> Result<()> {
    let edge = record.to_edge();
    for endpoint in [&edge.source_id, &edge.target_id] {
        if !node_exists(conn, endpoint)? {
            let key = RecordKey::Edge(edge.clone()).to_string();
            let err = GraphError::NotFound(format!("node {endpoint}"));
            report.errors.push(RecordError::new(line, Some(key), &err));
            return Ok(());
        }
    }
    if insert_edge(conn, &edge)? {
        report.edges_inserted += 1;
    } else {
        report.edges_existing += 1;
    }
    Ok(())
}
