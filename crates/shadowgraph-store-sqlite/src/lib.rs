use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Params, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use shadowgraph_core::{
    format_timestamp, parse_timestamp, Anchor, AnchorStatus, Edge, GraphError, Node, NodeDraft,
    NodeId, NodeKind, Relation, SymbolKey,
};
use time::OffsetDateTime;

mod constraints;
mod drift;
mod folders;
mod impact;
mod sync;
mod thoughts;

pub use impact::{Neighbor, Neighborhood};
pub use sync::{ExportSummary, ImportMode, MergeReport, RecordError};
pub use thoughts::SymbolContext;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS nodes (
  id TEXT PRIMARY KEY,
  kind TEXT NOT NULL CHECK (kind IN ('CODE_BLOCK', 'THOUGHT', 'REQUIREMENT', 'CONSTRAINT', 'FOLDER')),
  content TEXT NOT NULL,
  path TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS anchors (
  node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
  file_path TEXT NOT NULL CHECK (length(file_path) > 0),
  symbol_name TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  previous_hash TEXT,
  start_line INTEGER NOT NULL CHECK (start_line >= 0),
  status TEXT NOT NULL CHECK (status IN ('VALID', 'STALE')),
  PRIMARY KEY (node_id, file_path, symbol_name),
  UNIQUE (file_path, symbol_name)
);

CREATE TABLE IF NOT EXISTS edges (
  source_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
  target_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
  relation TEXT NOT NULL CHECK (relation IN ('HAS_THOUGHT', 'DEPENDS_ON', 'REQUIRED_BY', 'IMPACTS')),
  PRIMARY KEY (source_id, target_id, relation)
);

CREATE INDEX IF NOT EXISTS idx_nodes_kind_path ON nodes(kind, path);
CREATE INDEX IF NOT EXISTS idx_anchors_node ON anchors(node_id);
CREATE INDEX IF NOT EXISTS idx_anchors_status ON anchors(status, file_path);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, relation);
";

const NODE_COLUMNS: &str = "id, kind, content, path, created_at";
const ANCHOR_COLUMNS: &str =
    "node_id, file_path, symbol_name, content_hash, previous_hash, start_line, status";

/// Embedded graph store backed by a single `SQLite` database.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open the graph database at `path` and configure runtime pragmas.
    ///
    /// Missing parent directories are created. `:memory:` opens a private
    /// in-memory database.
    ///
    /// # Errors
    /// Returns an error when the directory or database cannot be created or
    /// pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        tracing::debug!("opened graph database at {}", path.display());
        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when a migration step fails or the database carries a
    /// newer schema than this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version == 0 {
            let tx = self.write_tx()?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 001")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration 001")?;
            tracing::info!("applied graph schema migration 1");
        } else if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Run quick-check, foreign-key-check, and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    /// Create a node or overwrite the content of an existing one.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    pub fn upsert_node(&mut self, id: &NodeId, kind: NodeKind, content: &str) -> Result<Node> {
        self.upsert_node_with(&NodeDraft::new(id.clone(), kind, content))
    }

    /// Create or overwrite a node from a full draft.
    ///
    /// Kind, content and path are replaced. `created_at` is kept for an
    /// existing node and taken from the draft (or now) for a new one.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    pub fn upsert_node_with(&mut self, draft: &NodeDraft) -> Result<Node> {
        let tx = self.write_tx()?;
        let node = upsert_node_in(&tx, draft)?;
        tx.commit().context("failed to commit node upsert")?;
        tracing::debug!("upserted node {}", node.id);
        Ok(node)
    }

    /// # Errors
    /// Returns an error when the node row cannot be read or decoded.
    pub fn get_node(&self, id: &NodeId) -> Result<Option<Node>> {
        load_node(&self.conn, id)
    }

    /// Delete a node together with its anchors and every edge touching it.
    ///
    /// Returns `false` when no node with `id` existed.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_node(&mut self, id: &NodeId) -> Result<bool> {
        let tx = self.write_tx()?;
        let removed = tx
            .execute("DELETE FROM nodes WHERE id = ?1", params![id.as_str()])
            .with_context(|| format!("failed to delete node {id}"))?;
        tx.commit().context("failed to commit node delete")?;
        if removed > 0 {
            tracing::info!("deleted node {id} with its anchors and edges");
        }
        Ok(removed > 0)
    }

    /// Bind `node_id` to `(file_path, symbol)`, replacing any anchor that
    /// pair already had. The new anchor starts out `VALID`.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] when the node does not exist and
    /// [`GraphError::Validation`] for an empty file path.
    pub fn upsert_anchor(
        &mut self,
        node_id: &NodeId,
        file_path: &str,
        symbol: &SymbolKey,
        content_hash: &str,
        start_line: u32,
    ) -> Result<Anchor> {
        if file_path.is_empty() {
            return Err(GraphError::Validation("file_path MUST NOT be empty".to_string()).into());
        }
        let tx = self.write_tx()?;
        require_node(&tx, node_id)?;
        let anchor = Anchor {
            node_id: node_id.clone(),
            file_path: file_path.to_string(),
            symbol: symbol.clone(),
            content_hash: content_hash.to_string(),
            previous_hash: None,
            start_line,
            status: AnchorStatus::Valid,
        };
        write_anchor(&tx, &anchor)?;
        tx.commit().context("failed to commit anchor upsert")?;
        Ok(anchor)
    }

    /// # Errors
    /// Returns an error when anchor rows cannot be read or decoded.
    pub fn anchor_for_symbol(&self, file_path: &str, symbol: &SymbolKey) -> Result<Option<Anchor>> {
        load_anchor(&self.conn, file_path, symbol)
    }

    /// Anchors of one file ordered by line.
    ///
    /// # Errors
    /// Returns an error when anchor rows cannot be read or decoded.
    pub fn anchors_for_file(&self, file_path: &str) -> Result<Vec<Anchor>> {
        anchors_for_file(&self.conn, file_path)
    }

    /// # Errors
    /// Returns an error when anchor rows cannot be read or decoded.
    pub fn stale_anchors(&self, file_path: &str) -> Result<Vec<Anchor>> {
        query_anchors(
            &self.conn,
            &format!(
                "SELECT {ANCHOR_COLUMNS} FROM anchors
                 WHERE file_path = ?1 AND status = 'STALE'
                 ORDER BY start_line ASC, symbol_name ASC"
            ),
            params![file_path],
        )
    }

    /// Insert a typed edge. Returns `false` when the same edge already existed.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] when either endpoint is missing; the
    /// store is left unchanged in that case.
    pub fn add_edge(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        relation: Relation,
    ) -> Result<bool> {
        let tx = self.write_tx()?;
        require_node(&tx, source)?;
        require_node(&tx, target)?;
        let inserted = insert_edge(&tx, &Edge::new(source.clone(), target.clone(), relation))?;
        tx.commit().context("failed to commit edge insert")?;
        tracing::debug!("edge {source} -[{}]-> {target} inserted={inserted}", relation.as_str());
        Ok(inserted)
    }

    /// Every edge touching `id`, in either direction.
    ///
    /// # Errors
    /// Returns an error when edge rows cannot be read or decoded.
    pub fn edges_for_node(&self, id: &NodeId) -> Result<Vec<Edge>> {
        query_edges(
            &self.conn,
            "SELECT source_id, target_id, relation FROM edges
             WHERE source_id = ?1 OR target_id = ?1
             ORDER BY source_id ASC, target_id ASC, relation ASC",
            params![id.as_str()],
        )
    }

    fn write_tx(&mut self) -> Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start write transaction")
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, format_timestamp(OffsetDateTime::now_utc())?],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn require_node(conn: &Connection, id: &NodeId) -> Result<()> {
    if node_exists(conn, id)? {
        Ok(())
    } else {
        Err(GraphError::NotFound(format!("node {id}")).into())
    }
}

fn node_exists(conn: &Connection, id: &NodeId) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM nodes WHERE id = ?1", params![id.as_str()], |_| Ok(()))
        .optional()
        .with_context(|| format!("failed to look up node {id}"))?;
    Ok(found.is_some())
}

fn load_node(conn: &Connection, id: &NodeId) -> Result<Option<Node>> {
    let mut nodes = query_nodes(
        conn,
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
        params![id.as_str()],
    )?;
    Ok(nodes.pop())
}

fn upsert_node_in(conn: &Connection, draft: &NodeDraft) -> Result<Node> {
    let created_at = format_timestamp(draft.created_at.unwrap_or_else(OffsetDateTime::now_utc))?;
    conn.execute(
        "INSERT INTO nodes(id, kind, content, path, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
           kind = excluded.kind,
           content = excluded.content,
           path = excluded.path",
        params![draft.id.as_str(), draft.kind.as_str(), draft.content, draft.path, created_at],
    )
    .with_context(|| format!("failed to upsert node {}", draft.id))?;
    load_node(conn, &draft.id)?.ok_or_else(|| anyhow!("node {} missing after upsert", draft.id))
}

/// Write every field of `node`, including `created_at`.
fn write_node(conn: &Connection, node: &Node) -> Result<()> {
    conn.execute(
        "INSERT INTO nodes(id, kind, content, path, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
           kind = excluded.kind,
           content = excluded.content,
           path = excluded.path,
           created_at = excluded.created_at",
        params![
            node.id.as_str(),
            node.kind.as_str(),
            node.content,
            node.path,
            format_timestamp(node.created_at)?
        ],
    )
    .with_context(|| format!("failed to write node {}", node.id))?;
    Ok(())
}

fn query_nodes<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare(sql).context("failed to prepare node query")?;
    let mut rows = stmt.query(params)?;
    let mut nodes = Vec::new();

    while let Some(row) = rows.next()? {
        let kind_raw: String = row.get(1)?;
        let created_at_raw: String = row.get(4)?;
        nodes.push(Node {
            id: NodeId::new(row.get::<_, String>(0)?),
            kind: kind_raw.parse()?,
            content: row.get(2)?,
            path: row.get(3)?,
            created_at: parse_timestamp(&created_at_raw)?,
        });
    }

    Ok(nodes)
}

fn load_anchor(conn: &Connection, file_path: &str, symbol: &SymbolKey) -> Result<Option<Anchor>> {
    let mut anchors = query_anchors(
        conn,
        &format!("SELECT {ANCHOR_COLUMNS} FROM anchors WHERE file_path = ?1 AND symbol_name = ?2"),
        params![file_path, symbol.to_string()],
    )?;
    Ok(anchors.pop())
}

fn anchors_for_file(conn: &Connection, file_path: &str) -> Result<Vec<Anchor>> {
    query_anchors(
        conn,
        &format!(
            "SELECT {ANCHOR_COLUMNS} FROM anchors WHERE file_path = ?1
             ORDER BY start_line ASC, symbol_name ASC"
        ),
        params![file_path],
    )
}

fn anchors_for_node(conn: &Connection, id: &NodeId) -> Result<Vec<Anchor>> {
    query_anchors(
        conn,
        &format!(
            "SELECT {ANCHOR_COLUMNS} FROM anchors WHERE node_id = ?1
             ORDER BY file_path ASC, symbol_name ASC"
        ),
        params![id.as_str()],
    )
}

fn query_anchors<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Anchor>> {
    let mut stmt = conn.prepare(sql).context("failed to prepare anchor query")?;
    let mut rows = stmt.query(params)?;
    let mut anchors = Vec::new();

    while let Some(row) = rows.next()? {
        let symbol_raw: String = row.get(2)?;
        let status_raw: String = row.get(6)?;
        anchors.push(Anchor {
            node_id: NodeId::new(row.get::<_, String>(0)?),
            file_path: row.get(1)?,
            symbol: symbol_raw.parse()?,
            content_hash: row.get(3)?,
            previous_hash: row.get(4)?,
            start_line: row.get(5)?,
            status: status_raw.parse()?,
        });
    }

    Ok(anchors)
}

/// Replace whatever anchor `(file_path, symbol)` had with `anchor`.
fn write_anchor(conn: &Connection, anchor: &Anchor) -> Result<()> {
    let symbol = anchor.symbol.to_string();
    conn.execute(
        "DELETE FROM anchors WHERE file_path = ?1 AND symbol_name = ?2",
        params![anchor.file_path, symbol],
    )
    .context("failed to clear previous anchor")?;
    conn.execute(
        "INSERT INTO anchors(
           node_id, file_path, symbol_name, content_hash, previous_hash, start_line, status
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            anchor.node_id.as_str(),
            anchor.file_path,
            symbol,
            anchor.content_hash,
            anchor.previous_hash,
            anchor.start_line,
            anchor.status.as_str(),
        ],
    )
    .with_context(|| format!("failed to write anchor {}#{symbol}", anchor.file_path))?;
    Ok(())
}

fn mark_stale(conn: &Connection, file_path: &str, symbol: &SymbolKey) -> Result<()> {
    conn.execute(
        "UPDATE anchors SET status = 'STALE' WHERE file_path = ?1 AND symbol_name = ?2",
        params![file_path, symbol.to_string()],
    )
    .with_context(|| format!("failed to mark {file_path}#{symbol} stale"))?;
    Ok(())
}

fn insert_edge(conn: &Connection, edge: &Edge) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO edges(source_id, target_id, relation) VALUES (?1, ?2, ?3)",
            params![edge.source_id.as_str(), edge.target_id.as_str(), edge.relation.as_str()],
        )
        .context("failed to insert edge")?;
    Ok(inserted > 0)
}

fn query_edges<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(sql).context("failed to prepare edge query")?;
    let mut rows = stmt.query(params)?;
    let mut edges = Vec::new();

    while let Some(row) = rows.next()? {
        let relation_raw: String = row.get(2)?;
        edges.push(Edge::new(
            NodeId::new(row.get::<_, String>(0)?),
            NodeId::new(row.get::<_, String>(1)?),
            relation_raw.parse()?,
        ));
    }

    Ok(edges)
}

/// Nodes reached from `source` over `relation` whose kind is one of `kinds`.
fn targets_of_kind(
    conn: &Connection,
    source: &NodeId,
    relation: Relation,
    kinds: &[NodeKind],
) -> Result<Vec<Node>> {
    let nodes = query_nodes(
        conn,
        "SELECT n.id, n.kind, n.content, n.path, n.created_at
         FROM edges e JOIN nodes n ON n.id = e.target_id
         WHERE e.source_id = ?1 AND e.relation = ?2
         ORDER BY n.id ASC",
        params![source.as_str(), relation.as_str()],
    )?;
    Ok(nodes.into_iter().filter(|node| kinds.contains(&node.kind)).collect())
}

/// Newest first; ids break ties so the order is stable.
fn sort_newest_first(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use shadowgraph_core::{content_digest, ExtractedSymbol};
    use ulid::Ulid;

    use super::*;

    pub(crate) fn memory_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    pub(crate) fn symbol(raw: &str) -> SymbolKey {
        raw.parse().unwrap_or_else(|err| panic!("fixture symbol {raw} should parse: {err}"))
    }

    pub(crate) fn extracted(raw_symbol: &str, content: &str, line: u32) -> ExtractedSymbol {
        ExtractedSymbol {
            symbol: symbol(raw_symbol),
            content: content.to_string(),
            start_line: line,
        }
    }

    pub(crate) fn graph_error(err: &anyhow::Error) -> &GraphError {
        err.downcast_ref::<GraphError>()
            .unwrap_or_else(|| panic!("expected a GraphError, got {err:#}"))
    }

    // Test IDs: TSG-DB-001
    #[test]
    fn schema_rejects_unknown_enums_and_dangling_references() -> Result<()> {
        let store = memory_store()?;

        let bad_kind = store.conn.execute(
            "INSERT INTO nodes(id, kind, content, path, created_at) VALUES (?1, ?2, ?3, NULL, ?4)",
            params!["n1", "EDGE", "x", "2024-01-01T00:00:00Z"],
        );
        assert!(bad_kind.is_err());

        let dangling = store.conn.execute(
            "INSERT INTO edges(source_id, target_id, relation) VALUES (?1, ?2, ?3)",
            params!["missing-a", "missing-b", "DEPENDS_ON"],
        );
        assert!(dangling.is_err());

        Ok(())
    }

    #[test]
    fn migrate_is_idempotent_and_reports_version() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        let before = store.schema_status()?;
        assert_eq!(before.current_version, 0);
        assert_eq!(before.pending_versions, vec![1]);

        store.migrate()?;
        store.migrate()?;
        let after = store.schema_status()?;
        assert_eq!(after.current_version, LATEST_SCHEMA_VERSION);
        assert!(after.pending_versions.is_empty());
        Ok(())
    }

    #[test]
    fn upsert_node_keeps_created_at_and_overwrites_content() -> Result<()> {
        let mut store = memory_store()?;
        let id = NodeId::new("requirement:retries");
        let first = store.upsert_node(&id, NodeKind::Requirement, "retry twice")?;
        let second = store.upsert_node(&id, NodeKind::Requirement, "retry three times")?;

        assert_eq!(second.content, "retry three times");
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(store.get_node(&id)?, Some(second));
        Ok(())
    }

    // Test IDs: TSG-GRAPH-002
    #[test]
    fn add_edge_to_missing_node_is_not_found_and_changes_nothing() -> Result<()> {
        let mut store = memory_store()?;
        let a = NodeId::new("requirement:a");
        store.upsert_node(&a, NodeKind::Requirement, "a")?;
        let before = store.checksum()?;

        let ghost = NodeId::new("requirement:ghost");
        for (source, target) in [(&a, &ghost), (&ghost, &a)] {
            let err = store
                .add_edge(source, target, Relation::DependsOn)
                .err()
                .unwrap_or_else(|| panic!("edge {source} -> {target} must fail"));
            assert!(matches!(graph_error(&err), GraphError::NotFound(_)));
            assert_eq!(store.checksum()?, before);
        }
        assert!(store.edges_for_node(&a)?.is_empty());
        Ok(())
    }

    #[test]
    fn duplicate_edges_are_stored_once() -> Result<()> {
        let mut store = memory_store()?;
        let a = NodeId::new("requirement:a");
        let b = NodeId::new("requirement:b");
        store.upsert_node(&a, NodeKind::Requirement, "a")?;
        store.upsert_node(&b, NodeKind::Requirement, "b")?;

        assert!(store.add_edge(&a, &b, Relation::DependsOn)?);
        assert!(!store.add_edge(&a, &b, Relation::DependsOn)?);
        assert!(store.add_edge(&a, &b, Relation::Impacts)?);
        assert_eq!(store.edges_for_node(&a)?.len(), 2);
        Ok(())
    }

    // Test IDs: TSG-GRAPH-003
    #[test]
    fn deleting_a_node_cascades_to_anchors_and_edges() -> Result<()> {
        let mut store = memory_store()?;
        store.index_symbols("a.py", &[extracted("function:foo", "x = 1", 1)])?;
        let foo = NodeId::code("a.py", &symbol("function:foo"));
        let thought = store.add_thought("a.py", &symbol("function:foo"), "keep it tiny")?;

        assert!(store.delete_node(&foo)?);
        assert!(store.anchor_for_symbol("a.py", &symbol("function:foo"))?.is_none());
        assert!(store.edges_for_node(&thought.id)?.is_empty());
        assert!(store.get_node(&thought.id)?.is_some(), "thought nodes are not cascaded");
        assert!(!store.delete_node(&foo)?);
        Ok(())
    }

    #[test]
    fn upsert_anchor_replaces_the_previous_binding() -> Result<()> {
        let mut store = memory_store()?;
        let foo = symbol("function:foo");
        let first = NodeId::new("requirement:one");
        let second = NodeId::new("requirement:two");
        store.upsert_node(&first, NodeKind::Requirement, "one")?;
        store.upsert_node(&second, NodeKind::Requirement, "two")?;

        store.upsert_anchor(&first, "a.py", &foo, &content_digest("x=1"), 3)?;
        store.upsert_anchor(&second, "a.py", &foo, &content_digest("x=1"), 4)?;

        let anchors = store.anchors_for_file("a.py")?;
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].node_id, second);
        assert_eq!(anchors[0].start_line, 4);

        let err = store
            .upsert_anchor(&NodeId::new("requirement:none"), "a.py", &foo, "h", 1)
            .err()
            .unwrap_or_else(|| panic!("anchor for a missing node must fail"));
        assert!(matches!(graph_error(&err), GraphError::NotFound(_)));
        Ok(())
    }

    // Test IDs: TSG-DB-008
    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let store = memory_store()?;
        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        assert_eq!(report.schema_status.current_version, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn open_creates_missing_parent_directories() -> Result<()> {
        let root = std::env::temp_dir().join(format!("shadowgraph-open-{}", Ulid::new()));
        let db_path = root.join("nested").join("shadow.db");
        {
            let mut store = SqliteStore::open(&db_path)?;
            store.migrate()?;
        }
        assert!(db_path.exists());
        fs::remove_dir_all(&root)
            .with_context(|| format!("failed to cleanup {}", root.display()))?;
        Ok(())
    }

    // Test IDs: TSG-CONC-001
    #[test]
    fn concurrent_writers_and_readers_preserve_integrity() -> Result<()> {
        let db_path =
            std::env::temp_dir().join(format!("shadowgraph-concurrency-{}.db", Ulid::new()));
        {
            let mut init = SqliteStore::open(&db_path)?;
            init.migrate()?;
        }

        let writer_threads = 4;
        let writes_per_thread = 15;
        let mut handles = Vec::new();

        for writer in 0..writer_threads {
            let writer_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let mut store = SqliteStore::open(&writer_path)?;
                let file = format!("mod{writer}.py");
                for index in 0..writes_per_thread {
                    let raw = format!("function:f{index}");
                    store.index_symbols(&file, &[extracted(&raw, &format!("return {index}"), 1)])?;
                }
                Ok(())
            }));
        }
        for _ in 0..2 {
            let reader_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let store = SqliteStore::open(&reader_path)?;
                for _ in 0..20 {
                    let _ = store.serialize()?;
                }
                Ok(())
            }));
        }

        for handle in handles {
            let Ok(thread_result) = handle.join() else {
                return Err(anyhow!("concurrency thread panicked"));
            };
            thread_result?;
        }

        let store = SqliteStore::open(&db_path)?;
        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        for writer in 0..writer_threads {
            let file = format!("mod{writer}.py");
            // Symbols missing from a later extraction stay behind as stale anchors.
            assert_eq!(store.anchors_for_file(&file)?.len(), writes_per_thread);
            assert_eq!(store.stale_anchors(&file)?.len(), writes_per_thread - 1);
        }

        for suffix in ["", "-wal", "-shm"] {
            let path = std::path::PathBuf::from(format!("{}{}", db_path.display(), suffix));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to cleanup sqlite file {}", path.display()))?;
            }
        }

        Ok(())
    }
}
