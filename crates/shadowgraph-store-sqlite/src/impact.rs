use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use shadowgraph_core::{
    partition_radius, Adjacency, Anchor, Direction, GraphError, Node, NodeId, NodeKind, Reached,
    Relation, SymbolKey, MAX_BLAST_RADIUS_DEPTH,
};

use crate::{anchors_for_node, load_node, sort_newest_first, targets_of_kind, SqliteStore};

/// A node reached by the blast-radius walk, with what is attached to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Neighbor {
    pub depth: usize,
    pub node: Node,
    pub anchors: Vec<Anchor>,
    pub thoughts: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Neighborhood {
    pub origin: Neighbor,
    /// Depth asked for by the caller.
    pub requested_depth: usize,
    /// Depth actually walked, at most [`MAX_BLAST_RADIUS_DEPTH`].
    pub max_depth: usize,
    /// Set when `requested_depth` was cut down to `max_depth`.
    pub depth_clamped: bool,
    pub dependencies: Vec<Neighbor>,
    pub dependents: Vec<Neighbor>,
}

impl Neighborhood {
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len() + self.dependents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One-hop lookups straight against the edge table.
struct EdgeTable<'a> {
    conn: &'a Connection,
}

impl Adjacency for EdgeTable<'_> {
    type Error = anyhow::Error;

    fn step(&self, node: &NodeId, direction: Direction) -> Result<Vec<NodeId>> {
        let sql = match direction {
            Direction::Dependencies => {
                "SELECT target_id FROM edges
                 WHERE source_id = ?1 AND relation = 'DEPENDS_ON'
                 ORDER BY 1"
            }
            Direction::Dependents => {
                "SELECT source_id FROM edges WHERE target_id = ?1 AND relation = 'DEPENDS_ON'
                 UNION
                 SELECT target_id FROM edges WHERE source_id = ?1 AND relation = 'IMPACTS'
                 ORDER BY 1"
            }
        };
        let mut stmt = self.conn.prepare_cached(sql).context("failed to prepare neighbour query")?;
        let mut rows = stmt.query(params![node.as_str()])?;
        let mut neighbours = Vec::new();
        while let Some(row) = rows.next()? {
            neighbours.push(NodeId::new(row.get::<_, String>(0)?));
        }
        Ok(neighbours)
    }
}

impl SqliteStore {
    /// Find the code node anchored to `symbol`, optionally within one file.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] when no anchor matches and
    /// [`GraphError::Validation`] when the symbol is anchored in several files
    /// and no file was given.
    pub fn resolve_symbol(&self, file_path: Option<&str>, symbol: &SymbolKey) -> Result<NodeId> {
        if let Some(file_path) = file_path {
            return match self.anchor_for_symbol(file_path, symbol)? {
                Some(anchor) => Ok(anchor.node_id),
                None => Err(GraphError::NotFound(format!("symbol {symbol} in {file_path}")).into()),
            };
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT node_id, file_path FROM anchors WHERE symbol_name = ?1 ORDER BY file_path",
            )
            .context("failed to prepare symbol lookup")?;
        let mut rows = stmt.query(params![symbol.to_string()])?;
        let mut matches = Vec::new();
        while let Some(row) = rows.next()? {
            matches.push((row.get::<_, String>(0)?, row.get::<_, String>(1)?));
        }

        match matches.as_slice() {
            [] => Err(GraphError::NotFound(format!("symbol {symbol}")).into()),
            [(node_id, _)] => Ok(NodeId::new(node_id.clone())),
            many => Err(GraphError::Validation(format!(
                "symbol {symbol} is anchored in {} files ({}); pass a file path",
                many.len(),
                many.iter().map(|(_, file)| file.as_str()).collect::<Vec<_>>().join(", ")
            ))
            .into()),
        }
    }

    /// Nodes within `max_depth` hops of `origin`, split into dependencies
    /// and dependents.
    ///
    /// Depth is clamped to [`MAX_BLAST_RADIUS_DEPTH`]; a clamp is logged and
    /// flagged in [`Neighborhood::depth_clamped`]. Each neighbour appears
    /// once, in the direction where it is shallower (dependencies on a tie),
    /// and lists are ordered by `(depth, id)`. All reads share one snapshot.
    ///
    /// # Errors
    /// Returns [`GraphError::NotFound`] when `origin` does not exist.
    pub fn blast_radius(&self, origin: &NodeId, requested_depth: usize) -> Result<Neighborhood> {
        let snapshot = self.conn.unchecked_transaction().context("failed to open read snapshot")?;
        let origin_node = load_node(&snapshot, origin)?
            .ok_or_else(|| GraphError::NotFound(format!("node {origin}")))?;
        let max_depth = requested_depth.min(MAX_BLAST_RADIUS_DEPTH);
        let depth_clamped = max_depth < requested_depth;
        if depth_clamped {
            tracing::warn!(
                "blast radius depth {requested_depth} for {origin} clamped to {max_depth}"
            );
        }

        let radius = partition_radius(&EdgeTable { conn: &snapshot }, origin, max_depth)?;
        let neighborhood = Neighborhood {
            origin: neighbor(&snapshot, 0, origin_node)?,
            requested_depth,
            max_depth,
            depth_clamped,
            dependencies: hydrate(&snapshot, &radius.dependencies)?,
            dependents: hydrate(&snapshot, &radius.dependents)?,
        };
        snapshot.finish().context("failed to close read snapshot")?;

        tracing::debug!(
            "blast radius of {origin} at depth {max_depth}: {} dependencies, {} dependents",
            neighborhood.dependencies.len(),
            neighborhood.dependents.len()
        );
        Ok(neighborhood)
    }
}

fn hydrate(conn: &Connection, reached: &[Reached]) -> Result<Vec<Neighbor>> {
    reached
        .iter()
        .map(|item| {
            let node = load_node(conn, &item.id)?
                .ok_or_else(|| anyhow!("edge points at missing node {}", item.id))?;
            neighbor(conn, item.depth, node)
        })
        .collect()
}

fn neighbor(conn: &Connection, depth: usize, node: Node) -> Result<Neighbor> {
    let anchors = anchors_for_node(conn, &node.id)?;
    let mut thoughts = targets_of_kind(conn, &node.id, Relation::HasThought, &[NodeKind::Thought])?;
    sort_newest_first(&mut thoughts);
    Ok(Neighbor { depth, node, anchors, thoughts })
}
