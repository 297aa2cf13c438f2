//! Bounded breadth-first blast-radius exploration.
//!
//! Node ids are interned into an arena as they are discovered, so the
//! visited set is a slot lookup and work is proportional to the part of the
//! graph actually reached. The walk is iterative and terminates on cyclic
//! graphs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::{Edge, NodeId, Relation};

/// Upper bound applied to any requested depth.
pub const MAX_BLAST_RADIUS_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Outgoing `DEPENDS_ON` edges: what the node relies on.
    Dependencies,
    /// Incoming `DEPENDS_ON` and outgoing `IMPACTS` edges: what relies on the node.
    Dependents,
}

/// One-hop neighbour lookup used by [`explore`].
pub trait Adjacency {
    type Error;

    /// Neighbours of `node` one hop away in `direction`.
    ///
    /// # Errors
    /// Implementation-defined lookup failures.
    fn step(&self, node: &NodeId, direction: Direction) -> Result<Vec<NodeId>, Self::Error>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
pub struct Reached {
    pub depth: usize,
    pub id: NodeId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Radius {
    pub dependencies: Vec<Reached>,
    pub dependents: Vec<Reached>,
}

/// Breadth-first walk from `origin` up to `max_depth` hops.
///
/// Each node is reported once, at the depth where it was first seen. The
/// origin is never part of the result. Output is ordered by `(depth, id)`.
///
/// # Errors
/// Propagates the first error returned by `graph`.
pub fn explore<A: Adjacency>(
    graph: &A,
    origin: &NodeId,
    direction: Direction,
    max_depth: usize,
) -> Result<Vec<Reached>, A::Error> {
    let max_depth = max_depth.min(MAX_BLAST_RADIUS_DEPTH);
    let mut arena = vec![origin.clone()];
    let mut slots = HashMap::from([(origin.clone(), 0_usize)]);
    let mut depths = vec![0_usize];
    let mut queue = VecDeque::from([0_usize]);

    while let Some(slot) = queue.pop_front() {
        let depth = depths[slot];
        if depth >= max_depth {
            continue;
        }
        for neighbour in graph.step(&arena[slot], direction)? {
            if slots.contains_key(&neighbour) {
                continue;
            }
            let next = arena.len();
            slots.insert(neighbour.clone(), next);
            arena.push(neighbour);
            depths.push(depth + 1);
            queue.push_back(next);
        }
    }

    let mut reached = arena
        .into_iter()
        .zip(depths)
        .skip(1)
        .map(|(id, depth)| Reached { depth, id })
        .collect::<Vec<_>>();
    reached.sort();
    Ok(reached)
}

/// Run both directions and give every node a single home.
///
/// A node found in both directions stays in the one where it is shallower.
/// On equal depth it is reported under dependencies.
///
/// # Errors
/// Propagates the first error returned by `graph`.
pub fn partition_radius<A: Adjacency>(
    graph: &A,
    origin: &NodeId,
    max_depth: usize,
) -> Result<Radius, A::Error> {
    let dependencies = explore(graph, origin, Direction::Dependencies, max_depth)?;
    let dependents = explore(graph, origin, Direction::Dependents, max_depth)?;

    let dependency_depths =
        dependencies.iter().map(|reached| (&reached.id, reached.depth)).collect::<HashMap<_, _>>();
    let dependent_depths =
        dependents.iter().map(|reached| (&reached.id, reached.depth)).collect::<HashMap<_, _>>();

    let kept_dependencies = dependencies
        .iter()
        .filter(|reached| {
            dependent_depths.get(&reached.id).map_or(true, |other| reached.depth <= *other)
        })
        .cloned()
        .collect();
    let kept_dependents = dependents
        .iter()
        .filter(|reached| {
            dependency_depths.get(&reached.id).map_or(true, |other| reached.depth < *other)
        })
        .cloned()
        .collect();

    Ok(Radius { dependencies: kept_dependencies, dependents: kept_dependents })
}

/// In-memory adjacency built from an edge list.
#[derive(Debug, Clone, Default)]
pub struct EdgeIndex {
    dependencies: BTreeMap<NodeId, Vec<NodeId>>,
    dependents: BTreeMap<NodeId, Vec<NodeId>>,
}

impl EdgeIndex {
    #[must_use]
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a Edge>) -> Self {
        let mut index = Self::default();
        for edge in edges {
            match edge.relation {
                Relation::DependsOn => {
                    index
                        .dependencies
                        .entry(edge.source_id.clone())
                        .or_default()
                        .push(edge.target_id.clone());
                    index
                        .dependents
                        .entry(edge.target_id.clone())
                        .or_default()
                        .push(edge.source_id.clone());
                }
                Relation::Impacts => {
                    index
                        .dependents
                        .entry(edge.source_id.clone())
                        .or_default()
                        .push(edge.target_id.clone());
                }
                Relation::HasThought | Relation::RequiredBy => {}
            }
        }
        for neighbours in index.dependencies.values_mut().chain(index.dependents.values_mut()) {
            neighbours.sort();
            neighbours.dedup();
        }
        index
    }
}

impl Adjacency for EdgeIndex {
    type Error = Infallible;

    fn step(&self, node: &NodeId, direction: Direction) -> Result<Vec<NodeId>, Self::Error> {
        let table = match direction {
            Direction::Dependencies => &self.dependencies,
            Direction::Dependents => &self.dependents,
        };
        Ok(table.get(node).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn id(raw: &str) -> NodeId {
        NodeId::new(raw)
    }

    fn depends(source: &str, target: &str) -> Edge {
        Edge::new(id(source), id(target), Relation::DependsOn)
    }

    fn ids(reached: &[Reached]) -> Vec<(&str, usize)> {
        reached.iter().map(|item| (item.id.as_str(), item.depth)).collect()
    }

    fn unwrap_infallible<T>(value: Result<T, Infallible>) -> T {
        match value {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    #[test]
    fn mutual_dependency_terminates_without_duplicates() {
        let edges = [depends("charge", "convert"), depends("convert", "charge")];
        let graph = EdgeIndex::from_edges(&edges);

        for depth in [1, 2, 5, MAX_BLAST_RADIUS_DEPTH + 10] {
            let radius = unwrap_infallible(partition_radius(&graph, &id("charge"), depth));
            assert_eq!(ids(&radius.dependencies), vec![("convert", 1)]);
            assert!(radius.dependents.is_empty(), "convert is reported once, as a dependency");
        }
    }

    #[test]
    fn depth_caps_exploration() {
        let edges = [depends("a", "b"), depends("b", "c"), depends("c", "d")];
        let graph = EdgeIndex::from_edges(&edges);

        let shallow = unwrap_infallible(explore(&graph, &id("a"), Direction::Dependencies, 2));
        assert_eq!(ids(&shallow), vec![("b", 1), ("c", 2)]);

        let none = unwrap_infallible(explore(&graph, &id("a"), Direction::Dependencies, 0));
        assert!(none.is_empty());
    }

    #[test]
    fn shallowest_depth_wins_on_diamonds() {
        let edges = [
            depends("a", "b"),
            depends("b", "d"),
            depends("a", "c"),
            depends("c", "d"),
            depends("a", "d"),
        ];
        let graph = EdgeIndex::from_edges(&edges);
        let reached = unwrap_infallible(explore(&graph, &id("a"), Direction::Dependencies, 3));
        assert_eq!(ids(&reached), vec![("b", 1), ("c", 1), ("d", 1)]);
    }

    #[test]
    fn dependents_follow_incoming_depends_on_and_outgoing_impacts() {
        let edges = [
            depends("caller", "core"),
            Edge::new(id("core"), id("report"), Relation::Impacts),
            Edge::new(id("core"), id("thought:1"), Relation::HasThought),
        ];
        let graph = EdgeIndex::from_edges(&edges);
        let radius = unwrap_infallible(partition_radius(&graph, &id("core"), 1));
        assert!(radius.dependencies.is_empty());
        assert_eq!(ids(&radius.dependents), vec![("caller", 1), ("report", 1)]);
    }

    #[test]
    fn node_in_both_directions_goes_to_the_shallower_side() {
        // x is a dependency at depth 2 and a dependent at depth 1.
        let edges = [depends("o", "m"), depends("m", "x"), depends("x", "o")];
        let graph = EdgeIndex::from_edges(&edges);
        let radius = unwrap_infallible(partition_radius(&graph, &id("o"), 2));
        assert_eq!(ids(&radius.dependencies), vec![("m", 1)]);
        assert_eq!(ids(&radius.dependents), vec![("x", 1)]);
    }

    struct CountingGraph {
        inner: EdgeIndex,
        calls: Cell<usize>,
    }

    impl Adjacency for CountingGraph {
        type Error = Infallible;

        fn step(&self, node: &NodeId, direction: Direction) -> Result<Vec<NodeId>, Infallible> {
            self.calls.set(self.calls.get() + 1);
            self.inner.step(node, direction)
        }
    }

    #[test]
    fn work_is_bounded_by_visited_nodes() {
        let mut edges = vec![depends("root", "near")];
        for index in 0..500 {
            edges.push(depends("far", &format!("leaf{index}")));
        }
        let graph = CountingGraph { inner: EdgeIndex::from_edges(&edges), calls: Cell::new(0) };
        let reached = unwrap_infallible(explore(&graph, &id("root"), Direction::Dependencies, 3));
        assert_eq!(ids(&reached), vec![("near", 1)]);
        assert_eq!(graph.calls.get(), 2);
    }
}
