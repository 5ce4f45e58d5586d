//! Bounded-depth traversal over the merged dependency edge view. Visited
//! nodes are never re-expanded, so cyclic graphs terminate in one pass per
//! node; the cycle flag comes from an SCC check on the collected subgraph.

use std::collections::HashSet;

use crate::cycles;
use crate::error::EngineError;
use crate::models::dependency::{DependencyEdge, Direction, Subgraph};
use crate::store::Store;

pub fn traverse(
    store: &Store,
    start: &str,
    direction: Direction,
    max_depth: u32,
    include_stale: bool,
) -> Result<Subgraph, EngineError> {
    let max_depth = max_depth.max(1);

    let mut nodes: HashSet<String> = HashSet::new();
    let mut edges: Vec<DependencyEdge> = Vec::new();
    let mut seen_edges: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier: Vec<String> = vec![start.to_string()];
    visited.insert(start.to_string());
    let mut reached_depth = 0u32;

    for depth in 1..=max_depth {
        let mut next: Vec<String> = Vec::new();
        for node in frontier.drain(..) {
            let mut adjacent: Vec<(DependencyEdge, String)> = Vec::new();
            if matches!(direction, Direction::Downstream | Direction::Both) {
                for edge in store
                    .edges_from(&node, include_stale)
                    .map_err(EngineError::storage)?
                {
                    let neighbor = edge.target_id.clone();
                    adjacent.push((edge, neighbor));
                }
            }
            if matches!(direction, Direction::Upstream | Direction::Both) {
                for edge in store
                    .edges_to(&node, include_stale)
                    .map_err(EngineError::storage)?
                {
                    let neighbor = edge.source_id.clone();
                    adjacent.push((edge, neighbor));
                }
            }

            for (edge, neighbor) in adjacent {
                if seen_edges.insert(edge.id.clone()) {
                    nodes.insert(edge.source_id.clone());
                    nodes.insert(edge.target_id.clone());
                    edges.push(edge);
                }
                if visited.insert(neighbor.clone()) {
                    next.push(neighbor);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        reached_depth = depth;
        frontier = next;
    }

    let pairs: Vec<(String, String)> = edges
        .iter()
        .map(|e| (e.source_id.clone(), e.target_id.clone()))
        .collect();
    let has_cycle = !cycles::strongly_connected_components(&pairs).is_empty();

    let mut node_list: Vec<String> = nodes.into_iter().collect();
    node_list.sort();

    Ok(Subgraph {
        nodes: node_list,
        edges,
        reached_depth,
        has_cycle,
    })
}
