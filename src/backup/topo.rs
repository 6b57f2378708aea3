//! Kahn's algorithm over an adjacency list.
//!
//! An edge `a -> b` in the input means "a depends on b". With `reverse` set
//! the edges are inverted before in-degrees are counted, so the produced order
//! lists every node after all of its dependencies. Without `reverse` the edges
//! are taken as given and the order lists every node before its targets.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Node to the nodes it points at. Duplicate targets are allowed.
pub type AdjacencyList<T> = BTreeMap<T, Vec<T>>;

/// Drops repeated targets, keeping the first occurrence of each.
fn dedup_edges<T: Ord + Clone>(edges: &[T]) -> Vec<T> {
    let mut seen = BTreeSet::new();
    edges.iter().filter(|target| seen.insert(*target)).cloned().collect()
}

pub fn topological_sort<T: Ord + Clone>(adjacency: &AdjacencyList<T>, reverse: bool) -> Result<Vec<T>> {
    if adjacency.is_empty() {
        return Ok(Vec::new());
    }

    // every key keeps its slot and edge targets that are not keys become
    // isolated nodes
    let mut graph: AdjacencyList<T> = adjacency
        .iter()
        .map(|(node, edges)| (node.clone(), dedup_edges(edges)))
        .collect();
    for edges in adjacency.values() {
        for target in edges {
            graph.entry(target.clone()).or_default();
        }
    }

    if reverse {
        let mut reversed: AdjacencyList<T> = graph.keys().map(|node| (node.clone(), Vec::new())).collect();
        for (node, edges) in &graph {
            for target in edges {
                reversed.entry(target.clone()).or_default().push(node.clone());
            }
        }
        graph = reversed;
    }

    let mut indegree: BTreeMap<&T, usize> = graph.keys().map(|node| (node, 0)).collect();
    for edges in graph.values() {
        for target in edges {
            *indegree.entry(target).or_default() += 1;
        }
    }

    let mut queue: VecDeque<&T> = graph
        .keys()
        .filter(|node| indegree.get(node).copied().unwrap_or_default() == 0)
        .collect();

    let mut result = Vec::with_capacity(graph.len());
    while let Some(current) = queue.pop_front() {
        result.push(current.clone());
        for target in graph.get(current).into_iter().flatten() {
            if let Some(degree) = indegree.get_mut(target) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(target);
                }
            }
        }
    }

    if result.len() != graph.len() {
        return Err(Error::CyclicDependency);
    }

    Ok(result)
}
