//! TC-006: Provisioning and teardown ordering.
//!
//! Kahn's algorithm over the dependency graph. Among nodes whose
//! dependencies are all met, the earliest-declared goes first, so unchanged
//! input always yields the same order. Teardown is the exact reverse; a
//! partial teardown never removes a node that a surviving node still needs.

use super::error::{CompileError, Result};
use super::graph::DependencyGraph;
use std::collections::{BTreeSet, VecDeque};

/// Provisioning order: every node after all the nodes it needs.
pub fn order(graph: &DependencyGraph) -> Result<Vec<String>> {
    let n = graph.len();
    let mut in_degree: Vec<usize> = (0..n).map(|i| graph.needs_of(i).len()).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(current) = ready.pop_first() {
        order.push(graph.id(current).to_string());
        for &waiting in graph.needed_by_of(current) {
            in_degree[waiting] -= 1;
            if in_degree[waiting] == 0 {
                ready.insert(waiting);
            }
        }
    }

    if order.len() != n {
        let remaining: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
        return Err(CompileError::CycleDetected {
            cycle: shortest_cycle(graph, &remaining),
        });
    }
    Ok(order)
}

/// Teardown order: the exact reverse of provisioning order.
pub fn teardown_order(order: &[String]) -> Vec<String> {
    order.iter().rev().cloned().collect()
}

/// Teardown sequence for a subset of nodes, taken from the reverse of
/// `order`.
///
/// Fails with `DependentsStillPresent` when a target is still needed by a
/// node that is not itself being torn down.
pub fn plan_teardown(
    graph: &DependencyGraph,
    order: &[String],
    targets: &[&str],
) -> Result<Vec<String>> {
    let mut torn = BTreeSet::new();
    for target in targets {
        let index = graph
            .index_of(target)
            .ok_or_else(|| CompileError::DanglingReference {
                from: "teardown".to_string(),
                to: target.to_string(),
            })?;
        torn.insert(index);
    }

    let sequence: Vec<String> = order
        .iter()
        .rev()
        .filter(|id| graph.index_of(id).is_some_and(|i| torn.contains(&i)))
        .cloned()
        .collect();

    for id in &sequence {
        let Some(i) = graph.index_of(id) else {
            continue;
        };
        let live: Vec<String> = graph
            .needed_by_of(i)
            .iter()
            .filter(|j| !torn.contains(j))
            .map(|&j| graph.id(j).to_string())
            .collect();
        if !live.is_empty() {
            return Err(CompileError::DependentsStillPresent {
                node: id.clone(),
                dependents: live,
            });
        }
    }
    Ok(sequence)
}

/// Check a caller-supplied teardown sequence against the graph: each node
/// must come after every node still alive that needs it.
pub fn verify_teardown(graph: &DependencyGraph, sequence: &[String]) -> Result<()> {
    let mut alive: BTreeSet<usize> = (0..graph.len()).collect();
    for id in sequence {
        let i = graph
            .index_of(id)
            .ok_or_else(|| CompileError::DanglingReference {
                from: "teardown".to_string(),
                to: id.clone(),
            })?;
        let live: Vec<String> = graph
            .needed_by_of(i)
            .iter()
            .filter(|&&j| j != i && alive.contains(&j))
            .map(|&j| graph.id(j).to_string())
            .collect();
        if !live.is_empty() {
            return Err(CompileError::DependentsStillPresent {
                node: id.clone(),
                dependents: live,
            });
        }
        alive.remove(&i);
    }
    Ok(())
}

/// Shortest cycle among the unordered nodes, closed (first id repeated last).
/// Ties go to the earliest-declared starting node.
fn shortest_cycle(graph: &DependencyGraph, remaining: &BTreeSet<usize>) -> Vec<String> {
    let mut best: Option<Vec<usize>> = None;

    for &start in remaining {
        let mut parent: Vec<Option<usize>> = vec![None; graph.len()];
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut closing = None;

        'bfs: while let Some(current) = queue.pop_front() {
            for &next in graph.needs_of(current) {
                if !remaining.contains(&next) {
                    continue;
                }
                if next == start {
                    closing = Some(current);
                    break 'bfs;
                }
                if seen.insert(next) {
                    parent[next] = Some(current);
                    queue.push_back(next);
                }
            }
        }

        let Some(last) = closing else {
            continue;
        };
        let mut path = vec![last];
        let mut cursor = last;
        while let Some(p) = parent[cursor] {
            path.push(p);
            cursor = p;
        }
        path.reverse();
        path.push(start);

        if best.as_ref().is_none_or(|b| path.len() < b.len()) {
            best = Some(path);
        }
    }

    best.unwrap_or_default()
        .into_iter()
        .map(|i| graph.id(i).to_string())
        .collect()
}
