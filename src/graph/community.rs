//! Greedy modularity community detection, the Rust equivalent of
//! `networkx.algorithms.community.greedy_modularity_communities` used by the
//! orchestrator's `build_communities`. No off-the-shelf Louvain/greedy-
//! modularity crate appears in the retrieval pack, so this implements the
//! classic CNM agglomerative merge directly over the call graph's
//! undirected projection.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};

use super::{EdgeKind, NodeData};

/// A detected community: the set of qualified node IDs belonging to it.
#[derive(Debug, Clone)]
pub struct Community {
    pub members: HashSet<String>,
}

const MIN_NODES_FOR_DETECTION: usize = 10;

/// Run greedy modularity maximization. Returns `None` for graphs too small
/// to bother partitioning, matching the orchestrator's `< 10 nodes` guard.
pub fn detect(graph: &DiGraph<NodeData, EdgeKind>) -> Option<Vec<Community>> {
    let n = graph.node_count();
    if n < MIN_NODES_FOR_DETECTION {
        return None;
    }

    // Build undirected adjacency (unweighted — call direction doesn't matter
    // for structural community membership).
    let mut adjacency: HashMap<NodeIndex, HashSet<NodeIndex>> = HashMap::new();
    for idx in graph.node_indices() {
        adjacency.entry(idx).or_default();
    }
    for edge in graph.edge_indices() {
        if let Some((a, b)) = graph.edge_endpoints(edge) {
            if a != b {
                adjacency.entry(a).or_default().insert(b);
                adjacency.entry(b).or_default().insert(a);
            }
        }
    }

    let m: f64 = adjacency.values().map(|s| s.len()).sum::<usize>() as f64 / 2.0;
    if m == 0.0 {
        return Some(
            adjacency
                .keys()
                .map(|&idx| Community { members: [graph[idx].id.clone()].into_iter().collect() })
                .collect(),
        );
    }

    let degree: HashMap<NodeIndex, f64> =
        adjacency.iter().map(|(&idx, neighbors)| (idx, neighbors.len() as f64)).collect();

    // Each node starts in its own community.
    let mut membership: HashMap<NodeIndex, usize> =
        adjacency.keys().enumerate().map(|(i, &idx)| (idx, i)).collect();
    let mut communities: HashMap<usize, HashSet<NodeIndex>> = HashMap::new();
    for (&idx, &comm) in &membership {
        communities.entry(comm).or_default().insert(idx);
    }

    // Greedily merge the pair of communities that most increases modularity,
    // until no merge improves it.
    loop {
        let comm_ids: Vec<usize> = communities.keys().copied().collect();
        if comm_ids.len() <= 1 {
            break;
        }

        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..comm_ids.len() {
            for j in (i + 1)..comm_ids.len() {
                let (ci, cj) = (comm_ids[i], comm_ids[j]);
                let edges_between: f64 = communities[&ci]
                    .iter()
                    .map(|&a| {
                        adjacency[&a]
                            .iter()
                            .filter(|b| communities[&cj].contains(b))
                            .count() as f64
                    })
                    .sum();
                if edges_between == 0.0 {
                    continue;
                }
                let degree_i: f64 = communities[&ci].iter().map(|a| degree[a]).sum();
                let degree_j: f64 = communities[&cj].iter().map(|a| degree[a]).sum();
                let delta_q = edges_between / m - (degree_i * degree_j) / (2.0 * m * m);
                if best.map(|(_, _, best_q)| delta_q > best_q).unwrap_or(true) {
                    best = Some((ci, cj, delta_q));
                }
            }
        }

        match best {
            Some((ci, cj, delta_q)) if delta_q > 0.0 => {
                let moved: Vec<NodeIndex> = communities[&cj].iter().copied().collect();
                for node in moved {
                    communities.get_mut(&ci).unwrap().insert(node);
                    membership.insert(node, ci);
                }
                communities.remove(&cj);
            }
            _ => break,
        }
    }

    Some(
        communities
            .into_values()
            .map(|members| Community {
                members: members.into_iter().map(|idx| graph[idx].id.clone()).collect(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CodeGraph;

    #[test]
    fn small_graphs_skip_detection() {
        let mut graph = CodeGraph::new();
        for i in 0..5 {
            graph.add_function(&format!("f{i}"), "a.py", i);
        }
        graph.build_communities();
        assert!(graph.communities().is_none());
    }

    #[test]
    fn two_dense_clusters_separate() {
        let mut graph = CodeGraph::new();
        // Cluster A: fully connected triangle-ish cluster of 6 functions.
        for i in 0..6 {
            graph.add_function(&format!("a{i}"), "a.py", i);
        }
        for i in 0..6 {
            for j in 0..6 {
                if i != j {
                    graph.add_call(&format!("a{i}"), &format!("a{j}"), "a.py");
                }
            }
        }
        // Cluster B: same shape, file b.py, connected to A by a single edge.
        for i in 0..6 {
            graph.add_function(&format!("b{i}"), "b.py", i);
        }
        for i in 0..6 {
            for j in 0..6 {
                if i != j {
                    graph.add_call(&format!("b{i}"), &format!("b{j}"), "b.py");
                }
            }
        }
        graph.add_call("a0", "b0", "a.py");

        graph.build_communities();
        let comms = graph.communities().unwrap();
        assert!(comms.len() >= 2);
    }
}
