//! Melodic-line (L3) detection: a thematic-weighted PageRank variant over the
//! call graph, followed by weakly-connected-component extraction and a
//! persistence score. The PageRank step matches spec.md §4.4 exactly; the
//! persistence formula is grounded on the original Python's
//! `melodic_detector.py::_compute_persistence`, whose additive
//! connectivity + module/pattern boosts matches spec.md's own prose nearly
//! verbatim.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::graph::CodeGraph;

const DAMPING: f64 = 0.85;
const CONVERGENCE: f64 = 1e-6;
const MAX_ITERATIONS: usize = 100;
const SAME_MODULE_BOOST: f64 = 1.5;
const MIN_COMPONENT_SIZE: usize = 2;
/// Threshold on mean PageRank for a component to be considered "persistent"
/// enough to emit as a melodic line.
const PAGERANK_THRESHOLD: f64 = 0.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MelodicLine {
    pub name: String,
    pub description: String,
    pub persistence_score: f64,
    pub modules: Vec<String>,
    pub patterns: Vec<String>,
}

fn module_of(node_id: &str) -> &str {
    node_id.split("::").next().unwrap_or(node_id)
}

fn tokenize_name(node_id: &str) -> HashSet<String> {
    let name = node_id.rsplit("::").next().unwrap_or(node_id);
    let mut tokens = HashSet::new();
    let mut current = String::new();
    for ch in name.chars() {
        if ch == '_' {
            if !current.is_empty() {
                tokens.insert(std::mem::take(&mut current).to_lowercase());
            }
            continue;
        }
        if ch.is_uppercase() && !current.is_empty() {
            tokens.insert(std::mem::take(&mut current).to_lowercase());
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.insert(current.to_lowercase());
    }
    tokens
}

fn thematic_weight(u: &str, v: &str) -> f64 {
    let tokens_u = tokenize_name(u);
    let tokens_v = tokenize_name(v);
    let weight = if tokens_u.is_empty() || tokens_v.is_empty() {
        0.0
    } else {
        let intersection = tokens_u.intersection(&tokens_v).count() as f64;
        let union = tokens_u.union(&tokens_v).count() as f64;
        if union == 0.0 { 0.0 } else { intersection / union }
    };
    let boosted = if module_of(u) == module_of(v) { weight * SAME_MODULE_BOOST } else { weight };
    boosted.min(1.0)
}

/// Thematic-weighted PageRank over the node set implied by `edges`.
fn thematic_pagerank(nodes: &[String], edges: &[(String, String)]) -> HashMap<String, f64> {
    let n = nodes.len();
    if n == 0 {
        return HashMap::new();
    }

    let mut out_edges: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
    for (u, v) in edges {
        let w = thematic_weight(u, v);
        if w <= 0.0 {
            continue;
        }
        out_edges.entry(u.as_str()).or_default().push((v.as_str(), w));
    }
    let out_weight_sum: HashMap<&str, f64> = out_edges
        .iter()
        .map(|(u, neighbors)| (*u, neighbors.iter().map(|(_, w)| w).sum()))
        .collect();

    let uniform = 1.0 / n as f64;
    let mut rank: HashMap<String, f64> = nodes.iter().map(|n| (n.clone(), uniform)).collect();

    for _ in 0..MAX_ITERATIONS {
        let base = (1.0 - DAMPING) / n as f64;
        let mut next: HashMap<String, f64> = nodes.iter().map(|n| (n.clone(), base)).collect();

        for node in nodes {
            let Some(neighbors) = out_edges.get(node.as_str()) else { continue };
            let total_out = out_weight_sum.get(node.as_str()).copied().unwrap_or(0.0);
            if total_out <= 0.0 {
                continue;
            }
            let contribution = rank[node] * DAMPING;
            for (target, w) in neighbors {
                *next.get_mut(*target).unwrap() += contribution * (w / total_out);
            }
        }

        let delta: f64 = nodes.iter().map(|n| (next[n] - rank[n]).abs()).sum();
        rank = next;
        if delta < CONVERGENCE {
            break;
        }
    }

    rank
}

/// Weakly-connected components of the undirected projection of `edges`,
/// restricted to the node set that appears in `edges`.
fn weakly_connected_components(nodes: &[String], edges: &[(String, String)]) -> Vec<HashSet<String>> {
    let mut adjacency: HashMap<&str, HashSet<&str>> = HashMap::new();
    for n in nodes {
        adjacency.entry(n.as_str()).or_default();
    }
    for (u, v) in edges {
        adjacency.entry(u.as_str()).or_default().insert(v.as_str());
        adjacency.entry(v.as_str()).or_default().insert(u.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut components = Vec::new();
    for n in nodes {
        if visited.contains(n.as_str()) {
            continue;
        }
        let mut stack = vec![n.as_str()];
        let mut component = HashSet::new();
        while let Some(cur) = stack.pop() {
            if !visited.insert(cur) {
                continue;
            }
            component.insert(cur.to_string());
            if let Some(neighbors) = adjacency.get(cur) {
                for &next in neighbors {
                    if !visited.contains(next) {
                        stack.push(next);
                    }
                }
            }
        }
        components.push(component);
    }
    components
}

fn internal_edge_ratio(component: &HashSet<String>, edges: &[(String, String)]) -> f64 {
    let total: usize = edges.iter().filter(|(u, _)| component.contains(u)).count();
    if total == 0 {
        return 0.0;
    }
    let internal = edges
        .iter()
        .filter(|(u, v)| component.contains(u) && component.contains(v))
        .count();
    internal as f64 / total as f64
}

fn longest_common_directory(component: &HashSet<String>) -> String {
    let dirs: Vec<Vec<&str>> = component
        .iter()
        .filter_map(|id| id.split("::").next())
        .map(|file| file.split('/').collect())
        .collect();
    let Some(first) = dirs.first() else { return "unnamed-flow".to_string() };
    let mut common = first.clone();
    for d in &dirs[1..] {
        let shared = common.iter().zip(d.iter()).take_while(|(a, b)| a == b).count();
        common.truncate(shared);
    }
    if common.is_empty() {
        "cross-module-flow".to_string()
    } else {
        common.join("/")
    }
}

/// Detect melodic lines from the code graph's call edges, boosted by which
/// files have an L2 pattern (`l2_by_file`, keyed by file path -> pattern ids).
pub fn detect_melodic_lines(
    graph: &CodeGraph,
    l2_by_file: &HashMap<String, Vec<String>>,
) -> Vec<MelodicLine> {
    let nodes = graph.node_ids();
    let edges = graph.edge_snapshot();
    if nodes.is_empty() || edges.is_empty() {
        return Vec::new();
    }

    let rank = thematic_pagerank(&nodes, &edges);
    let components = weakly_connected_components(&nodes, &edges);

    let mut lines = Vec::new();
    for component in components {
        if component.len() < MIN_COMPONENT_SIZE {
            continue;
        }
        let mean_rank: f64 =
            component.iter().filter_map(|n| rank.get(n)).sum::<f64>() / component.len() as f64;
        if mean_rank <= PAGERANK_THRESHOLD {
            continue;
        }

        let modules: HashSet<String> =
            component.iter().map(|id| module_of(id).to_string()).collect();

        let patterns: Vec<String> = modules
            .iter()
            .filter_map(|m| l2_by_file.get(m))
            .flatten()
            .cloned()
            .collect();

        let connectivity = internal_edge_ratio(&component, &edges);
        let module_boost = (modules.len() as f64 / 10.0).min(0.2);
        let pattern_boost = (patterns.len() as f64 / 10.0).min(0.2);
        let persistence_score = (connectivity + module_boost + pattern_boost).clamp(0.0, 1.0);

        let name = longest_common_directory(&component);
        let description = format!(
            "Thematic flow across {} module(s) and {} pattern(s), connectivity {:.2}",
            modules.len(),
            patterns.len(),
            connectivity
        );

        lines.push(MelodicLine {
            name,
            description,
            persistence_score,
            modules: modules.into_iter().collect(),
            patterns,
        });
    }

    lines.sort_by(|a, b| b.persistence_score.partial_cmp(&a.persistence_score).unwrap_or(std::cmp::Ordering::Equal));
    lines
}
