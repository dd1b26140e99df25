//! Code graph (part of C4/C3): a directed graph of `calls`/`imports` edges
//! between qualified (`file::symbol`) nodes, with community detection for
//! same-community-first caller ordering and full descendant-closure impact
//! analysis. Grounded on the orchestrator's NetworkX `CodeGraph`.

pub mod community;

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::kv::KvStore;

pub use community::Community;

/// Key schema per spec §4.1: `code_graph:{state,version,v<N>,latest}`.
const STATE_KEY: &str = "code_graph:state";
const VERSION_KEY: &str = "code_graph:version";
const LATEST_KEY: &str = "code_graph:latest";
fn versioned_key(n: u64) -> String {
    format!("code_graph:v{n}")
}

/// Graph version entries get a 24h TTL, per spec §4.1.
const GRAPH_TTL_SECS: u64 = 24 * 60 * 60;
const MAX_PERSIST_ATTEMPTS: usize = 3;

/// Node kind in the call/import graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Function,
    Class,
    Module,
    /// Referenced but never given a defining node (e.g. an external symbol).
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub community_id: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    Calls,
    Imports,
}

const STDLIB: &[&str] = &[
    "os", "sys", "json", "time", "logging", "pathlib", "typing", "asyncio", "collections",
    "functools", "itertools", "re", "hashlib", "dataclasses", "enum",
];

/// Directed call/import graph with qualified node IDs and optional cached
/// community partition.
#[derive(Default)]
pub struct CodeGraph {
    graph: DiGraph<NodeData, EdgeKind>,
    index: HashMap<String, NodeIndex>,
    pub version: u64,
    communities: Option<Vec<Community>>,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_insert(&mut self, id: &str, kind: NodeKind, name: &str, file: Option<&str>) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(NodeData {
            id: id.to_string(),
            kind,
            name: name.to_string(),
            file: file.map(|s| s.to_string()),
            line: None,
            community_id: None,
        });
        self.index.insert(id.to_string(), idx);
        idx
    }

    pub fn add_function(&mut self, name: &str, file: &str, line: usize) {
        let id = format!("{file}::{name}");
        let idx = self.get_or_insert(&id, NodeKind::Function, name, Some(file));
        self.graph[idx].line = Some(line);
        self.communities = None;
    }

    pub fn add_class(&mut self, name: &str, file: &str, line: usize) {
        let id = format!("{file}::{name}");
        let idx = self.get_or_insert(&id, NodeKind::Class, name, Some(file));
        self.graph[idx].line = Some(line);
        self.communities = None;
    }

    /// Record a call edge. Callees containing `::` are already qualified;
    /// callees with a `.` are treated as external module calls; callees in
    /// the stdlib allowlist are recorded as-is; anything else is assumed
    /// local to `file`.
    pub fn add_call(&mut self, caller: &str, callee: &str, file: &str) {
        let caller_id = if caller.contains("::") { caller.to_string() } else { format!("{file}::{caller}") };
        let callee_id = if callee.contains("::") || callee.contains('.') || STDLIB.contains(&callee) {
            callee.to_string()
        } else {
            format!("{file}::{callee}")
        };

        let caller_idx = self.get_or_insert(&caller_id, NodeKind::Function, caller, Some(file));
        let callee_name = callee_id.rsplit("::").next().unwrap_or(&callee_id);
        let callee_idx = self.get_or_insert(&callee_id, NodeKind::Unknown, callee_name, None);

        self.graph.add_edge(caller_idx, callee_idx, EdgeKind::Calls);
        self.communities = None;
    }

    pub fn add_import(&mut self, importer_file: &str, imported: &str) {
        let importer_id = format!("{importer_file}::module");
        let importer_idx = self.get_or_insert(&importer_id, NodeKind::Module, importer_file, Some(importer_file));
        let imported_idx = self.get_or_insert(imported, NodeKind::Module, imported, None);
        self.graph.add_edge(importer_idx, imported_idx, EdgeKind::Imports);
        self.communities = None;
    }

    fn resolve(&self, symbol: &str) -> Vec<NodeIndex> {
        if let Some(&idx) = self.index.get(symbol) {
            return vec![idx];
        }
        let suffix = format!("::{symbol}");
        self.index
            .iter()
            .filter(|(id, _)| id.ends_with(&suffix))
            .map(|(_, &idx)| idx)
            .collect()
    }

    /// Direct predecessors. When communities have been built, callers in the
    /// same community as the target are returned first.
    pub fn find_callers(&self, symbol: &str) -> Vec<String> {
        let targets = self.resolve(symbol);
        if targets.is_empty() {
            return Vec::new();
        }

        let mut callers: HashSet<NodeIndex> = HashSet::new();
        for target in &targets {
            for neighbor in self.graph.neighbors_directed(*target, petgraph::Direction::Incoming) {
                callers.insert(neighbor);
            }
        }

        let target_community = self.communities.as_ref().and_then(|comms| {
            targets.iter().find_map(|t| {
                comms.iter().position(|c| c.members.contains(&self.graph[*t].id))
            })
        });

        let mut same_community = Vec::new();
        let mut other = Vec::new();
        for caller in callers {
            let node = &self.graph[caller];
            let in_same = match (target_community, node.community_id) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            if in_same {
                same_community.push(node.id.clone());
            } else {
                other.push(node.id.clone());
            }
        }
        same_community.sort();
        other.sort();
        same_community.into_iter().chain(other).collect()
    }

    /// Full descendant closure: everything reachable by following call edges
    /// forward from any node matching `symbol`.
    pub fn impact_analysis(&self, symbol: &str) -> Vec<String> {
        let targets = self.resolve(symbol);
        if targets.is_empty() {
            return Vec::new();
        }
        let mut descendants = HashSet::new();
        for target in targets {
            let mut dfs = Dfs::new(&self.graph, target);
            dfs.next(&self.graph); // skip the start node itself
            while let Some(node) = dfs.next(&self.graph) {
                descendants.insert(self.graph[node].id.clone());
            }
        }
        let mut out: Vec<String> = descendants.into_iter().collect();
        out.sort();
        out
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn build_communities(&mut self) {
        self.communities = community::detect(&self.graph);
        if let Some(comms) = &self.communities {
            for (comm_id, comm) in comms.iter().enumerate() {
                for member in &comm.members {
                    if let Some(&idx) = self.index.get(member) {
                        self.graph[idx].community_id = Some(comm_id);
                    }
                }
            }
        }
    }

    pub fn communities(&self) -> Option<&[Community]> {
        self.communities.as_deref()
    }

    /// Snapshot for persistence / for the HMN melodic-line detector, which
    /// needs the raw edge list rather than a petgraph handle.
    pub fn edge_snapshot(&self) -> Vec<(String, String)> {
        self.graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                Some((self.graph[a].id.clone(), self.graph[b].id.clone()))
            })
            .collect()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.graph.node_weights().map(|n| n.id.clone()).collect()
    }
}

/// Serializable form used by the KV persistence layer.
#[derive(Serialize, Deserialize)]
pub struct CodeGraphSnapshot {
    pub version: u64,
    pub nodes: Vec<NodeData>,
    pub edges: Vec<(String, String, EdgeKind)>,
}

impl CodeGraph {
    pub fn to_snapshot(&self) -> CodeGraphSnapshot {
        let nodes = self.graph.node_weights().cloned().collect();
        let edges = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                Some((self.graph[a].id.clone(), self.graph[b].id.clone(), self.graph[e]))
            })
            .collect();
        CodeGraphSnapshot { version: self.version, nodes, edges }
    }

    pub fn from_snapshot(snapshot: CodeGraphSnapshot) -> Self {
        let mut graph = CodeGraph { version: snapshot.version, ..Default::default() };
        for node in snapshot.nodes {
            let idx = graph.graph.add_node(node.clone());
            graph.index.insert(node.id.clone(), idx);
        }
        for (a, b, kind) in snapshot.edges {
            if let (Some(&ia), Some(&ib)) = (graph.index.get(&a), graph.index.get(&b)) {
                graph.graph.add_edge(ia, ib, kind);
            }
        }
        graph
    }

    /// Persist under the §4.1 optimistic-lock schema: read the current
    /// version of `code_graph:state`, then atomically (per-key CAS) write
    /// the new state, the `code_graph:v<N+1>` archival copy, and the
    /// `code_graph:latest` pointer. Retries up to `MAX_PERSIST_ATTEMPTS`
    /// times on a version conflict against `code_graph:state` (another
    /// writer landed a snapshot in between read and write).
    pub fn persist(&self, kv: &KvStore) -> Result<u64, AppError> {
        for attempt in 0..MAX_PERSIST_ATTEMPTS {
            let (_, current_version): (Option<CodeGraphSnapshot>, u64) = kv.watch(STATE_KEY)?;
            let new_version = current_version + 1;
            let snapshot = {
                let mut s = self.to_snapshot();
                s.version = new_version;
                s
            };

            if kv.write_if_unchanged(STATE_KEY, current_version, &snapshot, Some(GRAPH_TTL_SECS))? {
                kv.set(&versioned_key(new_version), &snapshot, Some(GRAPH_TTL_SECS))?;
                kv.set(VERSION_KEY, &new_version, Some(GRAPH_TTL_SECS))?;
                kv.set(LATEST_KEY, &new_version, Some(GRAPH_TTL_SECS))?;
                return Ok(new_version);
            }
            tracing::debug!(attempt, "code graph persist conflict, retrying");
        }
        Err(AppError::internal(format!(
            "failed to persist code graph after {MAX_PERSIST_ATTEMPTS} attempts (concurrent writer)"
        )))
    }

    /// Load the latest persisted snapshot, if any.
    pub fn load(kv: &KvStore) -> Result<Option<CodeGraph>, AppError> {
        let snapshot: Option<CodeGraphSnapshot> = kv.get(STATE_KEY)?;
        Ok(snapshot.map(CodeGraph::from_snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_callers_returns_direct_predecessors() {
        let mut graph = CodeGraph::new();
        graph.add_function("foo", "a.py", 1);
        graph.add_function("bar", "a.py", 10);
        graph.add_call("bar", "foo", "a.py");

        let callers = graph.find_callers("foo");
        assert_eq!(callers, vec!["a.py::bar"]);
    }

    #[test]
    fn impact_analysis_returns_full_descendant_closure() {
        let mut graph = CodeGraph::new();
        graph.add_function("a", "m.py", 1);
        graph.add_function("b", "m.py", 2);
        graph.add_function("c", "m.py", 3);
        graph.add_call("a", "b", "m.py");
        graph.add_call("b", "c", "m.py");

        let impact = graph.impact_analysis("a");
        assert_eq!(impact, vec!["m.py::b", "m.py::c"]);
    }

    #[test]
    fn absent_symbol_returns_empty() {
        let graph = CodeGraph::new();
        assert!(graph.find_callers("missing").is_empty());
        assert!(graph.impact_analysis("missing").is_empty());
    }

    #[test]
    fn stdlib_callees_are_not_misqualified() {
        let mut graph = CodeGraph::new();
        graph.add_function("main", "m.py", 1);
        graph.add_call("main", "os", "m.py");
        assert!(graph.node_ids().contains(&"os".to_string()));
    }

    fn kv_store() -> KvStore {
        KvStore::new(std::sync::Arc::new(crate::kv::MemoryBackend::new()), "test")
    }

    #[test]
    fn persist_then_load_round_trips_the_graph() {
        let kv = kv_store();
        let mut graph = CodeGraph::new();
        graph.add_function("foo", "a.py", 1);
        graph.add_function("bar", "a.py", 10);
        graph.add_call("bar", "foo", "a.py");

        let version = graph.persist(&kv).unwrap();
        assert_eq!(version, 1);

        let loaded = CodeGraph::load(&kv).unwrap().expect("graph should be persisted");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.find_callers("foo"), vec!["a.py::bar"]);

        let stored_version: u64 = kv.get(VERSION_KEY).unwrap().unwrap();
        assert_eq!(stored_version, 1);
        let latest: u64 = kv.get(LATEST_KEY).unwrap().unwrap();
        assert_eq!(latest, 1);
        let archived: CodeGraphSnapshot = kv.get(&versioned_key(1)).unwrap().unwrap();
        assert_eq!(archived.version, 1);
    }

    #[test]
    fn persist_increments_version_on_each_call() {
        let kv = kv_store();
        let mut graph = CodeGraph::new();
        graph.add_function("foo", "a.py", 1);

        assert_eq!(graph.persist(&kv).unwrap(), 1);
        graph.add_function("bar", "a.py", 2);
        assert_eq!(graph.persist(&kv).unwrap(), 2);

        let loaded = CodeGraph::load(&kv).unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.node_ids().len(), 2);
    }

    /// Testable property #4: two concurrent writers both observing version V
    /// never both commit V+1 — the second writer's stale-version CAS fails.
    #[test]
    fn concurrent_writers_on_the_same_version_cannot_both_commit() {
        let kv = kv_store();
        let mut graph = CodeGraph::new();
        graph.add_function("foo", "a.py", 1);
        graph.persist(&kv).unwrap();

        // Both writers observe version 1 before either writes.
        let (_, observed_version): (Option<CodeGraphSnapshot>, u64) = kv.watch(STATE_KEY).unwrap();
        assert_eq!(observed_version, 1);

        let mut snapshot_a = graph.to_snapshot();
        snapshot_a.version = observed_version + 1;
        let mut snapshot_b = graph.to_snapshot();
        snapshot_b.version = observed_version + 1;

        let writer_a_ok = kv
            .write_if_unchanged(STATE_KEY, observed_version, &snapshot_a, None)
            .unwrap();
        let writer_b_ok = kv
            .write_if_unchanged(STATE_KEY, observed_version, &snapshot_b, None)
            .unwrap();

        assert!(writer_a_ok);
        assert!(!writer_b_ok, "second writer on a stale version must not also succeed");
    }

    #[test]
    fn load_with_no_persisted_graph_returns_none() {
        let kv = kv_store();
        assert!(CodeGraph::load(&kv).unwrap().is_none());
    }
}
