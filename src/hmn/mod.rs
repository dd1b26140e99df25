//! Hierarchical Memory Network (C4): a 4-level compressed model of the
//! codebase — L0 raw file text, L1 entity spans, L2 co-occurrence patterns,
//! L3 "melodic line" thematic flows — with narrative-aware retrieval.

pub mod melodic;

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::graph::CodeGraph;

pub use melodic::MelodicLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    L0Raw,
    L1Entity,
    L2Pattern,
    L3Flow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmnNode {
    pub id: String,
    pub level: Level,
    pub content: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub entity_kind: Option<String>,
    pub name: Option<String>,
    pub parent_ids: Vec<String>,
    pub child_ids: Vec<String>,
    pub access_count: u64,
}

const MIN_PATTERN_GROUP_SIZE: usize = 3;
const QUERY_RELEVANCE_FLOOR: f64 = 0.1;

/// In-memory HMN. Queries take a read lock, mutations (ingest, re-index)
/// take a write lock, matching spec.md's concurrency model.
pub struct Hmn {
    inner: RwLock<HmnInner>,
}

#[derive(Default)]
struct HmnInner {
    nodes: HashMap<String, HmnNode>,
    melodic_lines: Vec<MelodicLine>,
}

impl Default for Hmn {
    fn default() -> Self {
        Self { inner: RwLock::new(HmnInner::default()) }
    }
}

impl Hmn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a single file: L0 node for the raw text, one L1 node per
    /// top-level function/class chunk. Call edges discovered while chunking
    /// are recorded into `graph` by the caller (see `ingest_with_calls`).
    pub fn ingest_file(&self, file: &str, content: &str, chunks: &[crate::code_service::chunking::Chunk]) {
        let mut inner = self.inner.write().expect("hmn lock poisoned");

        let l0_id = format!("l0::{file}");
        inner.nodes.insert(
            l0_id.clone(),
            HmnNode {
                id: l0_id.clone(),
                level: Level::L0Raw,
                content: content.to_string(),
                file: Some(file.to_string()),
                line: None,
                entity_kind: None,
                name: None,
                parent_ids: Vec::new(),
                child_ids: Vec::new(),
                access_count: 0,
            },
        );

        let mut l1_ids = Vec::new();
        for chunk in chunks {
            let l1_id = format!("l1::{file}::{}", chunk.name);
            l1_ids.push(l1_id.clone());
            inner.nodes.insert(
                l1_id.clone(),
                HmnNode {
                    id: l1_id,
                    level: Level::L1Entity,
                    content: chunk.content.clone(),
                    file: Some(file.to_string()),
                    line: Some(chunk.start_line),
                    entity_kind: Some(chunk.kind.clone()),
                    name: Some(chunk.name.clone()),
                    parent_ids: vec![l0_id.clone()],
                    child_ids: Vec::new(),
                    access_count: 0,
                },
            );
        }

        if let Some(l0) = inner.nodes.get_mut(&l0_id) {
            l0.child_ids = l1_ids;
        }
    }

    /// Re-derive L2 patterns from the current L1 population: group L1 nodes
    /// by file, emit one L2 node per file once it has >= 3 entities.
    pub fn build_patterns(&self) {
        let mut inner = self.inner.write().expect("hmn lock poisoned");
        let mut by_file: HashMap<String, Vec<String>> = HashMap::new();
        for node in inner.nodes.values() {
            if node.level != Level::L1Entity {
                continue;
            }
            if let Some(file) = &node.file {
                by_file.entry(file.clone()).or_default().push(node.id.clone());
            }
        }

        let mut new_l2 = Vec::new();
        for (file, members) in by_file {
            if members.len() < MIN_PATTERN_GROUP_SIZE {
                continue;
            }
            let l2_id = format!("l2::{file}");
            new_l2.push(HmnNode {
                id: l2_id,
                level: Level::L2Pattern,
                content: format!("module pattern over {} entities in {file}", members.len()),
                file: Some(file),
                line: None,
                entity_kind: Some("module_pattern".to_string()),
                name: None,
                parent_ids: members,
                child_ids: Vec::new(),
                access_count: 0,
            });
        }
        for node in new_l2 {
            inner.nodes.insert(node.id.clone(), node);
        }
    }

    /// Run melodic-line (L3) detection over the current graph + L2 patterns.
    pub fn build_melodic_lines(&self, graph: &CodeGraph) {
        let mut inner = self.inner.write().expect("hmn lock poisoned");
        let l2_by_file: HashMap<String, Vec<String>> = inner
            .nodes
            .values()
            .filter(|n| n.level == Level::L2Pattern)
            .filter_map(|n| n.file.clone().map(|f| (f, n.id.clone())))
            .fold(HashMap::new(), |mut acc, (file, id)| {
                acc.entry(file).or_default().push(id);
                acc
            });

        let lines = melodic::detect_melodic_lines(graph, &l2_by_file);

        for (idx, line) in lines.iter().enumerate() {
            let l3_id = format!("l3::{idx}::{}", line.name);
            inner.nodes.insert(
                l3_id.clone(),
                HmnNode {
                    id: l3_id,
                    level: Level::L3Flow,
                    content: line.description.clone(),
                    file: None,
                    line: None,
                    entity_kind: Some("melodic_line".to_string()),
                    name: Some(line.name.clone()),
                    parent_ids: line.patterns.clone(),
                    child_ids: Vec::new(),
                    access_count: 0,
                },
            );
        }
        inner.melodic_lines = lines;
    }

    pub fn melodic_lines(&self) -> Vec<MelodicLine> {
        self.inner.read().expect("hmn lock poisoned").melodic_lines.clone()
    }

    /// Narrative-aware retrieval per spec.md §4.4: rank L3 flows, descend to
    /// L2 -> L1 -> L0, cap at 20 deduplicated entity files.
    pub fn query(&self, task: &str) -> Result<HmnQueryResult, AppError> {
        let mut inner = self.inner.write().expect("hmn lock poisoned");
        let task_keywords = tokenize(task);

        let mut scored: Vec<(f64, String)> = inner
            .melodic_lines
            .iter()
            .map(|line| {
                let name_tokens = tokenize(&line.name);
                let overlap = jaccard(&task_keywords, &name_tokens);
                let score = overlap * 0.6 + line.persistence_score * 0.4;
                (score, line.name.clone())
            })
            .filter(|(score, _)| *score > QUERY_RELEVANCE_FLOOR)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let top_lines: Vec<MelodicLine> = scored
            .into_iter()
            .filter_map(|(_, name)| inner.melodic_lines.iter().find(|l| l.name == name).cloned())
            .take(5)
            .collect();

        let mut pattern_ids: HashSet<String> = HashSet::new();
        for line in &top_lines {
            pattern_ids.extend(line.patterns.iter().cloned());
        }

        let mut entity_ids: HashSet<String> = HashSet::new();
        for pid in &pattern_ids {
            if let Some(pattern) = inner.nodes.get(pid) {
                entity_ids.extend(pattern.parent_ids.iter().cloned());
            }
        }

        let mut files = Vec::new();
        let mut seen_files = HashSet::new();
        for eid in entity_ids.iter().take(40) {
            if files.len() >= 20 {
                break;
            }
            let Some(entity) = inner.nodes.get_mut(eid) else { continue };
            entity.access_count += 1;
            let Some(file) = entity.file.clone() else { continue };
            if seen_files.insert(file.clone()) {
                let content = entity.content.chars().take(2000).collect::<String>();
                files.push((file, content));
            }
        }

        Ok(HmnQueryResult { melodic_lines: top_lines, files })
    }
}

#[derive(Debug, Clone)]
pub struct HmnQueryResult {
    pub melodic_lines: Vec<MelodicLine>,
    pub files: Vec<(String, String)>,
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 { 0.0 } else { intersection / union }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_service::chunking::Chunk;

    #[test]
    fn ingest_creates_l0_and_l1_with_parent_links() {
        let hmn = Hmn::new();
        let chunks = vec![Chunk {
            kind: "function".to_string(),
            name: "foo".to_string(),
            start_line: 1,
            end_line: 2,
            content: "def foo(): pass".to_string(),
        }];
        hmn.ingest_file("a.py", "def foo(): pass", &chunks);

        let inner = hmn.inner.read().unwrap();
        let l1 = inner.nodes.get("l1::a.py::foo").unwrap();
        assert_eq!(l1.parent_ids, vec!["l0::a.py".to_string()]);
        let l0 = inner.nodes.get("l0::a.py").unwrap();
        assert!(l0.child_ids.contains(&"l1::a.py::foo".to_string()));
    }

    #[test]
    fn patterns_require_minimum_group_size() {
        let hmn = Hmn::new();
        for i in 0..2 {
            hmn.ingest_file(
                "a.py",
                "body",
                &[Chunk { kind: "function".to_string(), name: format!("f{i}"), start_line: 1, end_line: 1, content: "x".to_string() }],
            );
        }
        hmn.build_patterns();
        assert!(hmn.inner.read().unwrap().nodes.values().all(|n| n.level != Level::L2Pattern));

        hmn.ingest_file(
            "a.py",
            "body",
            &[Chunk { kind: "function".to_string(), name: "f2".to_string(), start_line: 1, end_line: 1, content: "x".to_string() }],
        );
        hmn.build_patterns();
        assert!(hmn.inner.read().unwrap().nodes.values().any(|n| n.level == Level::L2Pattern));
    }
}
