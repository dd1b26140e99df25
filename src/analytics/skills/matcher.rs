//! Finds relevant skills for a task by keyword match, text similarity,
//! success rate, and usage-count boosting.
//!
//! Score weights: keyword match 0.3, semantic similarity 0.4, success rate
//! 0.2, usage-count boost 0.1.

use std::collections::{HashMap, HashSet};

use crate::analytics::skills::loader::Skill;
use crate::analytics::skills::registry::SkillStats;

const KEYWORD_WEIGHT: f64 = 0.3;
const SEMANTIC_WEIGHT: f64 = 0.4;
const SUCCESS_WEIGHT: f64 = 0.2;
const USAGE_WEIGHT: f64 = 0.1;

/// Word-overlap (Jaccard) similarity, the fallback used when no semantic
/// search backend is configured.
fn text_similarity(a: &str, b: &str) -> f64 {
    let words1: HashSet<&str> = a.split_whitespace().collect();
    let words2: HashSet<&str> = b.split_whitespace().collect();
    if words1.is_empty() || words2.is_empty() {
        return 0.0;
    }
    let intersection = words1.intersection(&words2).count();
    let union = words1.union(&words2).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

pub struct SkillMatcher;

impl SkillMatcher {
    /// Relevance score for `skill` given `task`, in `[0.0, 1.0]`.
    ///
    /// `stats` is the live registry entry, if one exists; in its absence
    /// the skill document's own frontmatter defaults are used.
    pub fn calculate_relevance(task: &str, skill: &Skill, stats: Option<&SkillStats>) -> f64 {
        let task_lower = task.to_lowercase();

        let keyword_score = if skill.applies_to.is_empty() {
            0.0
        } else {
            let weight = 1.0 / skill.applies_to.len() as f64;
            let raw: f64 = skill
                .applies_to
                .iter()
                .filter(|kw| task_lower.contains(&kw.to_lowercase()))
                .map(|_| weight)
                .sum();
            raw.min(1.0)
        };

        let semantic_score = text_similarity(&task_lower, &skill.description.to_lowercase());

        let (success_rate, usage_count) = match stats {
            Some(s) => (s.success_rate, s.usage_count as f64),
            None => {
                let success_rate = skill
                    .metadata
                    .get("success_rate")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5);
                let usage_count = skill
                    .metadata
                    .get("usage_count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as f64;
                (success_rate, usage_count)
            }
        };
        let usage_boost = (usage_count / 10.0).min(1.0);

        keyword_score * KEYWORD_WEIGHT
            + semantic_score * SEMANTIC_WEIGHT
            + success_rate * SUCCESS_WEIGHT
            + usage_boost * USAGE_WEIGHT
    }

    /// Top `top_k` skills for `task`, ranked by relevance descending.
    pub fn find_relevant_skills(
        task: &str,
        skills: &[Skill],
        stats_by_name: &HashMap<String, SkillStats>,
        top_k: usize,
    ) -> Vec<Skill> {
        let mut scored: Vec<(f64, &Skill)> = skills
            .iter()
            .map(|skill| (Self::calculate_relevance(task, skill, stats_by_name.get(&skill.name)), skill))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(top_k).map(|(_, skill)| skill.clone()).collect()
    }

    /// Render skills as a single context block for an agent prompt.
    pub fn skill_context(skills: &[Skill]) -> String {
        if skills.is_empty() {
            return String::new();
        }
        skills
            .iter()
            .map(|s| {
                let truncated: String = s.instructions.chars().take(1000).collect();
                format!("## {}\n{}\n\n{}", s.name, s.description, truncated)
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}
