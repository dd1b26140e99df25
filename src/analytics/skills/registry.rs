//! KV-backed skill lifecycle and usage statistics.
//!
//! Tracks usage count, success rate, last-used timestamp, and version per
//! skill, and handles merging and deprecating skills as the library evolves.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::analytics::error::AnalyticsResult;
use crate::analytics::skills::loader::Skill;
use crate::kv::KvStore;

/// Usage/success statistics for one skill, as persisted in the KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillStats {
    pub name: String,
    pub created: String,
    pub usage_count: u32,
    pub success_count: u32,
    pub success_rate: f64,
    pub last_used: Option<String>,
    pub version: u32,
    pub category: Option<String>,
    pub learned: bool,
}

impl Default for SkillStats {
    fn default() -> Self {
        Self {
            name: String::new(),
            created: Utc::now().to_rfc3339(),
            usage_count: 0,
            success_count: 0,
            success_rate: 0.5,
            last_used: None,
            version: 1,
            category: None,
            learned: false,
        }
    }
}

/// Manages skill lifecycle and statistics via the KV store adapter.
pub struct SkillRegistry {
    kv: KvStore,
}

impl SkillRegistry {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Register a newly-created skill with fresh statistics. A no-op if the
    /// skill is already registered.
    pub fn register_skill(&self, skill: &Skill) -> AnalyticsResult<()> {
        if self.kv.get::<SkillStats>(&skill.name)?.is_some() {
            return Ok(());
        }
        let stats = SkillStats {
            name: skill.name.clone(),
            category: Some(skill.category.clone()),
            learned: skill
                .metadata
                .get("learned")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            ..SkillStats::default()
        };
        self.kv.set(&skill.name, &stats, None)?;
        Ok(())
    }

    /// Record a use of the skill and whether the task it was applied to
    /// succeeded, updating its running success rate.
    pub fn update_skill_stats(&self, skill_name: &str, success: bool) -> AnalyticsResult<SkillStats> {
        let updated = self.kv.update_with_retry::<SkillStats, _>(skill_name, 5, |current| {
            let mut stats = current.unwrap_or_else(|| SkillStats {
                name: skill_name.to_string(),
                ..SkillStats::default()
            });
            stats.usage_count += 1;
            if success {
                stats.success_count += 1;
            }
            if stats.usage_count > 0 {
                stats.success_rate = stats.success_count as f64 / stats.usage_count as f64;
            }
            stats.last_used = Some(Utc::now().to_rfc3339());
            stats
        })?;
        Ok(updated)
    }

    pub fn get_skill_stats(&self, skill_name: &str) -> AnalyticsResult<Option<SkillStats>> {
        Ok(self.kv.get(skill_name)?)
    }

    pub fn get_all_skill_stats(&self) -> AnalyticsResult<Vec<SkillStats>> {
        let entries: Vec<(String, SkillStats)> = self.kv.scan("")?;
        Ok(entries.into_iter().map(|(_, stats)| stats).collect())
    }

    /// Merge `merged_name`'s statistics into `keep_name` and drop `merged_name`.
    pub fn merge_similar_skills(&self, keep_name: &str, merged_name: &str) -> AnalyticsResult<bool> {
        let stats1 = self.get_skill_stats(keep_name)?;
        let stats2 = self.get_skill_stats(merged_name)?;
        let (Some(stats1), Some(stats2)) = (stats1, stats2) else {
            return Ok(false);
        };

        let usage_count = stats1.usage_count + stats2.usage_count;
        let success_count = stats1.success_count + stats2.success_count;
        let merged = SkillStats {
            name: keep_name.to_string(),
            created: std::cmp::min(stats1.created, stats2.created),
            usage_count,
            success_count,
            success_rate: if usage_count > 0 {
                success_count as f64 / usage_count as f64
            } else {
                0.5
            },
            last_used: std::cmp::max(stats1.last_used, stats2.last_used),
            version: stats1.version.max(stats2.version) + 1,
            category: stats1.category.or(stats2.category),
            learned: stats1.learned || stats2.learned,
        };

        self.kv.set(keep_name, &merged, None)?;
        self.kv.delete(merged_name)?;
        Ok(true)
    }

    /// Names of skills used at least three times whose success rate has
    /// fallen below `threshold`.
    pub fn deprecate_low_performing_skills(&self, threshold: f64) -> AnalyticsResult<Vec<String>> {
        let all = self.get_all_skill_stats()?;
        Ok(all
            .into_iter()
            .filter(|s| s.usage_count >= 3 && s.success_rate < threshold)
            .map(|s| s.name)
            .collect())
    }

    /// Top `top_k` skills by success rate, among those used at least twice.
    pub fn get_top_skills(&self, top_k: usize) -> AnalyticsResult<Vec<SkillStats>> {
        let mut qualified: Vec<SkillStats> = self
            .get_all_skill_stats()?
            .into_iter()
            .filter(|s| s.usage_count >= 2)
            .collect();
        qualified.sort_by(|a, b| b.success_rate.partial_cmp(&a.success_rate).unwrap_or(std::cmp::Ordering::Equal));
        qualified.truncate(top_k);
        Ok(qualified)
    }
}
