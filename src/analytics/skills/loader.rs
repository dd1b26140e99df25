//! Loads and parses skills from `skills/{name}/SKILL.md` files.
//!
//! Each document is a YAML frontmatter block (name, description, category,
//! applies_to, plus free-form extras) followed by Markdown instructions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::analytics::error::{AnalyticsError, AnalyticsResult};

fn default_category() -> String {
    "uncategorized".to_string()
}

/// `applies_to` accepts either a single string or a list in the frontmatter,
/// mirroring the loose YAML the original skill authors wrote.
fn applies_to_de<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => Ok(vec![s]),
        Some(OneOrMany::Many(v)) => Ok(v),
        None => Ok(Vec::new()),
    }
}

/// A loaded skill document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, deserialize_with = "applies_to_de")]
    pub applies_to: Vec<String>,
    /// Markdown body after the frontmatter. Not part of the frontmatter
    /// itself, filled in after YAML parsing.
    #[serde(skip)]
    pub instructions: String,
    /// Any frontmatter keys besides the ones above (e.g. `source_task`,
    /// `learned`, and the author's initial `success_rate`/`usage_count`
    /// guesses — the registry is the live source of truth for those).
    #[serde(flatten)]
    pub metadata: HashMap<String, serde_yaml::Value>,
}

/// Splits a `---\n...\n---\n<body>` document into its frontmatter and body.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("\n---")?;
    let frontmatter = &rest[..end];
    let body = &rest[end + "\n---".len()..];
    let body = body.trim_start_matches('\n');
    Some((frontmatter, body))
}

/// Parse a SKILL.md file's contents into a `Skill`.
pub fn parse_skill_document(path: &Path, content: &str) -> AnalyticsResult<Skill> {
    let (frontmatter, body) = split_frontmatter(content).ok_or_else(|| AnalyticsError::MalformedSkillDocument {
        path: path.to_path_buf(),
        reason: "missing --- frontmatter delimiters".to_string(),
    })?;

    let mut skill: Skill = serde_yaml::from_str(frontmatter)?;
    if skill.name.trim().is_empty() {
        return Err(AnalyticsError::MalformedSkillDocument {
            path: path.to_path_buf(),
            reason: "missing required field 'name'".to_string(),
        });
    }
    skill.instructions = body.trim().to_string();
    Ok(skill)
}

/// Loads and caches skills from a directory of `{skill-name}/SKILL.md` files.
pub struct SkillLoader {
    skills_dir: PathBuf,
    cache: RwLock<HashMap<String, Skill>>,
}

impl SkillLoader {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn skill_path(&self, name: &str) -> PathBuf {
        self.skills_dir.join(name).join("SKILL.md")
    }

    fn parse_skill_file(&self, path: &Path) -> AnalyticsResult<Skill> {
        let content = std::fs::read_to_string(path).map_err(|source| AnalyticsError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        parse_skill_document(path, &content)
    }

    /// Load a single skill by name, using the cache if present.
    pub fn load_skill(&self, name: &str) -> AnalyticsResult<Option<Skill>> {
        if let Some(skill) = self.cache.read().unwrap().get(name) {
            return Ok(Some(skill.clone()));
        }

        let path = self.skill_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let skill = self.parse_skill_file(&path)?;
        self.cache.write().unwrap().insert(name.to_string(), skill.clone());
        Ok(Some(skill))
    }

    /// Load every `SKILL.md` under the skills directory.
    pub fn load_all_skills(&self) -> AnalyticsResult<Vec<Skill>> {
        let mut skills = Vec::new();
        if !self.skills_dir.exists() {
            return Ok(skills);
        }

        let entries = std::fs::read_dir(&self.skills_dir).map_err(|source| AnalyticsError::FileRead {
            path: self.skills_dir.clone(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| AnalyticsError::FileRead {
                path: self.skills_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let skill_file = path.join("SKILL.md");
            if !skill_file.exists() {
                continue;
            }
            let skill = self.parse_skill_file(&skill_file)?;
            self.cache.write().unwrap().insert(skill.name.clone(), skill.clone());
            skills.push(skill);
        }

        Ok(skills)
    }

    /// Force a reload of `name`, bypassing the cache.
    pub fn reload_skill(&self, name: &str) -> AnalyticsResult<Option<Skill>> {
        self.cache.write().unwrap().remove(name);
        self.load_skill(name)
    }

    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Names of all skills with a `SKILL.md` present, without loading them.
    pub fn skill_names(&self) -> AnalyticsResult<Vec<String>> {
        let mut names = Vec::new();
        if !self.skills_dir.exists() {
            return Ok(names);
        }
        let entries = std::fs::read_dir(&self.skills_dir).map_err(|source| AnalyticsError::FileRead {
            path: self.skills_dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| AnalyticsError::FileRead {
                path: self.skills_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() && path.join("SKILL.md").exists() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_skill(dir: &Path, name: &str, body: &str) {
        let skill_dir = dir.join(name);
        fs::create_dir_all(&skill_dir).unwrap();
        fs::write(skill_dir.join("SKILL.md"), body).unwrap();
    }

    const SAMPLE: &str = "---\nname: regex-pattern-fixing\ndescription: Fix broken regex patterns\ncategory: core-coding\napplies_to:\n  - regex\n  - pattern\nsuccess_rate: 0.5\nusage_count: 0\n---\n\n# Regex Pattern Fixing\n\nUse raw strings.\n";

    #[test]
    fn parses_frontmatter_and_body() {
        let skill = parse_skill_document(Path::new("SKILL.md"), SAMPLE).unwrap();
        assert_eq!(skill.name, "regex-pattern-fixing");
        assert_eq!(skill.applies_to, vec!["regex", "pattern"]);
        assert!(skill.instructions.starts_with("# Regex Pattern Fixing"));
        assert_eq!(
            skill.metadata.get("success_rate").and_then(|v| v.as_f64()),
            Some(0.5)
        );
    }

    #[test]
    fn single_string_applies_to_is_wrapped() {
        let doc = "---\nname: foo\ndescription: bar\napplies_to: solo\n---\nbody";
        let skill = parse_skill_document(Path::new("SKILL.md"), doc).unwrap();
        assert_eq!(skill.applies_to, vec!["solo"]);
    }

    #[test]
    fn missing_frontmatter_is_an_error() {
        let err = parse_skill_document(Path::new("SKILL.md"), "just markdown, no frontmatter");
        assert!(err.is_err());
    }

    #[test]
    fn load_all_skills_reads_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "regex-pattern-fixing", SAMPLE);
        let loader = SkillLoader::new(dir.path());
        let skills = loader.load_all_skills().unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "regex-pattern-fixing");
    }

    #[test]
    fn load_skill_caches_and_reload_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "regex-pattern-fixing", SAMPLE);
        let loader = SkillLoader::new(dir.path());
        let first = loader.load_skill("regex-pattern-fixing").unwrap().unwrap();
        assert_eq!(first.name, "regex-pattern-fixing");

        // Mutate on disk; cached read should still see the old version.
        write_skill(
            dir.path(),
            "regex-pattern-fixing",
            "---\nname: regex-pattern-fixing\ndescription: updated\n---\nnew body",
        );
        let cached = loader.load_skill("regex-pattern-fixing").unwrap().unwrap();
        assert_eq!(cached.description, "Fix broken regex patterns");

        let reloaded = loader.reload_skill("regex-pattern-fixing").unwrap().unwrap();
        assert_eq!(reloaded.description, "updated");
    }

    #[test]
    fn missing_skill_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SkillLoader::new(dir.path());
        assert!(loader.load_skill("nonexistent").unwrap().is_none());
    }
}
