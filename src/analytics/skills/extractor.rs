//! Learns new skills (or anti-patterns) from completed tasks.
//!
//! Successful, non-trivial tasks that exercise a recognizable pattern are
//! turned into a proven-pattern skill; tasks that failed after several
//! iterations with a clear, diagnosable reason are turned into an
//! anti-pattern skill describing what not to do.

use std::path::PathBuf;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;

use crate::analytics::error::{AnalyticsError, AnalyticsResult};
use crate::analytics::skills::loader::{parse_skill_document, Skill, SkillLoader};

/// Coarse classification of a reviewed task's disposition, decoupled from
/// the orchestrator's own task state so the extractor has no dependency on
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Approved,
    Failed,
    Other,
}

/// The slice of a completed task the extractor needs, assembled by the
/// orchestrator once a task reaches a terminal review state.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub user_input: Option<String>,
    pub code: Option<String>,
    pub iteration_count: u32,
    pub review_status: ReviewStatus,
    pub review_feedback: Option<String>,
}

/// A recognizable coding pattern the extractor can name and categorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    RegexPatternFixing,
    PythonAstRefactoring,
    DjangoMigrationPatterns,
    TestDrivenBugFixing,
    ErrorMessageReading,
}

impl PatternType {
    pub fn slug(self) -> &'static str {
        match self {
            Self::RegexPatternFixing => "regex-pattern-fixing",
            Self::PythonAstRefactoring => "python-ast-refactoring",
            Self::DjangoMigrationPatterns => "django-migration-patterns",
            Self::TestDrivenBugFixing => "test-driven-bug-fixing",
            Self::ErrorMessageReading => "error-message-reading",
        }
    }

    pub fn category(self) -> &'static str {
        match self {
            Self::RegexPatternFixing
            | Self::PythonAstRefactoring
            | Self::TestDrivenBugFixing
            | Self::ErrorMessageReading => "core-coding",
            Self::DjangoMigrationPatterns => "framework-specific",
        }
    }

    fn detect(code: &str) -> Option<Self> {
        let code_lower = code.to_lowercase();
        if Regex::new(r"\bimport\s+re\b").unwrap().is_match(code)
            || Regex::new(r"re\.(compile|match|search|findall)").unwrap().is_match(code)
        {
            return Some(Self::RegexPatternFixing);
        }
        if Regex::new(r"\bimport\s+ast\b").unwrap().is_match(code)
            || code.contains("NodeVisitor")
            || code.contains("NodeTransformer")
        {
            return Some(Self::PythonAstRefactoring);
        }
        if code.contains("migrations.Migration") || code_lower.contains("makemigrations") || code.contains("models.Model") {
            return Some(Self::DjangoMigrationPatterns);
        }
        if code.contains("assert") || code_lower.contains("pytest") || code_lower.contains("unittest") {
            return Some(Self::TestDrivenBugFixing);
        }
        if code.contains("except") || code.contains("try:") || code.contains("Error") {
            return Some(Self::ErrorMessageReading);
        }
        None
    }
}

/// Minimum code length (chars) for a successful task to be considered
/// non-trivial.
const MIN_SUCCESS_CODE_LEN: usize = 200;
/// Minimum code length for a failed task's code to be worth analyzing.
const MIN_FAILURE_CODE_LEN: usize = 100;
/// Failed tasks need more than this many iterations to show a real struggle.
const MIN_FAILURE_ITERATIONS: u32 = 2;

#[derive(Serialize)]
struct SkillFrontmatter {
    name: String,
    description: String,
    category: String,
    applies_to: Vec<String>,
    success_rate: f64,
    usage_count: u32,
    created: String,
    source_task: String,
    learned: bool,
}

pub struct SkillExtractor {
    skills_dir: PathBuf,
}

impl SkillExtractor {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self { skills_dir: skills_dir.into() }
    }

    /// Whether a completed task is worth turning into a skill.
    pub fn is_skill_worthy(&self, outcome: &TaskOutcome) -> bool {
        match outcome.review_status {
            ReviewStatus::Approved => {
                let Some(code) = outcome.code.as_deref() else { return false };
                code.len() > MIN_SUCCESS_CODE_LEN
                    && Self::has_reusable_pattern(code)
                    && PatternType::detect(code).is_some()
                    && !Self::is_one_off_solution(code)
            }
            ReviewStatus::Failed => {
                outcome.iteration_count > MIN_FAILURE_ITERATIONS
                    && Self::has_clear_failure_reason(outcome)
                    && outcome.code.as_deref().is_some_and(|c| c.len() > MIN_FAILURE_CODE_LEN)
            }
            ReviewStatus::Other => false,
        }
    }

    fn has_reusable_pattern(code: &str) -> bool {
        let has_structure = Regex::new(r"\b(def|class)\s+\w+").unwrap().is_match(code);
        let has_pattern = PatternType::detect(code).is_some();
        let loc = code
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.trim().starts_with('#'))
            .count();
        has_structure && has_pattern && loc >= 3
    }

    fn is_one_off_solution(code: &str) -> bool {
        if code.len() < MIN_SUCCESS_CODE_LEN {
            return true;
        }
        let hardcoded = Regex::new(r#"["']\w+["']"#).unwrap().find_iter(code).count();
        if hardcoded > 10 {
            return true;
        }
        Regex::new(r"/[a-z]+/[a-z]+/[a-z]+").unwrap().is_match(code)
    }

    fn has_clear_failure_reason(outcome: &TaskOutcome) -> bool {
        let Some(feedback) = outcome.review_feedback.as_deref() else { return false };
        let lower = feedback.to_lowercase();
        let has_error = ["error", "failed", "exception", "bug"].iter().any(|w| lower.contains(w));
        has_error && outcome.iteration_count > MIN_FAILURE_ITERATIONS
    }

    fn generate_skill_name(pattern: PatternType, outcome: &TaskOutcome) -> String {
        let mut base = pattern.slug().to_string();
        if let Some(input) = &outcome.user_input {
            let words: Vec<&str> = Regex::new(r"\b\w+\b").unwrap().find_iter(input).map(|m| m.as_str()).collect();
            let skip = ["fix", "add", "update", "create"];
            let modifier = words
                .iter()
                .find(|w| !skip.contains(&w.to_lowercase().as_str()) && w.len() > 3);
            if let Some(modifier) = modifier {
                base = format!("{base}-{}", modifier.to_lowercase());
            }
        }
        let sanitized = Regex::new(r"[^a-z0-9-]").unwrap().replace_all(&base.to_lowercase(), "-").to_string();
        let collapsed = Regex::new(r"-+").unwrap().replace_all(&sanitized, "-").to_string();
        collapsed.trim_matches('-').to_string()
    }

    /// Next free `-v<N>` suffix for `base_name`, scanning existing skill
    /// directories on disk.
    fn next_version(&self, base_name: &str) -> AnalyticsResult<u32> {
        let mut max_version = 0u32;
        if !self.skills_dir.exists() {
            return Ok(1);
        }
        let pattern = Regex::new(&format!(r"^{}-v(\d+)$", regex::escape(base_name))).unwrap();
        let entries = std::fs::read_dir(&self.skills_dir).map_err(|source| AnalyticsError::FileRead {
            path: self.skills_dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| AnalyticsError::FileRead {
                path: self.skills_dir.clone(),
                source,
            })?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(caps) = pattern.captures(name) {
                    if let Ok(v) = caps[1].parse::<u32>() {
                        max_version = max_version.max(v);
                    }
                }
            }
        }
        Ok(max_version + 1)
    }

    fn extract_keywords(user_input: Option<&str>, code: Option<&str>) -> Vec<String> {
        let mut keywords = Vec::new();
        if let Some(input) = user_input {
            keywords.extend(
                Regex::new(r"\b\w{4,}\b")
                    .unwrap()
                    .find_iter(&input.to_lowercase())
                    .take(5)
                    .map(|m| m.as_str().to_string()),
            );
        }
        if let Some(code) = code {
            keywords.extend(
                Regex::new(r"import\s+(\w+)")
                    .unwrap()
                    .captures_iter(code)
                    .take(3)
                    .map(|c| c[1].to_string()),
            );
            keywords.extend(
                Regex::new(r"\bdef\s+(\w+)")
                    .unwrap()
                    .captures_iter(code)
                    .take(3)
                    .map(|c| c[1].to_string()),
            );
        }
        let common = ["this", "that", "with", "from", "import", "def", "class"];
        let mut seen = std::collections::HashSet::new();
        keywords
            .into_iter()
            .filter(|k| !common.contains(&k.as_str()) && k.len() > 3 && seen.insert(k.clone()))
            .take(10)
            .collect()
    }

    fn extract_patterns(code: &str) -> Vec<String> {
        let re = Regex::new(r"(?s)def\s+\w+\([^)]*\):.*?(?=\n\ndef|\nclass|\z)").unwrap();
        re.find_iter(code)
            .take(3)
            .map(|m| {
                let lines: Vec<&str> = m.as_str().lines().collect();
                if lines.len() > 20 {
                    format!("{}\n    # ...", lines[..20].join("\n"))
                } else {
                    m.as_str().trim().to_string()
                }
            })
            .collect()
    }

    fn extract_anti_patterns(code: &str, feedback: Option<&str>) -> Vec<String> {
        let mut anti = Vec::new();
        if let Some(feedback) = feedback {
            let lower = feedback.to_lowercase();
            if lower.contains("error") {
                anti.push(format!("Causes errors: {}", &feedback[..feedback.len().min(100)]));
            }
            if lower.contains("failed") {
                anti.push(format!("Failed approach: {}", &feedback[..feedback.len().min(100)]));
            }
        }
        if code.contains("try:") && code.contains("except:") {
            anti.push("Using bare except clauses".to_string());
        }
        if Regex::new(r"\.\*[^?]").unwrap().is_match(code) {
            anti.push("Using greedy matching instead of lazy".to_string());
        }
        if Regex::new(r"[^\\]\.").unwrap().is_match(code) {
            anti.push("Not escaping special characters in regex".to_string());
        }
        anti.truncate(5);
        anti
    }

    fn generate_skill_definition(outcome: &TaskOutcome, pattern: PatternType, skill_name: &str) -> String {
        let is_success = outcome.review_status == ReviewStatus::Approved;
        let code = outcome.code.as_deref().unwrap_or("");
        let user_input = outcome.user_input.as_deref().unwrap_or("");
        let feedback = outcome.review_feedback.as_deref();

        let keywords = Self::extract_keywords(outcome.user_input.as_deref(), outcome.code.as_deref());

        let description = if is_success {
            format!("Pattern learned from successful task: {}...", truncate_chars(user_input, 80))
        } else {
            format!("Anti-pattern learned from failed task: {}...", truncate_chars(user_input, 80))
        };

        let frontmatter = SkillFrontmatter {
            name: skill_name.to_string(),
            description,
            category: pattern.category().to_string(),
            applies_to: keywords.clone(),
            success_rate: 0.5,
            usage_count: 0,
            created: Utc::now().to_rfc3339(),
            source_task: outcome.task_id.clone(),
            learned: true,
        };
        let yaml = serde_yaml::to_string(&frontmatter).unwrap_or_default();

        let mut body = String::new();
        body.push_str(&format!("# {}\n\n", title_case(skill_name)));
        body.push_str("## Recognition\n\nThis skill applies when:\n");
        for kw in keywords.iter().take(5) {
            body.push_str(&format!("- Task mentions \"{kw}\"\n"));
        }
        body.push('\n');

        if is_success {
            body.push_str("## Proven Patterns (from successful task)\n\n");
            for snippet in Self::extract_patterns(code) {
                body.push_str("```python\n");
                body.push_str(&snippet);
                body.push_str("\n```\n\n");
            }
        } else {
            body.push_str("## Anti-Patterns (from failed task)\n\n**What NOT to do:**\n\n");
            for anti in Self::extract_anti_patterns(code, feedback) {
                body.push_str(&format!("- {anti}\n"));
            }
            body.push('\n');
        }

        if !code.is_empty() {
            body.push_str("## Code Example\n\n```python\n");
            let lines: Vec<&str> = code.lines().collect();
            if lines.len() > 50 {
                body.push_str(&lines[..50].join("\n"));
                body.push_str("\n# ... (truncated)");
            } else {
                body.push_str(&lines.join("\n"));
            }
            body.push_str("\n```\n\n");
        }

        body.push_str("## Source\n\n");
        body.push_str(&format!("Learned from task: {}\n", outcome.task_id));
        if !user_input.is_empty() {
            body.push_str(&format!("Original task: {}...\n", &user_input[..user_input.len().min(100)]));
        }

        format!("---\n{yaml}---\n\n{body}")
    }

    /// Extract a skill document from a completed task and persist it to
    /// `skills/{name}/SKILL.md`, returning the parsed skill.
    pub fn extract_skill_from_task(&self, outcome: &TaskOutcome, loader: &SkillLoader) -> AnalyticsResult<Option<Skill>> {
        if !self.is_skill_worthy(outcome) {
            return Ok(None);
        }
        let Some(code) = outcome.code.as_deref() else { return Ok(None) };
        let Some(pattern) = PatternType::detect(code) else { return Ok(None) };

        let mut skill_name = Self::generate_skill_name(pattern, outcome);
        if loader.load_skill(&skill_name)?.is_some() {
            let next = self.next_version(&skill_name)?;
            skill_name = format!("{skill_name}-v{next}");
        }

        let content = Self::generate_skill_definition(outcome, pattern, &skill_name);

        let skill_dir = self.skills_dir.join(&skill_name);
        std::fs::create_dir_all(&skill_dir).map_err(|source| AnalyticsError::FileWrite {
            path: skill_dir.clone(),
            source,
        })?;
        let skill_path = skill_dir.join("SKILL.md");
        std::fs::write(&skill_path, &content).map_err(|source| AnalyticsError::FileWrite {
            path: skill_path.clone(),
            source,
        })?;

        let skill = parse_skill_document(&skill_path, &content)?;
        loader.reload_skill(&skill_name)?;
        Ok(Some(skill))
    }
}

/// Byte-safe prefix of at most `n` characters.
fn truncate_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn title_case(slug: &str) -> String {
    slug.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
