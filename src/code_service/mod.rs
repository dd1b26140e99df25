//! Code service (C3): file reading, static dependency analysis, codebase
//! traversal, doc/symbol search, and thin subprocess wrappers for git/test
//! commands. These are also the operations exposed over the MCP tools
//! endpoint (see `main.rs`'s `CodeServiceTools`).

pub mod chunking;
pub mod sandbox;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tree_sitter::Parser;

use crate::errors::{AppError, ErrorCategory};
use crate::graph::CodeGraph;
use crate::shell_safety;

use chunking::{chunk_content, Chunk};

/// Directories and patterns skipped during any codebase traversal.
const EXCLUDED_DIRS: &[&str] = &[
    ".git", ".hg", ".svn", "node_modules", "target", "dist", "build", "__pycache__",
    ".venv", "venv", ".env", ".mypy_cache", ".pytest_cache", "data", ".cache",
];

const MAX_FILES: usize = 500;
const MAX_FILE_BYTES: u64 = 1_000_000;
const CHUNK_THRESHOLD_CHARS: usize = 5000;

/// Result of a `find_callers`/`impact_analysis` query. `diagnostic` is set
/// (and `results` empty) when no code graph has been built/persisted yet,
/// per spec §4.3 rather than silently returning an indistinguishable empty
/// list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GraphQueryResult {
    pub results: Vec<String>,
    pub diagnostic: Option<String>,
}

/// A single extracted dependency reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub kind: String,
    pub source: String,
    pub import_path: String,
    pub is_external: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub extension: String,
    pub language: String,
    pub size: u64,
    pub line_count: usize,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CodebaseAnalysis {
    pub file_count: usize,
    pub language_counts: HashMap<String, usize>,
    pub directories: Vec<String>,
    pub total_loc: usize,
    pub dependencies: Vec<Dependency>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReadFileResult {
    Full(String),
    Chunked(Vec<Chunk>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ReferenceKind {
    Definition,
    Reference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceMatch {
    pub file: String,
    pub line: usize,
    pub kind: ReferenceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubprocessResult {
    pub exit_code: i32,
    pub output: String,
}

fn extension_language(ext: &str) -> &'static str {
    match ext {
        "py" => "python",
        "rs" => "rust",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "md" => "markdown",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        _ => "unknown",
    }
}

fn stdlib_allowlist(language: &str) -> &'static [&'static str] {
    match language {
        "python" => &[
            "os", "sys", "json", "time", "logging", "pathlib", "typing", "asyncio",
            "collections", "functools", "itertools", "re", "hashlib", "dataclasses",
            "enum", "subprocess", "io", "math", "random", "datetime", "argparse",
        ],
        "rust" => &["std", "core", "alloc"],
        "javascript" | "typescript" => &["fs", "path", "http", "https", "url", "util", "events"],
        "go" => &["fmt", "os", "io", "strings", "strconv", "time", "sync", "net", "errors"],
        _ => &[],
    }
}

struct ImportPattern {
    language: &'static str,
    regex: Regex,
}

fn import_patterns() -> Vec<ImportPattern> {
    vec![
        ImportPattern {
            language: "python",
            regex: Regex::new(r"(?m)^\s*(?:from\s+([\w\.]+)\s+import|import\s+([\w\.]+))").unwrap(),
        },
        ImportPattern {
            language: "javascript",
            regex: Regex::new(r#"(?:import\s+.*?from\s+['"]([^'"]+)['"]|require\(['"]([^'"]+)['"]\))"#).unwrap(),
        },
        ImportPattern {
            language: "typescript",
            regex: Regex::new(r#"import\s+.*?from\s+['"]([^'"]+)['"]"#).unwrap(),
        },
        ImportPattern {
            language: "rust",
            regex: Regex::new(r"(?m)^\s*use\s+([\w:]+)").unwrap(),
        },
        ImportPattern {
            language: "go",
            regex: Regex::new(r#"(?m)^\s*"([\w\./]+)""#).unwrap(),
        },
    ]
}

fn extract_dependencies(content: &str, language: &str) -> Vec<Dependency> {
    let Some(pattern) = import_patterns().into_iter().find(|p| p.language == language) else {
        return Vec::new();
    };
    let stdlib = stdlib_allowlist(language);
    let mut out = Vec::new();
    for cap in pattern.regex.captures_iter(content) {
        let raw = cap
            .iter()
            .skip(1)
            .find_map(|m| m.map(|m| m.as_str().to_string()));
        let Some(raw) = raw else { continue };
        let root = raw.split(['.', ':', '/']).next().unwrap_or(&raw).to_string();
        let is_relative = raw.starts_with('.') || raw.starts_with("./") || raw.starts_with("../");
        let is_external = !is_relative && !stdlib.contains(&root.as_str());
        out.push(Dependency {
            name: root,
            kind: "import".to_string(),
            source: language.to_string(),
            import_path: raw,
            is_external,
        });
    }
    out
}

pub struct CodeService {
    root: PathBuf,
    test_timeout: Duration,
}

impl CodeService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), test_timeout: Duration::from_secs(30) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `read_file(path, chunked?)`
    pub fn read_file(&self, path: &str, chunked: bool) -> Result<ReadFileResult, AppError> {
        let resolved = sandbox::resolve_in_root(&self.root, path)?;
        let content = std::fs::read_to_string(&resolved)?;

        if !chunked && content.len() <= CHUNK_THRESHOLD_CHARS {
            return Ok(ReadFileResult::Full(content));
        }

        let ext = resolved.extension().and_then(|e| e.to_str()).unwrap_or("");
        let is_python = extension_language(ext) == "python";
        Ok(ReadFileResult::Chunked(chunk_content(&content, is_python)))
    }

    /// `analyze_file(path)`
    pub fn analyze_file(&self, path: &str) -> Result<FileAnalysis, AppError> {
        let resolved = sandbox::resolve_in_root(&self.root, path)?;
        let metadata = std::fs::metadata(&resolved)?;
        let content = std::fs::read_to_string(&resolved).unwrap_or_default();
        let ext = resolved
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        let language = extension_language(&ext).to_string();
        let dependencies = extract_dependencies(&content, &language);

        Ok(FileAnalysis {
            extension: ext,
            language,
            size: metadata.len(),
            line_count: content.lines().count(),
            last_modified: metadata
                .modified()
                .ok()
                .map(chrono::DateTime::<chrono::Utc>::from),
            dependencies,
        })
    }

    /// `analyze_codebase()`
    pub fn analyze_codebase(&self) -> Result<CodebaseAnalysis, AppError> {
        let mut analysis = CodebaseAnalysis::default();
        let mut seen_deps = std::collections::HashSet::new();
        let mut directories = std::collections::BTreeSet::new();

        let mut walker_files = Vec::new();
        walk(&self.root, &mut walker_files, &mut directories);

        if walker_files.len() > MAX_FILES {
            walker_files.truncate(MAX_FILES);
            analysis.truncated = true;
        }

        for file in &walker_files {
            let Ok(metadata) = std::fs::metadata(file) else { continue };
            if metadata.len() > MAX_FILE_BYTES {
                analysis.truncated = true;
                continue;
            }
            let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
            let language = extension_language(ext).to_string();
            *analysis.language_counts.entry(language.clone()).or_insert(0) += 1;

            let Ok(content) = std::fs::read_to_string(file) else { continue };
            analysis.total_loc += content.lines().count();

            for dep in extract_dependencies(&content, &language) {
                let dedup_key = (dep.source.clone(), dep.import_path.clone());
                if seen_deps.insert(dedup_key) {
                    analysis.dependencies.push(dep);
                }
            }
        }

        analysis.file_count = walker_files.len();
        analysis.directories = directories.into_iter().collect();
        Ok(analysis)
    }

    /// `search_docs(query)`
    pub fn search_docs(&self, query: &str) -> Result<Vec<(String, usize, String)>, AppError> {
        let query_lower = query.to_lowercase();
        let mut hits = Vec::new();

        let mut candidates = Vec::new();
        let readme = self.root.join("README.md");
        if readme.exists() {
            candidates.push(readme);
        }
        let docs_dir = self.root.join("docs");
        if docs_dir.is_dir() {
            let mut files = Vec::new();
            let mut dirs = std::collections::BTreeSet::new();
            walk(&docs_dir, &mut files, &mut dirs);
            candidates.extend(files.into_iter().filter(|f| {
                f.extension().and_then(|e| e.to_str()) == Some("md")
            }));
        }

        for path in candidates {
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            for (idx, line) in content.lines().enumerate() {
                if line.to_lowercase().contains(&query_lower) {
                    hits.push((
                        path.strip_prefix(&self.root).unwrap_or(&path).display().to_string(),
                        idx + 1,
                        line.trim().to_string(),
                    ));
                }
            }
        }
        Ok(hits)
    }

    /// `find_references(symbol)`
    pub fn find_references(&self, symbol: &str) -> Result<Vec<ReferenceMatch>, AppError> {
        let mut files = Vec::new();
        let mut dirs = std::collections::BTreeSet::new();
        walk(&self.root, &mut files, &mut dirs);

        let word_boundary = Regex::new(&format!(r"\b{}\b", regex::escape(symbol)))
            .map_err(|e| AppError::internal(e.to_string()))?;

        let mut out = Vec::new();
        for file in files {
            let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
            let Ok(content) = std::fs::read_to_string(&file) else { continue };
            let rel = file.strip_prefix(&self.root).unwrap_or(&file).display().to_string();

            if extension_language(ext) == "python" {
                if let Some(matches) = find_python_references(&content, symbol) {
                    out.extend(matches.into_iter().map(|(line, kind)| ReferenceMatch {
                        file: rel.clone(),
                        line,
                        kind,
                    }));
                    continue;
                }
            }

            for (idx, line) in content.lines().enumerate() {
                if word_boundary.is_match(line) {
                    out.push(ReferenceMatch { file: rel.clone(), line: idx + 1, kind: ReferenceKind::Reference });
                }
            }
        }
        Ok(out)
    }

    /// `find_callers(symbol)` — reads the persisted code graph; same-community
    /// callers are returned first when communities have been computed. Empty
    /// with a diagnostic when no graph has been built/persisted yet.
    pub fn find_callers(&self, graph: Option<&CodeGraph>, symbol: &str) -> GraphQueryResult {
        match graph {
            Some(graph) => GraphQueryResult { results: graph.find_callers(symbol), diagnostic: None },
            None => GraphQueryResult {
                results: Vec::new(),
                diagnostic: Some(
                    "no code graph has been built yet; run codebase ingestion first".to_string(),
                ),
            },
        }
    }

    /// `impact_analysis(symbol)` — full descendant closure under the call graph.
    /// Empty with a diagnostic when no graph has been built/persisted yet.
    pub fn impact_analysis(&self, graph: Option<&CodeGraph>, symbol: &str) -> GraphQueryResult {
        match graph {
            Some(graph) => GraphQueryResult { results: graph.impact_analysis(symbol), diagnostic: None },
            None => GraphQueryResult {
                results: Vec::new(),
                diagnostic: Some(
                    "no code graph has been built yet; run codebase ingestion first".to_string(),
                ),
            },
        }
    }

    /// `git_diff(file?)` — no shell interpolation; arguments validated defense-in-depth.
    pub fn git_diff(&self, file: Option<&str>) -> Result<SubprocessResult, AppError> {
        let mut args = vec!["diff".to_string()];
        if let Some(f) = file {
            shell_safety::validate_arg(f).map_err(|e| {
                AppError::new(e.to_string(), ErrorCategory::Validation).recoverable(false)
            })?;
            args.push("--".to_string());
            args.push(f.to_string());
        }
        self.run_subprocess("git", &args)
    }

    /// `run_tests(test_file?)` — delegates to pytest, falling back to unittest.
    pub fn run_tests(&self, test_file: Option<&str>) -> Result<SubprocessResult, AppError> {
        if let Some(f) = test_file {
            shell_safety::validate_arg(f).map_err(|e| {
                AppError::new(e.to_string(), ErrorCategory::Validation).recoverable(false)
            })?;
        }
        let mut args = vec!["-m".to_string(), "pytest".to_string()];
        if let Some(f) = test_file {
            args.push(f.to_string());
        }
        self.run_subprocess("python3", &args).or_else(|_| {
            let fallback_args = test_file.map(|f| vec![f.to_string()]).unwrap_or_default();
            self.run_subprocess("pytest", &fallback_args)
        })
    }

    fn run_subprocess(&self, program: &str, args: &[String]) -> Result<SubprocessResult, AppError> {
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| AppError::new(e.to_string(), ErrorCategory::ToolExecution))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(SubprocessResult {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

fn find_python_references(content: &str, symbol: &str) -> Option<Vec<(usize, ReferenceKind)>> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_python::LANGUAGE.into()).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
        if node.kind() != "identifier" {
            continue;
        }
        let Ok(text) = node.utf8_text(content.as_bytes()) else { continue };
        if text != symbol {
            continue;
        }
        let line = node.start_position().row + 1;
        let is_definition = node
            .parent()
            .map(|p| matches!(p.kind(), "function_definition" | "class_definition"))
            .unwrap_or(false);
        out.push((line, if is_definition { ReferenceKind::Definition } else { ReferenceKind::Reference }));
    }
    out.sort_by_key(|(line, _)| *line);
    Some(out)
}

fn walk(root: &Path, files: &mut Vec<PathBuf>, dirs: &mut std::collections::BTreeSet<String>) {
    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if EXCLUDED_DIRS.contains(&name.as_ref()) {
            continue;
        }
        if path.is_dir() {
            dirs.insert(path.display().to_string());
            walk(&path, files, dirs);
        } else if files.len() < MAX_FILES * 4 {
            files.push(path);
        }
    }
}
