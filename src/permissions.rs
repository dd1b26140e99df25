//! MCP tool permissions: merges a project `.maker.json` and a global
//! `~/.config/maker/.maker.json` into one allowlist/blocklist.
//!
//! The blocklist always wins over the allowlist; an absent allowlist means
//! every tool not explicitly blocked is allowed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
struct PermissionsFile {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    block: Vec<String>,
}

/// A merged allow/block set for MCP tool dispatch.
pub struct ToolPermissions {
    allow: Option<HashSet<String>>,
    block: HashSet<String>,
}

impl ToolPermissions {
    /// Load and merge the global config (if present) and the project
    /// config (if present). Missing or unparseable files are silently
    /// skipped — permissions are an opt-in restriction, not a hard
    /// requirement.
    pub fn load(project_root: &Path) -> Self {
        let mut allow: Option<HashSet<String>> = None;
        let mut block = HashSet::new();

        let candidates = [global_config_path(), Some(project_root.join(".maker.json"))];
        for path in candidates.into_iter().flatten() {
            let Ok(text) = std::fs::read_to_string(&path) else { continue };
            let Ok(file) = serde_json::from_str::<PermissionsFile>(&text) else { continue };
            if !file.allow.is_empty() {
                allow.get_or_insert_with(HashSet::new).extend(file.allow);
            }
            block.extend(file.block);
        }

        Self { allow, block }
    }

    pub fn is_allowed(&self, tool: &str) -> bool {
        if self.block.contains(tool) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(tool),
            None => true,
        }
    }
}

fn global_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join("maker").join(".maker.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_allowlist_permits_everything_not_blocked() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".maker.json"), r#"{"block": ["run_tests"]}"#).unwrap();
        let perms = ToolPermissions::load(dir.path());
        assert!(perms.is_allowed("read_file"));
        assert!(!perms.is_allowed("run_tests"));
    }

    #[test]
    fn allowlist_restricts_to_named_tools() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".maker.json"), r#"{"allow": ["read_file", "analyze_codebase"]}"#).unwrap();
        let perms = ToolPermissions::load(dir.path());
        assert!(perms.is_allowed("read_file"));
        assert!(!perms.is_allowed("git_diff"));
    }

    #[test]
    fn blocklist_wins_even_if_allowlisted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".maker.json"),
            r#"{"allow": ["run_tests"], "block": ["run_tests"]}"#,
        )
        .unwrap();
        let perms = ToolPermissions::load(dir.path());
        assert!(!perms.is_allowed("run_tests"));
    }
}
