//! AST-aware semantic chunking for `read_file`. Python files are split on
//! top-level `function_definition`/`class_definition` nodes using
//! tree-sitter; anything else (or anything tree-sitter fails to parse)
//! falls back to fixed-line-count chunks.

use serde::{Deserialize, Serialize};
use tree_sitter::Parser;

/// One semantic chunk of a source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub kind: String,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
}

const FIXED_CHUNK_LINES: usize = 100;

/// Split content into chunks once it exceeds 5000 characters; below that
/// threshold callers should just return the full text (see `read_file`).
pub fn chunk_content(content: &str, is_python: bool) -> Vec<Chunk> {
    if is_python {
        if let Some(chunks) = chunk_python(content) {
            if !chunks.is_empty() {
                return chunks;
            }
        }
    }
    chunk_fixed_lines(content)
}

fn chunk_python(content: &str) -> Option<Vec<Chunk>> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_python::LANGUAGE.into()).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();
    let lines: Vec<&str> = content.lines().collect();

    let mut chunks = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        let kind = match child.kind() {
            "function_definition" => "function",
            "class_definition" => "class",
            _ => continue,
        };
        let name = child
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(content.as_bytes()).ok())
            .unwrap_or("<anonymous>")
            .to_string();

        let start_line = child.start_position().row + 1;
        let end_line = child.end_position().row + 1;
        let body = lines
            .get(start_line.saturating_sub(1)..end_line.min(lines.len()))
            .map(|s| s.join("\n"))
            .unwrap_or_default();

        chunks.push(Chunk { kind: kind.to_string(), name, start_line, end_line, content: body });
    }

    Some(chunks)
}

fn chunk_fixed_lines(content: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();
    let mut idx = 0;
    let mut part = 0;
    while idx < lines.len() {
        let end = (idx + FIXED_CHUNK_LINES).min(lines.len());
        chunks.push(Chunk {
            kind: "block".to_string(),
            name: format!("part-{part}"),
            start_line: idx + 1,
            end_line: end,
            content: lines[idx..end].join("\n"),
        });
        idx = end;
        part += 1;
    }
    chunks
}
