//! Analytics: the learned-skill library (C6).
//!
//! Skills are Markdown documents with a YAML frontmatter header, matched
//! against a task description by a weighted scoring formula, tracked for
//! usage/success statistics in the KV store, and grown over time by
//! extracting new skills (or anti-patterns) from completed tasks.

pub mod error;
pub mod skills;
