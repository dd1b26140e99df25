//! Planning: turns a task description plus narrative/codebase context into
//! a list of subtasks. Prefers the EE-planner's richer subtask shape
//! (target modules, preserved narratives, dependencies, warnings,
//! confidence) and falls back to a plainer standard-planner schema when the
//! EE-planner fails or returns unparseable output.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentPort, AgentRequest, AgentRole};
use crate::errors::AppError;

/// One unit of planned work.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub target_modules: Vec<String>,
    #[serde(default)]
    pub preserved_narratives: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

/// The planner's output for a task, plus any clarification Q&A injected
/// after a pause.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub clarified_context: Option<String>,
    /// Questions the planner asked, if any — presence of this triggers the
    /// clarification pause in the orchestrator.
    #[serde(default)]
    pub questions: Vec<String>,
}

#[derive(Deserialize)]
struct EePlanWire {
    #[serde(default)]
    plan: Vec<Subtask>,
    #[serde(default)]
    questions: Vec<String>,
}

#[derive(Deserialize)]
struct StandardPlanWire {
    #[serde(default)]
    plan: Vec<StandardSubtaskWire>,
    #[serde(default)]
    questions: Vec<String>,
}

#[derive(Deserialize)]
struct StandardSubtaskWire {
    id: String,
    description: String,
}

fn ee_planner_prompt(task: &str, context: &str) -> String {
    format!(
        "You are planning an implementation for this task.\n\nTask:\n{task}\n\nContext:\n{context}\n\n\
         Respond with JSON of the shape:\n\
         {{\"plan\": [{{\"id\": \"...\", \"description\": \"...\", \"target_modules\": [...], \
         \"preserved_narratives\": [...], \"dependencies\": [...], \"warnings\": [...], \
         \"confidence\": 0.0}}], \"questions\": [...]}}\n\
         If the task is ambiguous, put your questions in \"questions\" and leave \"plan\" empty."
    )
}

fn standard_planner_prompt(task: &str, context: &str) -> String {
    format!(
        "Plan an implementation for this task.\n\nTask:\n{task}\n\nContext:\n{context}\n\n\
         Respond with JSON: {{\"plan\": [{{\"id\": \"...\", \"description\": \"...\"}}], \
         \"questions\": [...]}}"
    )
}

/// Extracts the first balanced `{...}` substring, a regex-based salvage for
/// planner replies that wrap valid JSON in prose or code fences.
fn salvage_json_object(text: &str) -> Option<&str> {
    let re = Regex::new(r"\{[\s\S]*\}").ok()?;
    re.find(text).map(|m| m.as_str())
}

fn parse_ee_plan(text: &str) -> Option<Plan> {
    let wire: EePlanWire = serde_json::from_str(text)
        .ok()
        .or_else(|| salvage_json_object(text).and_then(|s| serde_json::from_str(s).ok()))?;
    Some(Plan { subtasks: wire.plan, clarified_context: None, questions: wire.questions })
}

fn parse_standard_plan(text: &str) -> Option<Plan> {
    let wire: StandardPlanWire = serde_json::from_str(text)
        .ok()
        .or_else(|| salvage_json_object(text).and_then(|s| serde_json::from_str(s).ok()))?;
    let subtasks = wire
        .plan
        .into_iter()
        .map(|s| Subtask { id: s.id, description: s.description, confidence: 0.5, ..Default::default() })
        .collect();
    Some(Plan { subtasks, clarified_context: None, questions: wire.questions })
}

/// Run the EE-planner first; on failure (call error or unparseable JSON),
/// fall back to the standard planner. `ee_planner_enabled` lets the
/// orchestrator's config turn the richer path off entirely.
pub async fn plan(
    agent: &dyn AgentPort,
    task: &str,
    context: &str,
    ee_planner_enabled: bool,
) -> Result<Plan, AppError> {
    if ee_planner_enabled {
        let request = AgentRequest {
            role: AgentRole::Planner,
            system_prompt: Some("You produce structured implementation plans as JSON.".to_string()),
            prompt: ee_planner_prompt(task, context),
            temperature: 0.2,
            max_tokens: Some(1500),
        };
        if let Ok(response) = agent.call(request).await {
            if let Some(plan) = parse_ee_plan(&response.text) {
                return Ok(plan);
            }
        }
    }

    let request = AgentRequest {
        role: AgentRole::Planner,
        system_prompt: Some("You produce implementation plans as JSON.".to_string()),
        prompt: standard_planner_prompt(task, context),
        temperature: 0.2,
        max_tokens: Some(1000),
    };
    let response = agent.call(request).await?;
    parse_standard_plan(&response.text)
        .ok_or_else(|| AppError::internal("planner output could not be parsed, even with salvage"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ee_plan_with_full_subtask_shape() {
        let text = r#"{"plan": [{"id": "t1", "description": "add auth", "target_modules": ["auth.rs"], "confidence": 0.8}], "questions": []}"#;
        let plan = parse_ee_plan(text).unwrap();
        assert_eq!(plan.subtasks.len(), 1);
        assert_eq!(plan.subtasks[0].target_modules, vec!["auth.rs"]);
    }

    #[test]
    fn salvages_json_wrapped_in_prose() {
        let text = "Sure, here's the plan:\n```json\n{\"plan\": [{\"id\": \"t1\", \"description\": \"x\"}], \"questions\": []}\n```\nLet me know!";
        let plan = parse_standard_plan(text).unwrap();
        assert_eq!(plan.subtasks[0].id, "t1");
    }

    #[test]
    fn questions_surface_when_plan_is_empty() {
        let text = r#"{"plan": [], "questions": ["which database do you want?"]}"#;
        let plan = parse_ee_plan(text).unwrap();
        assert!(plan.subtasks.is_empty());
        assert_eq!(plan.questions.len(), 1);
    }

    #[test]
    fn unparseable_standard_plan_returns_none() {
        assert!(parse_standard_plan("not json at all, sorry").is_none());
    }
}
