//! Review phase: either a dedicated reviewer agent (high-resource mode) or
//! the planner reflecting on its own plan and the generated code
//! (low-resource mode). Both modes parse to the same verdict shape.

use serde::{Deserialize, Serialize};

use crate::agent::{AgentPort, AgentRequest, AgentRole};
use crate::config::MakerMode;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub status: ReviewStatus,
    pub feedback: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Deserialize)]
struct VerdictWire {
    status: String,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    suggestions: Vec<String>,
}

const APPROVAL_MARKERS: &[&str] = &["looks good", "lgtm", "approved", "no issues found"];
const REJECTION_MARKERS: &[&str] = &["needs fixes", "not approved", "rejected", "does not fulfill"];

/// Parses a verdict from free text, with a lenient fallback: strict JSON
/// first, then a scan for approval/rejection markers in prose, defaulting
/// to `Failed` when neither is found (a reviewer that can't express
/// approval shouldn't be read as approving).
fn parse_verdict(text: &str) -> ReviewVerdict {
    if let Ok(wire) = serde_json::from_str::<VerdictWire>(text) {
        let status = if wire.status.eq_ignore_ascii_case("approved") {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Failed
        };
        return ReviewVerdict { status, feedback: wire.feedback, suggestions: wire.suggestions };
    }

    let lower = text.to_lowercase();
    let status = if REJECTION_MARKERS.iter().any(|m| lower.contains(m)) {
        ReviewStatus::Failed
    } else if APPROVAL_MARKERS.iter().any(|m| lower.contains(m)) {
        ReviewStatus::Approved
    } else {
        ReviewStatus::Failed
    };
    ReviewVerdict { status, feedback: text.to_string(), suggestions: Vec::new() }
}

fn reviewer_prompt(task: &str, code: &str) -> String {
    format!(
        "Review the following code against this task.\n\nTask:\n{task}\n\nCode:\n{code}\n\n\
         Respond with JSON: {{\"status\": \"approved\"|\"failed\", \"feedback\": \"...\", \
         \"suggestions\": [...]}}"
    )
}

fn reflection_prompt(task: &str, plan_description: &str, code: &str) -> String {
    format!(
        "Here is the plan you wrote earlier:\n{plan_description}\n\nHere is the code generated \
         for this task:\n{code}\n\nOriginal task:\n{task}\n\nDoes the code fulfill your plan? \
         Respond with JSON: {{\"status\": \"approved\"|\"failed\", \"feedback\": \"...\", \
         \"suggestions\": [...]}}"
    )
}

/// Run the review phase for the resource mode configured for this task.
pub async fn review(
    agent: &dyn AgentPort,
    mode: MakerMode,
    task: &str,
    plan_description: &str,
    code: &str,
) -> Result<ReviewVerdict, AppError> {
    let (role, prompt) = match mode {
        MakerMode::High => (AgentRole::Reviewer, reviewer_prompt(task, code)),
        MakerMode::Low => (AgentRole::Planner, reflection_prompt(task, plan_description, code)),
    };
    let request = AgentRequest {
        role,
        system_prompt: Some("You are a strict code reviewer.".to_string()),
        prompt,
        temperature: 0.1,
        max_tokens: Some(800),
    };
    let response = agent.call(request).await?;
    Ok(parse_verdict(&response.text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json_verdict() {
        let v = parse_verdict(r#"{"status": "approved", "feedback": "clean", "suggestions": []}"#);
        assert_eq!(v.status, ReviewStatus::Approved);
    }

    #[test]
    fn lenient_fallback_detects_approval_marker() {
        let v = parse_verdict("Looks good, no issues found.");
        assert_eq!(v.status, ReviewStatus::Approved);
    }

    #[test]
    fn lenient_fallback_detects_rejection_marker() {
        let v = parse_verdict("This needs fixes before merging.");
        assert_eq!(v.status, ReviewStatus::Failed);
    }

    #[test]
    fn ambiguous_text_defaults_to_failed() {
        let v = parse_verdict("Not sure what to make of this.");
        assert_eq!(v.status, ReviewStatus::Failed);
    }
}
