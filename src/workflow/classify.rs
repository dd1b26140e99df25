//! Request classification: is this a question, a simple one-shot code
//! request, or a complex request that needs planning?
//!
//! LLM-first, matching the orchestrator's `_classify_request` precedence —
//! the rule-based fallback only kicks in when the preprocessor call fails
//! or its reply doesn't contain a recognized category keyword.

use crate::agent::{AgentPort, AgentRequest, AgentRole};
use crate::errors::AppError;

const TRIAGE_SYSTEM_PROMPT: &str = "You triage incoming coding requests. Reply with exactly one \
    word: `question` if the user is asking about existing code or behavior without requesting a \
    change, `simple_code` if this is a small, self-contained code-writing request answerable in \
    one shot, or `complex_code` if it requires planning across multiple files or steps.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Question,
    SimpleCode,
    ComplexCode,
}

/// Classification either resolves to a category, or the input is too
/// ambiguous to classify at all and should be bounced back to the user
/// with a clarification prompt instead of guessing.
pub enum ClassificationOutcome {
    Resolved(Classification),
    NeedsClarification(String),
}

fn parse_category(text: &str) -> Option<Classification> {
    let lower = text.to_lowercase();
    if lower.contains("simple_code") {
        Some(Classification::SimpleCode)
    } else if lower.contains("complex_code") {
        Some(Classification::ComplexCode)
    } else if lower.contains("question") {
        Some(Classification::Question)
    } else {
        None
    }
}

/// Rule-based fallback used when the LLM path fails or its answer doesn't
/// parse. Short "check"/"help" inputs are treated as too ambiguous to
/// classify and are rebuffed instead of guessed at.
fn classify_fallback(input: &str) -> ClassificationOutcome {
    let trimmed = input.trim();
    let word_count = trimmed.split_whitespace().count();
    let lower = trimmed.to_lowercase();

    if word_count < 4 && (lower.contains("check") || lower.contains("help")) {
        return ClassificationOutcome::NeedsClarification(
            "Could you say more about what you'd like checked or help with? A file, a function, \
             or the behavior you're seeing would help."
                .to_string(),
        );
    }

    let looks_like_question = trimmed.ends_with('?')
        || lower.starts_with("what")
        || lower.starts_with("why")
        || lower.starts_with("how does")
        || lower.starts_with("where");

    if looks_like_question {
        return ClassificationOutcome::Resolved(Classification::Question);
    }

    // Longer, multi-clause requests ("... and then ...", "... across ...")
    // read as needing a plan; short imperative asks are simple.
    let has_multiple_steps = lower.contains(" and then ")
        || lower.contains(" across ")
        || lower.matches(" and ").count() >= 2;

    if word_count > 40 || has_multiple_steps {
        ClassificationOutcome::Resolved(Classification::ComplexCode)
    } else {
        ClassificationOutcome::Resolved(Classification::SimpleCode)
    }
}

/// Classify `input`, preferring the preprocessor's judgment and falling
/// back to the rule-based heuristic only on failure or an unparseable
/// reply.
pub async fn classify_request(
    agent: &dyn AgentPort,
    input: &str,
) -> Result<ClassificationOutcome, AppError> {
    let request = AgentRequest {
        role: AgentRole::Preprocessor,
        system_prompt: Some(TRIAGE_SYSTEM_PROMPT.to_string()),
        prompt: input.to_string(),
        temperature: 0.0,
        max_tokens: Some(8),
    };

    match agent.call(request).await {
        Ok(response) => match parse_category(&response.text) {
            Some(category) => Ok(ClassificationOutcome::Resolved(category)),
            None => Ok(classify_fallback(input)),
        },
        Err(_) => Ok(classify_fallback(input)),
    }
}

/// Tool-call syntax or fabricated-path markers that indicate the answer-mode
/// response hallucinated capabilities it doesn't have. A lightweight scan,
/// not a full validator.
const HALLUCINATION_MARKERS: &[&str] = &["<tool_call>", "```tool_code", "[TOOL_CALL]", "functions.call("];

pub fn detect_hallucination(answer: &str) -> bool {
    HALLUCINATION_MARKERS.iter().any(|m| answer.contains(m))
}

pub const SELF_CORRECTION_NOTICE: &str =
    "\n\n_Note: that response referenced a tool or file path that isn't actually available here — \
     treat the above as a best-effort answer, not a verified one._";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_check_input_requests_clarification() {
        match classify_fallback("check this") {
            ClassificationOutcome::NeedsClarification(_) => {}
            _ => panic!("expected clarification"),
        }
    }

    #[test]
    fn question_mark_classifies_as_question() {
        match classify_fallback("why does this function panic?") {
            ClassificationOutcome::Resolved(Classification::Question) => {}
            _ => panic!("expected question"),
        }
    }

    #[test]
    fn multi_step_request_classifies_as_complex() {
        let input = "refactor the auth module and then update the session store and then add tests";
        match classify_fallback(input) {
            ClassificationOutcome::Resolved(Classification::ComplexCode) => {}
            other => panic!("expected complex_code, got a different outcome: {}", matches!(other, ClassificationOutcome::Resolved(_))),
        }
    }

    #[test]
    fn short_imperative_classifies_as_simple() {
        match classify_fallback("write a hello world function") {
            ClassificationOutcome::Resolved(Classification::SimpleCode) => {}
            _ => panic!("expected simple_code"),
        }
    }

    #[test]
    fn detects_tool_call_hallucination_marker() {
        assert!(detect_hallucination("Sure, let me check. <tool_call>read_file</tool_call>"));
        assert!(!detect_hallucination("Sure, the answer is 42."));
    }
}
