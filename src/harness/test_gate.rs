//! Test-command fallback chain gating checkpoint creation.
//!
//! Mirrors `checkpoint_manager.py::verify_tests_pass`: try a short list of
//! common test invocations in order, stop at the first one that actually
//! runs, and scan its output for failure tokens before trusting a success
//! token. A checkpoint is never created on the strength of an absent test
//! framework — that is treated the same as a failing one.

use std::path::Path;
use std::process::Command;

use crate::harness::error::{HarnessError, HarnessResult};

/// One attempted test invocation, in fallback order.
const TEST_COMMANDS: &[&[&str]] = &[
    &["python3", "-m", "pytest"],
    &["pytest"],
    &["python3", "-m", "unittest", "discover"],
    &["npm", "test"],
];

const FAILURE_TOKENS: &[&str] = &["failed", "error", "errors", "failures", "test failed"];
const SUCCESS_TOKENS: &[&str] = &[" passed", "test passed", "all tests passed", "tests passed"];

/// Outcome of a test-gate run.
#[derive(Debug, Clone)]
pub struct TestGateOutcome {
    pub command: String,
    pub passed: bool,
    pub output_tail: String,
}

fn scan_output(stdout: &str, exit_success: bool) -> bool {
    let lower = stdout.to_lowercase();
    if FAILURE_TOKENS.iter().any(|tok| lower.contains(tok)) {
        return false;
    }
    if !exit_success {
        return false;
    }
    if SUCCESS_TOKENS.iter().any(|tok| lower.contains(tok)) {
        return true;
    }
    // unittest's "OK" is only trustworthy alongside the word "test"
    if lower.contains("ok") && lower.contains("test") {
        return true;
    }
    false
}

/// Run the test-command fallback chain in `working_dir`. Returns the outcome
/// of the first command that actually executed (i.e. the binary exists).
/// Errors (not "failed") only when no test framework in the chain is
/// runnable at all — the caller should refuse to checkpoint either way, but
/// the diagnostic differs.
pub fn run_test_gate(working_dir: &Path) -> HarnessResult<TestGateOutcome> {
    for cmd in TEST_COMMANDS {
        let (program, args) = cmd.split_first().expect("command list is non-empty");
        let output = match Command::new(program).args(args).current_dir(working_dir).output() {
            Ok(output) => output,
            Err(_) => continue, // binary not found, try next in the chain
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let combined = format!("{stdout}\n{stderr}");
        let passed = scan_output(&combined, output.status.success());
        let tail: String = combined.chars().rev().take(500).collect::<String>().chars().rev().collect();

        return Ok(TestGateOutcome {
            command: format!("{program} {}", args.join(" ")),
            passed,
            output_tail: tail,
        });
    }

    Err(HarnessError::no_test_framework())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_output_flags_failure_tokens_over_success() {
        assert!(!scan_output("3 passed, 1 failed", true));
    }

    #[test]
    fn scan_output_requires_success_token_on_clean_exit() {
        assert!(scan_output("5 passed in 0.12s", true));
        assert!(!scan_output("no recognizable output", true));
    }

    #[test]
    fn scan_output_rejects_nonzero_exit_even_with_success_words() {
        assert!(!scan_output("5 passed", false));
    }

    #[test]
    fn scan_output_accepts_unittest_ok_only_with_test_context() {
        assert!(scan_output("ran 3 tests\nok", true));
        assert!(!scan_output("ok", true));
    }

    #[test]
    fn no_runnable_framework_in_empty_dir_is_an_error_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        // This test only exercises the "no binary found" path if none of
        // pytest/python3/npm exist on PATH, which we can't guarantee in CI;
        // the unit-level scan_output tests above cover the scoring logic
        // deterministically.
        let _ = run_test_gate(dir.path());
    }
}
