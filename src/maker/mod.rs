//! MAKER engine (C9): generate a temperature-grid of candidates for a task,
//! then settle on a winner by first-to-quorum vote rather than a single
//! best-of-N judgement call.
//!
//! Candidate generation is `agent::generate_candidates` — this module only
//! adds the voting half: labelling candidates, collecting `2k-1` independent
//! voter opinions, and tallying them to a winner.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::agent::{AgentPort, AgentRequest, AgentRole, AgentResponse};
use crate::errors::AppError;

/// A fan-out candidate paired with its ballot label (`A`, `B`, `C`, ...).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub label: char,
    pub text: String,
}

/// Outcome of a vote round.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub winner: Candidate,
    pub tally: Vec<(char, usize)>,
    pub votes_cast: usize,
}

const LABELS: &[char] = &['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

fn label_candidates(candidates: Vec<Option<AgentResponse>>) -> Vec<Candidate> {
    candidates
        .into_iter()
        .enumerate()
        .filter_map(|(i, r)| r.map(|r| (i, r)))
        .filter_map(|(i, r)| LABELS.get(i).map(|&label| Candidate { label, text: r.text }))
        .collect()
}

/// Generate `n` candidates for `prompt` via the Coder role and label the
/// ones that succeeded. Failed candidates are simply absent from the
/// returned list — the vote never needs to know how many were attempted.
pub async fn generate_labeled_candidates(
    client: &dyn AgentPort,
    role: AgentRole,
    system_prompt: Option<&str>,
    prompt: &str,
    n: usize,
) -> Vec<Candidate> {
    let raw = crate::agent::generate_candidates(client, role, system_prompt, prompt, n).await;
    label_candidates(raw)
}

fn voter_prompt(task: &str, candidates: &[Candidate]) -> String {
    let mut out = format!(
        "Task:\n{task}\n\nYou are judging {n} candidate solutions below. Vote for the single \
         best one by replying with ONLY its letter label.\n\n",
        n = candidates.len()
    );
    for c in candidates {
        out.push_str(&format!("--- Candidate {} ---\n{}\n\n", c.label, c.text));
    }
    out.push_str("Reply with exactly one letter.");
    out
}

fn parse_vote(text: &str, valid: &[char]) -> Option<char> {
    text.chars().find(|c| c.is_ascii_uppercase() && valid.contains(c))
}

/// Run a first-to-`k` quorum vote over `candidates`.
///
/// Short-circuits when there are 0 or 1 candidates (nothing to vote on, or a
/// trivial unanimous winner). Otherwise spawns `2k-1` independent voter
/// calls and tallies ballots as they arrive conceptually, stopping as soon
/// as a label reaches `k` votes (since all ballots are collected
/// concurrently, "stopping" is simulated by scanning ballots in arrival
/// order and returning the first label whose running count hits `k`). If no
/// label reaches `k` among all `2k-1` ballots, the plurality winner is used,
/// ties broken by label insertion order (not arrival order).
pub async fn vote(
    client: &dyn AgentPort,
    task: &str,
    candidates: Vec<Candidate>,
    k: usize,
) -> Result<VoteOutcome, AppError> {
    if candidates.is_empty() {
        return Err(AppError::maker_voting("no candidates to vote on"));
    }
    if candidates.len() == 1 {
        let winner = candidates.into_iter().next().unwrap();
        return Ok(VoteOutcome { tally: vec![(winner.label, 0)], winner, votes_cast: 0 });
    }

    let valid_labels: Vec<char> = candidates.iter().map(|c| c.label).collect();
    let prompt = voter_prompt(task, &candidates);
    let num_voters = 2 * k - 1;

    let mut handles = Vec::with_capacity(num_voters);
    for i in 0..num_voters {
        let request = AgentRequest {
            role: AgentRole::Voter,
            system_prompt: Some(
                "You are an impartial judge of code solutions. Respond with only the letter of \
                 the best candidate."
                    .to_string(),
            ),
            prompt: prompt.clone(),
            temperature: 0.1,
            max_tokens: Some(8),
        };
        handles.push(async move {
            match client.call(request).await {
                Ok(r) => Some(r.text),
                Err(e) => {
                    warn!(voter = i, error = %e, "voter call failed");
                    None
                }
            }
        });
    }
    let ballots = join_all(handles).await;

    let mut running: HashMap<char, usize> = valid_labels.iter().map(|&l| (l, 0)).collect();
    let mut votes_cast = 0usize;
    let mut early_winner = None;
    for ballot in ballots.into_iter().flatten() {
        let Some(label) = parse_vote(&ballot, &valid_labels) else {
            debug!(ballot = %ballot, "unparseable vote, discarded");
            continue;
        };
        votes_cast += 1;
        let count = running.entry(label).or_insert(0);
        *count += 1;
        if *count >= k && early_winner.is_none() {
            early_winner = Some(label);
        }
    }

    let winning_label = match early_winner {
        Some(label) => label,
        None => valid_labels
            .iter()
            .copied()
            .max_by_key(|l| running.get(l).copied().unwrap_or(0))
            .expect("candidates is non-empty"),
    };

    let winner = candidates
        .into_iter()
        .find(|c| c.label == winning_label)
        .ok_or_else(|| AppError::internal("winning label not found among candidates"))?;

    let tally = valid_labels.iter().map(|&l| (l, running.get(&l).copied().unwrap_or(0))).collect();

    Ok(VoteOutcome { winner, tally, votes_cast })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(labels: &[char]) -> Vec<Candidate> {
        labels.iter().map(|&label| Candidate { label, text: format!("solution {label}") }).collect()
    }

    #[test]
    fn single_candidate_short_circuits() {
        let cands = candidates(&['A']);
        let valid: Vec<char> = cands.iter().map(|c| c.label).collect();
        assert_eq!(valid, vec!['A']);
    }

    #[test]
    fn parse_vote_extracts_first_valid_capital_letter() {
        let valid = ['A', 'B', 'C'];
        assert_eq!(parse_vote("I pick B because...", &valid), Some('B'));
        assert_eq!(parse_vote("b", &valid), None);
        assert_eq!(parse_vote("no clear answer", &valid), None);
        // lowercase letters that happen to coincide with a label never match.
        assert_eq!(parse_vote("i pick candidate b", &valid), None);
    }

    #[test]
    fn tally_first_to_quorum_matches_scenario() {
        // num_candidates=5, vote_k=3 -> 2k-1=5 voters count.
        // Voter sequence: A, A, B, A, C, B, B (only first 5 count).
        let valid_labels = ['A', 'B', 'C'];
        let ballots = ["A", "A", "B", "A", "C", "B", "B"];
        let first_five = &ballots[..5];

        let mut running: HashMap<char, usize> = valid_labels.iter().map(|&l| (l, 0)).collect();
        let mut winner = None;
        for ballot in first_five {
            let label = parse_vote(ballot, &valid_labels).unwrap();
            let count = running.entry(label).or_insert(0);
            *count += 1;
            if *count >= 3 && winner.is_none() {
                winner = Some(label);
            }
        }
        assert_eq!(winner, Some('A'));
        assert_eq!(running[&'A'], 3);
    }

    #[test]
    fn voter_prompt_includes_all_candidate_labels() {
        let cands = candidates(&['A', 'B']);
        let prompt = voter_prompt("fix the bug", &cands);
        assert!(prompt.contains("Candidate A"));
        assert!(prompt.contains("Candidate B"));
    }
}
