//! Context compressor (C5): a per-session conversational memory window that
//! keeps a bounded "recent" tail verbatim and replaces everything older with
//! a single compacted summary once the token budget is exceeded.
//!
//! Built on [`super::store::SwarmMemoryStore`] and [`super::budget`]; the
//! summarization step calls the Preprocessor agent role and falls back to
//! truncating the oldest entries' content when that call fails, matching
//! the orchestrator's compressor exactly.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::{AgentPort, AgentRequest, AgentResponse, AgentRole};
use crate::errors::AppError;

use super::budget::{CompactionTrigger, TokenBudget, TokenEstimator, WordCountEstimator};
use super::store::{MemoryEntry, MemoryEntryKind, SwarmMemory, SwarmMemoryStore};

/// Upper bound (in characters) for the truncation fallback's compacted text.
const TRUNCATION_FALLBACK_CHARS: usize = 2000;

/// Result of a single compression pass.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub entries_compacted: usize,
    pub used_agent_summary: bool,
    pub summary_tokens: u32,
}

/// A session-scoped, token-budgeted conversation window.
pub struct ContextCompressor {
    session_id: String,
    store: SwarmMemoryStore,
    trigger: CompactionTrigger,
    estimator: WordCountEstimator,
    max_summary_tokens: u32,
}

impl ContextCompressor {
    pub fn new(session_id: impl Into<String>, budget: TokenBudget) -> Self {
        Self {
            session_id: session_id.into(),
            store: SwarmMemoryStore::new(),
            trigger: CompactionTrigger::new(budget),
            estimator: WordCountEstimator::default(),
            max_summary_tokens: 500,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append a message to the window. `role` follows the conventional
    /// `system`/`user`/`assistant`/`tool` vocabulary and maps onto
    /// [`MemoryEntryKind`]; anything else is recorded as an agent turn.
    pub fn add_message(&mut self, role: &str, content: &str) -> u64 {
        let kind = match role {
            "system" => MemoryEntryKind::SystemPrompt,
            "tool" => MemoryEntryKind::ToolResult,
            _ => MemoryEntryKind::AgentTurn,
        };
        let tokens = self.estimator.estimate(content);
        self.store.append(MemoryEntry::new(kind, content, role, tokens))
    }

    pub fn active_token_count(&self) -> u64 {
        self.store.active_token_count()
    }

    /// "Ensures compression" (spec §4.5): runs `compress_if_needed` first,
    /// then returns the non-system, non-compacted entries plus, when
    /// `include_system` is true, the original system prompt entries (which
    /// are never themselves compacted away as long as they remain in the
    /// active set). This is the call site property #2/S4 attach the
    /// `recent_tokens <= recent_window` invariant to — after `get_context`
    /// returns, the window is always within budget.
    ///
    /// Callers that already know compaction isn't needed (or have just run
    /// it themselves) can read the window without triggering another agent
    /// call via [`Self::active_entries`].
    pub async fn get_context(
        &mut self,
        client: &dyn AgentPort,
        include_system: bool,
    ) -> Result<Vec<MemoryEntry>, AppError> {
        self.compress_if_needed(client).await?;
        Ok(self.active_entries(include_system))
    }

    /// Non-system, non-compacted entries plus, when `include_system` is
    /// true, the original system prompt entries. Does not trigger
    /// compaction — see [`Self::get_context`] for the compression-ensuring
    /// entry point the invariant is attached to.
    pub fn active_entries(&self, include_system: bool) -> Vec<MemoryEntry> {
        self.store
            .active_entries()
            .into_iter()
            .filter(|e| include_system || e.kind != MemoryEntryKind::SystemPrompt)
            .cloned()
            .collect()
    }

    /// Compress the window if the current token count crosses the budget's
    /// trigger threshold. Summarizes via the Preprocessor agent role; on any
    /// agent failure, falls back to a deterministic truncation of the
    /// oldest entries so the caller always ends up back within budget.
    pub async fn compress_if_needed(
        &mut self,
        client: &dyn AgentPort,
    ) -> Result<Option<CompressionOutcome>, AppError> {
        let decision = self.trigger.evaluate(self.store.active_token_count());
        if !decision.should_compact() {
            return Ok(None);
        }

        let active = self.store.active_entries();
        let entry_tokens: Vec<u64> = active.iter().map(|e| e.estimated_tokens as u64).collect();
        let count = self.trigger.entries_to_compact(&entry_tokens, self.store.active_token_count());
        if count == 0 {
            return Ok(None);
        }

        let to_compact: Vec<MemoryEntry> = active.into_iter().take(count).cloned().collect();
        let last_seq = to_compact.last().map(|e| e.seq).unwrap_or(0);

        let (summary_text, used_agent_summary) = match self.summarize_via_agent(client, &to_compact).await {
            Ok(text) => (text, true),
            Err(e) => {
                warn!(session = %self.session_id, error = %e, "preprocessor summarization failed, truncating");
                (self.truncate_fallback(&to_compact), false)
            }
        };

        let summary_tokens = self.estimator.estimate(&summary_text);
        let summary = MemoryEntry::summary(&summary_text, summary_tokens);
        self.store.insert_summary(summary, last_seq);

        Ok(Some(CompressionOutcome { entries_compacted: count, used_agent_summary, summary_tokens }))
    }

    async fn summarize_via_agent(
        &self,
        client: &dyn AgentPort,
        entries: &[MemoryEntry],
    ) -> Result<String, AppError> {
        let mut prompt = format!(
            "Summarize the following {} conversation turns for session '{}'. \
             Preserve key decisions, current state, and open issues in a few \
             sentences.\n\n",
            entries.len(),
            self.session_id
        );
        for entry in entries {
            prompt.push_str(&format!("[{}] {}\n", entry.source, entry.content));
        }

        let request = AgentRequest {
            role: AgentRole::Preprocessor,
            system_prompt: Some("You compress conversation history into a short summary.".to_string()),
            prompt,
            temperature: 0.2,
            max_tokens: Some(self.max_summary_tokens),
        };
        let response = client.call(request).await?;
        if response.text.trim().is_empty() {
            return Err(AppError::internal("preprocessor returned an empty summary"));
        }
        Ok(response.text)
    }

    fn truncate_fallback(&self, entries: &[MemoryEntry]) -> String {
        let joined = entries
            .iter()
            .map(|e| format!("[{}] {}", e.source, e.content))
            .collect::<Vec<_>>()
            .join("\n");
        joined.chars().take(TRUNCATION_FALLBACK_CHARS).collect()
    }

    pub fn to_snapshot(&self) -> ContextCompressorSnapshot {
        ContextCompressorSnapshot {
            session_id: self.session_id.clone(),
            budget: self.trigger.budget().clone(),
            entries: self.store.all_entries().into_iter().cloned().collect(),
        }
    }

    pub fn from_snapshot(snapshot: ContextCompressorSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id,
            store: SwarmMemoryStore::from_entries(snapshot.entries),
            trigger: CompactionTrigger::new(snapshot.budget),
            estimator: WordCountEstimator::default(),
            max_summary_tokens: 500,
        }
    }
}

/// Serializable form of a [`ContextCompressor`], the Rust analogue of the
/// orchestrator's `to_dict`/`from_dict` round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCompressorSnapshot {
    pub session_id: String,
    pub budget: TokenBudget,
    pub entries: Vec<MemoryEntry>,
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    fn small_budget() -> TokenBudget {
        TokenBudget { max_tokens: 1000, target_tokens: 200, min_retained_entries: 2, system_reserve: 0 }
    }

    /// Always answers with a fixed summary, regardless of the prompt.
    struct StubSummarizer(&'static str);

    #[async_trait]
    impl AgentPort for StubSummarizer {
        async fn call(&self, _request: AgentRequest) -> Result<AgentResponse, AppError> {
            Ok(AgentResponse { text: self.0.to_string(), tokens_used: 8, latency_ms: 0 })
        }
    }

    #[test]
    fn add_message_classifies_role_into_entry_kind() {
        let mut ctx = ContextCompressor::new("s1", small_budget());
        ctx.add_message("system", "you are a coder");
        ctx.add_message("assistant", "implementing feature");
        ctx.add_message("tool", "cargo test output");

        let all = ctx.store.all_entries();
        assert_eq!(all[0].kind, MemoryEntryKind::SystemPrompt);
        assert_eq!(all[1].kind, MemoryEntryKind::AgentTurn);
        assert_eq!(all[2].kind, MemoryEntryKind::ToolResult);
    }

    #[tokio::test]
    async fn get_context_filters_system_prompt_when_excluded() {
        let mut ctx = ContextCompressor::new("s1", small_budget());
        ctx.add_message("system", "sys");
        ctx.add_message("assistant", "turn one");
        let client = StubSummarizer("summary");

        assert_eq!(ctx.get_context(&client, true).await.unwrap().len(), 2);
        assert_eq!(ctx.get_context(&client, false).await.unwrap().len(), 1);
    }

    /// S4: `max_context = 1000`, `recent_window = 200`, append 40 messages of
    /// ~28 tokens each; after `get_context`, `recent_tokens <= recent_window`,
    /// the compressed prefix is non-empty, and the most recently appended
    /// message is still present in the window.
    #[tokio::test]
    async fn get_context_enforces_recent_window_after_appending_past_budget() {
        let budget = TokenBudget { max_tokens: 1000, target_tokens: 200, min_retained_entries: 2, system_reserve: 0 };
        let mut ctx = ContextCompressor::new("s4", budget);
        let client = StubSummarizer("summary");

        let message = |i: usize| format!("{} {i}", vec!["word"; 20].join(" "));
        for i in 0..40 {
            ctx.add_message("user", &message(i));
        }

        let context = ctx.get_context(&client, true).await.unwrap();

        assert!(ctx.active_token_count() <= 200, "recent window must be within budget after get_context");
        assert!(ctx.store.all_entries().iter().any(|e| e.kind == MemoryEntryKind::Summary));
        assert!(context.iter().any(|e| e.content == message(39)), "most recent append must survive compaction");
    }

    #[test]
    fn snapshot_round_trips_session_and_entries() {
        let mut ctx = ContextCompressor::new("s1", small_budget());
        ctx.add_message("user", "hello");
        ctx.add_message("assistant", "hi there");

        let snapshot = ctx.to_snapshot();
        let restored = ContextCompressor::from_snapshot(snapshot);

        assert_eq!(restored.session_id(), "s1");
        assert_eq!(restored.store.all_entries().len(), 2);
        assert_eq!(restored.store.all_entries()[1].content, "hi there");
    }

    #[test]
    fn truncate_fallback_respects_char_cap() {
        let ctx = ContextCompressor::new("s1", small_budget());
        let entries: Vec<MemoryEntry> = (0..10)
            .map(|i| MemoryEntry::new(MemoryEntryKind::AgentTurn, &"x".repeat(500), &format!("t{i}"), 100))
            .collect();
        let fallback = ctx.truncate_fallback(&entries);
        assert!(fallback.chars().count() <= TRUNCATION_FALLBACK_CHARS);
    }

    #[test]
    fn no_compaction_needed_when_under_budget() {
        let mut ctx = ContextCompressor::new("s1", small_budget());
        ctx.add_message("user", "short message");
        let decision = ctx.trigger.evaluate(ctx.store.active_token_count());
        assert!(!decision.should_compact());
    }
}
