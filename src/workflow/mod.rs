//! Workflow orchestrator (C10): classifies a request, drives the
//! preprocess → plan → (generate → vote → review) iteration loop, handles
//! the simple-request fast path, and enforces the iteration budget.
//!
//! This ties together every other component: C1 (task/clarification
//! persistence), C2 (every agent call), C3 (codebase facts for planning),
//! C4 (narrative context), C5 (rolling conversation, not driven directly by
//! this module's tests but available via [`crate::memory::ContextCompressor`]),
//! C6 (skill announcement and scoring), C7 (progress logging), C8
//! (checkpointing on success), and C9 (candidate generation and voting).
//!
//! Grounded in the orchestrator's `orchestrate_workflow` phase sequencing
//! and the EE-planner/standard-planner adapter, classification precedence,
//! and skill-announcement threshold (score > 0.85).

pub mod classify;
pub mod plan;
pub mod review;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::AgentPort;
use crate::analytics::skills::{SkillLoader, SkillMatcher, SkillRegistry};
use crate::checkpoint::CheckpointManager;
use crate::code_service::CodeService;
use crate::config::{AppConfig, MakerMode};
use crate::errors::AppError;
use crate::harness::feature_list::FeatureList;
use crate::harness::git_manager::GitManager;
use crate::harness::progress::ProgressTracker;
use crate::harness::types::{ProgressEntry, ProgressMarker};
use crate::hmn::Hmn;
use crate::kv::KvStore;
use crate::maker;

use classify::{classify_request, detect_hallucination, Classification, ClassificationOutcome, SELF_CORRECTION_NOTICE};
use plan::Plan;
use review::{review, ReviewStatus, ReviewVerdict};

const CLARIFICATION_TTL_SECS: u64 = 60 * 60;
const SKILL_ANNOUNCE_THRESHOLD: f64 = 0.85;

/// Phase/outcome of a task, mirroring spec's state diagram exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Preprocessing,
    Planning,
    Coding,
    Reviewing,
    Complete,
    Failed,
    AwaitingClarification,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextStatsSnapshot {
    pub active_token_count: u64,
    pub entries_compacted: usize,
}

/// A unit of orchestrated work. Created on first request, mutated on every
/// phase transition, persisted to the KV store at each boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub original_input: String,
    pub preprocessed_input: Option<String>,
    pub plan: Option<Plan>,
    pub latest_code: Option<String>,
    pub latest_review: Option<ReviewVerdict>,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub status: TaskStatus,
    pub context_stats: Option<ContextStatsSnapshot>,
    #[serde(default)]
    pub announced_skills: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, input: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            id: id.into(),
            original_input: input.into(),
            preprocessed_input: None,
            plan: None,
            latest_code: None,
            latest_review: None,
            iteration_count: 0,
            max_iterations,
            status: TaskStatus::Pending,
            context_stats: None,
            announced_skills: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Clarification {
    original_task: String,
    questions: Vec<String>,
}

/// Ties C1–C9 together into the task state machine.
pub struct WorkflowOrchestrator {
    config: AppConfig,
    agent: Arc<dyn AgentPort>,
    kv: KvStore,
    code_service: CodeService,
    hmn: Arc<Hmn>,
    skill_loader: SkillLoader,
    skill_matcher_registry: SkillRegistry,
    progress: ProgressTracker,
    features: FeatureList,
    git: GitManager,
    checkpoints: CheckpointManager,
}

impl WorkflowOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        agent: Arc<dyn AgentPort>,
        kv: KvStore,
        code_service: CodeService,
        hmn: Arc<Hmn>,
        skill_loader: SkillLoader,
        skill_registry: SkillRegistry,
        progress: ProgressTracker,
        features: FeatureList,
        git: GitManager,
        checkpoints: CheckpointManager,
    ) -> Self {
        Self {
            config,
            agent,
            kv,
            code_service,
            hmn,
            skill_loader,
            skill_matcher_registry: skill_registry,
            progress,
            features,
            git,
            checkpoints,
        }
    }

    fn task_key(task_id: &str) -> String {
        format!("task:{task_id}")
    }

    fn persist(&self, task: &Task) -> Result<(), AppError> {
        self.kv.set(&Self::task_key(&task.id), task, None)
    }

    pub fn load_task(&self, task_id: &str) -> Result<Option<Task>, AppError> {
        self.kv.get(&Self::task_key(task_id))
    }

    /// Run (or resume) a task to its next pause point: `Complete`, `Failed`,
    /// or `AwaitingClarification`. Persists at every phase boundary.
    pub async fn run(&self, task: &mut Task) -> Result<(), AppError> {
        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Preprocessing;
            self.persist(task)?;

            match classify_request(self.agent.as_ref(), &task.original_input).await? {
                ClassificationOutcome::NeedsClarification(prompt) => {
                    task.latest_code = Some(prompt);
                    task.status = TaskStatus::AwaitingClarification;
                    self.store_clarification(&task.id, &task.original_input, &[])?;
                    self.persist(task)?;
                    return Ok(());
                }
                ClassificationOutcome::Resolved(Classification::Question) => {
                    return self.handle_question(task).await;
                }
                ClassificationOutcome::Resolved(Classification::SimpleCode) => {
                    return self.handle_simple_code(task).await;
                }
                ClassificationOutcome::Resolved(Classification::ComplexCode) => {
                    task.status = TaskStatus::Planning;
                    self.persist(task)?;
                }
            }
        }

        if task.status == TaskStatus::Planning {
            let context = self.build_planning_context(&task.original_input);
            let planned = plan::plan(self.agent.as_ref(), &task.original_input, &context, true).await?;

            if !planned.questions.is_empty() {
                self.store_clarification(&task.id, &task.original_input, &planned.questions)?;
                task.plan = Some(planned);
                task.status = TaskStatus::AwaitingClarification;
                self.persist(task)?;
                return Ok(());
            }

            task.plan = Some(planned);
            task.status = TaskStatus::Coding;
            self.persist(task)?;
        }

        self.run_iteration_loop(task).await
    }

    /// Resume a task paused at `AwaitingClarification` with the user's
    /// answers, injecting them into the plan's `clarified_context` and
    /// continuing directly at the coding phase.
    pub async fn submit_clarification(
        &self,
        task: &mut Task,
        answers: &std::collections::HashMap<String, String>,
    ) -> Result<(), AppError> {
        if task.status != TaskStatus::AwaitingClarification {
            return Err(AppError::maker_voting("task is not awaiting clarification").recoverable(false));
        }

        let key = format!("clarification:{}", task.id);
        let clarification: Option<Clarification> = self.kv.get(&key)?;
        let clarification = clarification
            .ok_or_else(|| AppError::internal("clarification record missing or expired"))?;

        let mut context = String::new();
        for q in &clarification.questions {
            if let Some(a) = answers.get(q) {
                context.push_str(&format!("Q: {q}\nA: {a}\n"));
            }
        }
        if context.is_empty() {
            for (q, a) in answers {
                context.push_str(&format!("Q: {q}\nA: {a}\n"));
            }
        }

        let mut plan = task.plan.take().unwrap_or_default();
        plan.clarified_context = Some(context);
        plan.questions.clear();
        task.plan = Some(plan);
        task.status = TaskStatus::Coding;
        self.kv.delete(&key)?;
        self.persist(task)?;

        self.run_iteration_loop(task).await
    }

    async fn handle_question(&self, task: &mut Task) -> Result<(), AppError> {
        let request = crate::agent::AgentRequest {
            role: crate::agent::AgentRole::Planner,
            system_prompt: Some("Answer the user's question about this codebase concisely.".to_string()),
            prompt: task.original_input.clone(),
            temperature: 0.2,
            max_tokens: Some(600),
        };
        let response = self.agent.call(request).await?;
        let mut answer = response.text;
        if detect_hallucination(&answer) {
            answer.push_str(SELF_CORRECTION_NOTICE);
        }
        task.latest_code = Some(answer);
        task.status = TaskStatus::Complete;
        self.persist(task)?;
        self.log_progress(task, ProgressMarker::FeatureComplete, "answered question");
        Ok(())
    }

    async fn handle_simple_code(&self, task: &mut Task) -> Result<(), AppError> {
        let request = crate::agent::AgentRequest {
            role: crate::agent::AgentRole::Coder,
            system_prompt: Some("Write the requested code as a single markdown code block.".to_string()),
            prompt: task.original_input.clone(),
            temperature: 0.3,
            max_tokens: None,
        };
        let response = self.agent.call(request).await?;
        task.latest_code = Some(response.text);
        task.status = TaskStatus::Complete;
        self.persist(task)?;
        self.log_progress(task, ProgressMarker::FeatureComplete, "simple code fast path");
        Ok(())
    }

    /// Narrative context (C4) + structural codebase summary (C3) + a git
    /// diff snippet, assembled in the order spec.md requires.
    fn build_planning_context(&self, task_description: &str) -> String {
        let mut context = String::new();

        if let Ok(hmn_result) = self.hmn.query(task_description) {
            for line in &hmn_result.melodic_lines {
                context.push_str(&format!("## Theme: {} ({})\n", line.name, line.description));
            }
            for (file, snippet) in &hmn_result.files {
                context.push_str(&format!("### {file}\n{snippet}\n"));
            }
        }

        if let Ok(analysis) = self.code_service.analyze_codebase() {
            context.push_str(&format!(
                "\nCodebase summary: {} files, {} total LOC, languages: {:?}\n",
                analysis.file_count, analysis.total_loc, analysis.language_counts
            ));
        }

        if let Ok(diff) = self.code_service.git_diff(None) {
            let snippet: String = diff.output.chars().take(2000).collect();
            context.push_str(&format!("\nRecent diff:\n{snippet}\n"));
        }

        context
    }

    fn store_clarification(&self, task_id: &str, original_task: &str, questions: &[String]) -> Result<(), AppError> {
        let key = format!("clarification:{task_id}");
        let record = Clarification { original_task: original_task.to_string(), questions: questions.to_vec() };
        self.kv.set(&key, &record, Some(CLARIFICATION_TTL_SECS))
    }

    /// The generate → vote → review loop, looping on a failing review up to
    /// `task.max_iterations`.
    async fn run_iteration_loop(&self, task: &mut Task) -> Result<(), AppError> {
        loop {
            task.status = TaskStatus::Coding;
            self.persist(task)?;

            let plan_description = task
                .plan
                .as_ref()
                .map(|p| {
                    p.subtasks.iter().map(|s| s.description.clone()).collect::<Vec<_>>().join("\n")
                })
                .unwrap_or_default();
            let clarified = task.plan.as_ref().and_then(|p| p.clarified_context.clone()).unwrap_or_default();
            let coder_prompt = format!("{}\n\nPlan:\n{plan_description}\n\n{clarified}", task.original_input);

            let relevant_skills = self.announce_skills(task, &coder_prompt)?;
            let system_prompt = if relevant_skills.is_empty() {
                None
            } else {
                Some(SkillMatcher::skill_context(&relevant_skills))
            };

            let candidates = maker::generate_labeled_candidates(
                self.agent.as_ref(),
                crate::agent::AgentRole::Coder,
                system_prompt.as_deref(),
                &coder_prompt,
                self.config.candidates,
            )
            .await;

            if candidates.is_empty() {
                task.status = TaskStatus::Failed;
                self.persist(task)?;
                self.decrement_skills(task)?;
                self.log_progress(task, ProgressMarker::FeatureFailed, "no coder candidates succeeded");
                return Err(AppError::maker_voting("all coder candidates failed"));
            }

            let outcome = maker::vote(self.agent.as_ref(), &coder_prompt, candidates, self.config.quorum).await?;
            task.latest_code = Some(outcome.winner.text.clone());
            task.status = TaskStatus::Reviewing;
            self.persist(task)?;

            let verdict = review(
                self.agent.as_ref(),
                self.config.maker_mode,
                &task.original_input,
                &plan_description,
                &outcome.winner.text,
            )
            .await?;
            task.latest_review = Some(verdict.clone());

            if verdict.status == ReviewStatus::Approved {
                task.status = TaskStatus::Complete;
                self.persist(task)?;
                self.increment_skills(task)?;
                self.log_progress(task, ProgressMarker::FeatureComplete, "review approved");
                return Ok(());
            }

            task.iteration_count += 1;
            if task.iteration_count >= task.max_iterations {
                task.status = TaskStatus::Failed;
                self.persist(task)?;
                self.decrement_skills(task)?;
                self.log_progress(task, ProgressMarker::FeatureFailed, "max iterations reached");
                return Ok(());
            }
            warn!(task = %task.id, iteration = task.iteration_count, "review failed, iterating");
        }
    }

    /// Announce (and remember) any skill scoring above the threshold so its
    /// counters can be adjusted on completion.
    fn announce_skills(&self, task: &mut Task, coder_prompt: &str) -> Result<Vec<crate::analytics::skills::Skill>, AppError> {
        let all_skills = self.skill_loader.load_all_skills()?;
        let stats = self
            .skill_matcher_registry
            .get_all_skill_stats()?
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();

        let mut relevant = Vec::new();
        for skill in &all_skills {
            let score = SkillMatcher::calculate_relevance(coder_prompt, skill, stats_lookup(&stats, &skill.name));
            if score > SKILL_ANNOUNCE_THRESHOLD {
                info!(task = %task.id, skill = %skill.name, score, "announcing relevant skill");
                if !task.announced_skills.contains(&skill.name) {
                    task.announced_skills.push(skill.name.clone());
                }
                relevant.push(skill.clone());
            }
        }
        Ok(relevant)
    }

    fn increment_skills(&self, task: &Task) -> Result<(), AppError> {
        for name in &task.announced_skills {
            self.skill_matcher_registry.update_skill_stats(name, true)?;
        }
        Ok(())
    }

    fn decrement_skills(&self, task: &Task) -> Result<(), AppError> {
        for name in &task.announced_skills {
            self.skill_matcher_registry.update_skill_stats(name, false)?;
        }
        Ok(())
    }

    fn log_progress(&self, task: &Task, marker: ProgressMarker, summary: &str) {
        let entry = ProgressEntry::new(task.id.as_str(), task.iteration_count, marker, summary);
        if let Err(e) = self.progress.append(&entry) {
            warn!(task = %task.id, error = %e, "failed to append progress entry");
        }
    }

    /// Compose a deterministic resume orientation (C7 `create_resume_context`)
    /// from the progress log, feature list, and git history, to be
    /// re-submitted as a resumed session's initial input.
    pub fn resume_session(&self, session_id: &str) -> Result<String, AppError> {
        let context = crate::harness::create_resume_context(
            &self.config.workspace,
            &self.progress,
            &self.features,
            &self.git,
        )
        .map_err(|e| AppError::internal(e.to_string()))?;
        Ok(format!("Resuming session {session_id}.\n\n{context}"))
    }

    /// `false` if the workspace has uncommitted changes or the recent
    /// progress log shows an error marker — spec.md's `verify_clean_state`.
    pub fn verify_clean_state(&self) -> Result<bool, AppError> {
        crate::harness::verify_clean_state(&self.progress, &self.git)
            .map_err(|e| AppError::internal(e.to_string()))
    }

    /// Register a feature with the progress tracker's feature list
    /// (no-op if `name` already exists).
    pub fn add_feature(&self, name: &str, description: &str, priority: u32) -> Result<(), AppError> {
        self.features.add_feature(name, description, priority).map_err(|e| AppError::internal(e.to_string()))
    }

    pub fn get_next_feature(&self) -> Result<Option<crate::harness::Feature>, AppError> {
        self.features.get_next_feature().map_err(|e| AppError::internal(e.to_string()))
    }

    pub fn get_progress_summary(&self) -> Result<crate::harness::ProgressSummary, AppError> {
        self.features.get_progress_summary().map_err(|e| AppError::internal(e.to_string()))
    }

    /// Record a checkpoint for `feature` under `session_id` once a task
    /// completes — the caller decides when that boundary is (e.g. after a
    /// task's status reaches `Complete`) — and marks the feature passing in
    /// the feature list.
    pub fn checkpoint(&self, session_id: &str, feature: &str, description: &str) -> Result<crate::checkpoint::Checkpoint, AppError> {
        let checkpoint = self.checkpoints.checkpoint(session_id, feature, description)?;
        if checkpoint.commit.is_some() {
            self.features
                .add_feature(feature, description, 5)
                .map_err(|e| AppError::internal(e.to_string()))?;
            self.features
                .update_feature_status(feature, true)
                .map_err(|e| AppError::internal(e.to_string()))?;
        }
        Ok(checkpoint)
    }
}

fn stats_lookup<'a>(
    stats: &'a std::collections::HashMap<String, crate::analytics::skills::SkillStats>,
    name: &str,
) -> Option<&'a crate::analytics::skills::SkillStats> {
    stats.get(name)
}
