//! Specialist coordinator.
//!
//! A run dispatches every registered specialist concurrently on a bounded
//! worker pool, waits for all of them under one batch deadline, merges their
//! patches in fixed specialist order, and finally asks the QA gate to score
//! the merged plan. A specialist that fails, times out or returns malformed
//! output contributes an empty patch and a warning; the run continues.

mod merge;
mod runtime;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::conflict::Conflict;
use crate::context::ContextPack;
use crate::error::{ExternalCallError, PlanResult, PublishError};
use crate::fingerprint::Fingerprint;
use crate::patch::{ingest_patch, AgentPatch, AgentTask, OwnershipViolation};
use crate::plan::Plan;
use crate::qa::{QaGate, QaRequest, QaResult, QaReview, RuleBasedQa};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::specialist::{KnowledgeRef, SpecialistRequest, SpecialistRole, SpecialistSet};

pub use merge::{merge_patches, MergeOutcome};
use runtime::{JobError, JobHandle, WorkerPool};

/// Time given to idle workers to exit after a run.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(50);

/// How a specialist call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Failed,
    TimedOut,
}

/// Per-specialist result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistOutcome {
    pub role: SpecialistRole,
    pub status: OutcomeStatus,

    /// Calls made, including retries. Zero if the job never ran.
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// A recoverable problem recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWarning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<SpecialistRole>,
    pub message: String,
}

impl RunWarning {
    fn new(role: Option<SpecialistRole>, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
        }
    }
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Some(role) => write!(f, "{role}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,

    /// Digest of the context pack the run saw.
    pub context_digest: String,

    pub plan: Plan,

    /// Tasks to create, deduplicated.
    pub tasks: Vec<AgentTask>,

    /// Fingerprints proposed more than once in this run.
    pub duplicate_tasks: Vec<Fingerprint>,

    /// Fingerprints dropped because the caller had already created them.
    pub skipped_existing: Vec<Fingerprint>,

    /// Conflicts detected during the run. Fact-level conflicts stay on the
    /// context pack.
    pub conflicts: Vec<Conflict>,

    pub qa: QaResult,
    pub warnings: Vec<RunWarning>,
    pub violations: Vec<OwnershipViolation>,

    /// One entry per registered specialist, in merge order.
    pub outcomes: Vec<SpecialistOutcome>,
}

impl RunReport {
    /// Roles that contributed an empty patch because their call failed.
    pub fn failed_specialists(&self) -> impl Iterator<Item = SpecialistRole> + '_ {
        self.outcomes
            .iter()
            .filter(|o| o.status != OutcomeStatus::Ok)
            .map(|o| o.role)
    }

    /// Fingerprints of the new tasks.
    pub fn task_fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.tasks.iter().map(AgentTask::fingerprint)
    }

    /// Publish precondition; see [`crate::publish::ensure_publishable`].
    ///
    /// # Errors
    ///
    /// Returns `QaBlocked` if the QA gate blocked the plan.
    pub fn ensure_publishable(&self) -> Result<(), PublishError> {
        crate::publish::ensure_publishable(&self.qa)
    }
}

/// Runs specialists and the QA gate.
pub struct Coordinator {
    specialists: SpecialistSet,
    qa: Arc<dyn QaGate>,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Creates a coordinator with the built-in [`RuleBasedQa`] gate and the
    /// default configuration.
    #[must_use]
    pub fn new(specialists: SpecialistSet) -> Self {
        Self {
            specialists,
            qa: Arc::new(RuleBasedQa),
            config: CoordinatorConfig::default(),
        }
    }

    /// Replaces the QA gate.
    #[must_use]
    pub fn with_qa_gate(mut self, gate: impl QaGate + 'static) -> Self {
        self.qa = Arc::new(gate);
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    #[must_use]
    pub const fn specialists(&self) -> &SpecialistSet {
        &self.specialists
    }

    /// Runs one coordination round.
    ///
    /// Tasks whose fingerprint is in `already_created` are left out of the
    /// report's tasks. Specialist and QA failures never fail the run.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Internal` if worker threads cannot be spawned.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, specialists = self.specialists.len(), context = %context.digest()))]
    pub fn run(
        &self,
        plan: &Plan,
        context: &ContextPack,
        knowledge: &KnowledgeRef,
        already_created: &BTreeSet<Fingerprint>,
    ) -> PlanResult<RunReport> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let plan_view = Arc::new(plan.clone());
        let context_view = Arc::new(context.clone());
        let retry = self.config.retry.policy();
        let mut warnings = Vec::new();

        let (patches, outcomes, mut violations) =
            self.dispatch(&plan_view, &context_view, knowledge, retry, &mut warnings)?;

        let merged = merge_patches(plan, &patches, context, already_created);
        violations.extend(merged.violations);

        let failed: Vec<SpecialistRole> = outcomes
            .iter()
            .filter(|o| o.status != OutcomeStatus::Ok)
            .map(|o| o.role)
            .collect();
        let qa_request = QaRequest {
            plan: Arc::new(merged.plan.clone()),
            context: context_view,
            knowledge: knowledge.clone(),
            conflicts: merged.conflicts.clone(),
            violations: violations.clone(),
            failed_specialists: failed,
            attempt: 1,
        };
        let qa = self.review(qa_request, retry, &mut warnings)?;

        info!(
            score = qa.score,
            threshold = qa.threshold,
            blocked = qa.blocked,
            tasks = merged.tasks.len(),
            conflicts = merged.conflicts.len(),
            warnings = warnings.len(),
            "run complete"
        );

        Ok(RunReport {
            run_id,
            context_digest: context.digest().to_string(),
            plan: merged.plan,
            tasks: merged.tasks,
            duplicate_tasks: merged.duplicate_tasks,
            skipped_existing: merged.skipped_existing,
            conflicts: merged.conflicts,
            qa,
            warnings,
            violations,
            outcomes,
        })
    }

    /// Calls every specialist and ingests its output. Returns patches and
    /// outcomes in merge order.
    fn dispatch(
        &self,
        plan: &Arc<Plan>,
        context: &Arc<ContextPack>,
        knowledge: &KnowledgeRef,
        retry: RetryPolicy,
        warnings: &mut Vec<RunWarning>,
    ) -> PlanResult<(Vec<AgentPatch>, Vec<SpecialistOutcome>, Vec<OwnershipViolation>)> {
        let roles: Vec<SpecialistRole> = self.specialists.roles().collect();
        if roles.is_empty() {
            warn!("no specialists registered");
            return Ok((Vec::new(), Vec::new(), Vec::new()));
        }

        let workers = self.config.max_workers.min(roles.len());
        let pool = WorkerPool::start("specialist", workers, self.config.queue_capacity)?;
        let dispatched = Instant::now();
        let deadline = dispatched + self.config.batch_timeout();

        let mut pending: Vec<(SpecialistRole, Result<JobHandle<SpecialistCall>, String>)> =
            Vec::with_capacity(roles.len());
        for role in &roles {
            let Some(backend) = self.specialists.get(*role) else {
                continue;
            };
            let backend = Arc::clone(backend);
            let mut request = SpecialistRequest {
                role: *role,
                plan: Arc::clone(plan),
                context: Arc::clone(context),
                knowledge: knowledge.clone(),
                attempt: 1,
            };
            let submitted = pool.try_submit(move || {
                let started = Instant::now();
                let outcome = retry.run(deadline, |attempt| {
                    request.attempt = attempt;
                    backend.propose(&request)
                });
                SpecialistCall {
                    outcome,
                    elapsed: started.elapsed(),
                }
            });
            debug!(role = %role, queued = submitted.is_ok(), "specialist dispatched");
            pending.push((*role, submitted.map_err(|e| e.to_string())));
        }

        let mut patches = Vec::with_capacity(pending.len());
        let mut outcomes = Vec::with_capacity(pending.len());
        let mut violations = Vec::new();

        for (role, submitted) in pending {
            let received = match submitted {
                Ok(handle) => handle.recv_deadline(deadline).map_err(CallFailure::Job),
                Err(reason) => Err(CallFailure::NotQueued(reason)),
            };

            let (status, attempts, elapsed, patch) = match received {
                Ok(call) => {
                    let attempts = call.outcome.attempts;
                    match call.outcome.result.and_then(|raw| ingest_patch(role, &raw)) {
                        Ok(ingest) => {
                            violations.extend(ingest.violations);
                            warnings.extend(
                                ingest.warnings.into_iter().map(|w| RunWarning::new(Some(role), w)),
                            );
                            (OutcomeStatus::Ok, attempts, call.elapsed, ingest.patch)
                        }
                        Err(e) => {
                            warnings.push(RunWarning::new(
                                Some(role),
                                format!("specialist failed after {attempts} attempt(s): {e}"),
                            ));
                            (OutcomeStatus::Failed, attempts, call.elapsed, AgentPatch::empty(role))
                        }
                    }
                }
                Err(CallFailure::Job(JobError::TimedOut)) => {
                    warnings.push(RunWarning::new(
                        Some(role),
                        format!("specialist timed out after {}ms", self.config.batch_timeout_ms),
                    ));
                    (OutcomeStatus::TimedOut, 0, dispatched.elapsed(), AgentPatch::empty(role))
                }
                Err(CallFailure::Job(JobError::Lost)) => {
                    warnings.push(RunWarning::new(Some(role), "specialist call panicked"));
                    (OutcomeStatus::Failed, 0, dispatched.elapsed(), AgentPatch::empty(role))
                }
                Err(CallFailure::NotQueued(reason)) => {
                    warnings.push(RunWarning::new(Some(role), format!("specialist not dispatched: {reason}")));
                    (OutcomeStatus::Failed, 0, Duration::ZERO, AgentPatch::empty(role))
                }
            };

            match status {
                OutcomeStatus::Ok => {
                    info!(role = %role, attempts, elapsed_ms = millis(elapsed), "specialist finished");
                }
                OutcomeStatus::Failed | OutcomeStatus::TimedOut => {
                    warn!(role = %role, status = ?status, attempts, "specialist contributed an empty patch");
                }
            }
            outcomes.push(SpecialistOutcome {
                role,
                status,
                attempts,
                elapsed_ms: millis(elapsed),
            });
            patches.push(patch);
        }

        pool.shutdown(SHUTDOWN_GRACE);
        Ok((patches, outcomes, violations))
    }

    /// Runs the QA gate on its own worker so hung specialist workers cannot
    /// delay it.
    fn review(
        &self,
        mut request: QaRequest,
        retry: RetryPolicy,
        warnings: &mut Vec<RunWarning>,
    ) -> PlanResult<QaResult> {
        let threshold = self.config.qa_threshold;
        let pool = WorkerPool::start("qa", 1, 1)?;
        let deadline = Instant::now() + self.config.qa_timeout();
        let gate = Arc::clone(&self.qa);

        let received = pool
            .try_submit(move || -> RetryOutcome<QaReview> {
                retry.run(deadline, |attempt| {
                    request.attempt = attempt;
                    gate.review(&request)
                })
            })
            .map_err(|e| e.to_string())
            .and_then(|handle| {
                handle.recv_deadline(deadline).map_err(|e| match e {
                    JobError::TimedOut => ExternalCallError::Timeout {
                        duration_ms: self.config.qa_timeout_ms,
                    }
                    .to_string(),
                    JobError::Lost => "QA gate panicked".to_string(),
                })
            });
        pool.shutdown(SHUTDOWN_GRACE);

        let result = match received {
            Ok(RetryOutcome {
                result: Ok(review),
                attempts,
            }) => {
                debug!(attempts, raw_score = review.score, "QA review received");
                QaResult::from_review(review, threshold)
            }
            Ok(RetryOutcome {
                result: Err(e),
                attempts,
            }) => unavailable(threshold, &format!("{e} after {attempts} attempt(s)"), warnings),
            Err(reason) => unavailable(threshold, &reason, warnings),
        };
        if result.blocked {
            warn!(score = result.score, threshold, fixes = result.fixes.len(), "plan blocked by QA");
        }
        Ok(result)
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("specialists", &self.specialists)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct SpecialistCall {
    outcome: RetryOutcome<JsonValue>,
    elapsed: Duration,
}

enum CallFailure {
    Job(JobError),
    NotQueued(String),
}

fn unavailable(threshold: u8, reason: &str, warnings: &mut Vec<RunWarning>) -> QaResult {
    warn!(reason, "QA gate unavailable");
    warnings.push(RunWarning::new(Some(SpecialistRole::Qa), format!("QA review failed: {reason}")));
    QaResult::unavailable(threshold, reason)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Runs one round with the default configuration, the built-in QA gate and
/// no previously created tasks.
///
/// # Errors
///
/// See [`Coordinator::run`].
pub fn run_specialists(
    specialists: SpecialistSet,
    plan: &Plan,
    context: &ContextPack,
    knowledge: &KnowledgeRef,
) -> PlanResult<RunReport> {
    Coordinator::new(specialists).run(plan, context, knowledge, &BTreeSet::new())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::plan::SectionKey;
    use crate::project::ProjectContext;
    use crate::specialist::{SpecialistBackend, StaticBackend};

    fn context() -> ContextPack {
        ContextPack::freeze(Vec::new(), Vec::new(), ProjectContext::new("p")).unwrap()
    }

    fn fast_config() -> CoordinatorConfig {
        let mut config = CoordinatorConfig {
            batch_timeout_ms: 500,
            qa_timeout_ms: 500,
            ..CoordinatorConfig::default()
        };
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 2;
        config
    }

    fn delayed(ms: u64, output: JsonValue) -> impl SpecialistBackend {
        move |_: &SpecialistRequest| -> Result<JsonValue, ExternalCallError> {
            thread::sleep(Duration::from_millis(ms));
            Ok(output.clone())
        }
    }

    #[test]
    fn merge_order_ignores_completion_order() {
        // Quality finishes last but still merges first.
        let specialists = SpecialistSet::new()
            .with(SpecialistRole::Quality, delayed(80, json!({"tasks": [{"name": "Review ITP", "owner_hint": "ENG"}]})))
            .unwrap()
            .with(SpecialistRole::Engineering, delayed(0, json!({"tasks": [{"name": "review itp"}]})))
            .unwrap();
        let report = Coordinator::new(specialists)
            .with_config(fast_config())
            .run(&Plan::new(), &context(), &KnowledgeRef::default(), &BTreeSet::new())
            .unwrap();

        assert_eq!(report.tasks.len(), 1);
        assert_eq!(report.tasks[0].name(), "Review ITP");
        assert_eq!(report.duplicate_tasks.len(), 1);
        let roles: Vec<_> = report.outcomes.iter().map(|o| o.role).collect();
        assert_eq!(roles, vec![SpecialistRole::Quality, SpecialistRole::Engineering]);
    }

    #[test]
    fn slow_specialist_times_out() {
        let specialists = SpecialistSet::new()
            .with(SpecialistRole::Scheduling, delayed(2_000, json!({})))
            .unwrap()
            .with(
                SpecialistRole::Purchasing,
                StaticBackend::new(json!({"sections": {"purchasing": {"vendors": ["Acme"]}}})),
            )
            .unwrap();
        let mut config = fast_config();
        config.batch_timeout_ms = 100;
        let started = Instant::now();
        let report = Coordinator::new(specialists)
            .with_config(config)
            .run(&Plan::new(), &context(), &KnowledgeRef::default(), &BTreeSet::new())
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(1_500));
        let sched = report.outcomes.iter().find(|o| o.role == SpecialistRole::Scheduling).unwrap();
        assert_eq!(sched.status, OutcomeStatus::TimedOut);
        assert!(report.plan.section(SectionKey::Purchasing).is_some());
        assert!(report.warnings.iter().any(|w| w.role == Some(SpecialistRole::Scheduling)));
    }

    #[test]
    fn malformed_output_counts_as_failure() {
        let specialists = SpecialistSet::new()
            .with(SpecialistRole::Quality, StaticBackend::new(json!(["not", "an", "object"])))
            .unwrap();
        let report = Coordinator::new(specialists)
            .with_config(fast_config())
            .run(&Plan::new(), &context(), &KnowledgeRef::default(), &BTreeSet::new())
            .unwrap();
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Failed);
        assert_eq!(report.outcomes[0].attempts, 1);
        assert_eq!(report.failed_specialists().collect::<Vec<_>>(), vec![SpecialistRole::Quality]);
    }

    #[test]
    fn failing_qa_gate_blocks() {
        let gate = |_: &QaRequest| -> Result<QaReview, ExternalCallError> {
            Err(ExternalCallError::transient("model overloaded"))
        };
        let report = Coordinator::new(SpecialistSet::new())
            .with_qa_gate(gate)
            .with_config(fast_config())
            .run(&Plan::new(), &context(), &KnowledgeRef::default(), &BTreeSet::new())
            .unwrap();
        assert!(report.qa.blocked);
        assert_eq!(report.qa.score, 0);
        assert_eq!(report.qa.fixes, vec!["QA review unavailable; re-run QA".to_string()]);
        assert!(report.warnings.iter().any(|w| w.role == Some(SpecialistRole::Qa)));
        assert!(report.ensure_publishable().is_err());
    }
}
