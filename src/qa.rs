//! QA gate.
//!
//! The gate scores the fully merged plan. The coordinator, not the gate,
//! turns the score into a verdict: a plan is blocked when its score falls
//! below the threshold. A blocked verdict is advisory data, not an error;
//! publish integrations enforce it through [`crate::publish::ensure_publishable`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::conflict::Conflict;
use crate::context::ContextPack;
use crate::error::ExternalCallError;
use crate::patch::OwnershipViolation;
use crate::plan::{Plan, SectionKey};
use crate::specialist::{KnowledgeRef, SpecialistRole};

/// Default blocking threshold.
pub const DEFAULT_QA_THRESHOLD: u8 = 85;

const MISSING_SECTION_PENALTY: i64 = 15;
const CONFLICT_PENALTY: i64 = 10;
const FAILED_SPECIALIST_PENALTY: i64 = 10;
const VIOLATION_PENALTY: i64 = 5;

/// Everything the gate may look at.
#[derive(Debug, Clone)]
pub struct QaRequest {
    pub plan: Arc<Plan>,
    pub context: Arc<ContextPack>,
    pub knowledge: KnowledgeRef,
    pub conflicts: Vec<Conflict>,
    pub violations: Vec<OwnershipViolation>,
    pub failed_specialists: Vec<SpecialistRole>,

    /// 1-based attempt number.
    pub attempt: u32,
}

/// Raw output of a gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaReview {
    /// Any integer; clamped to `0..=100` when turned into a result.
    pub score: i64,

    #[serde(default)]
    pub findings: Vec<String>,

    #[serde(default)]
    pub fixes: Vec<String>,
}

/// Scores a merged plan.
pub trait QaGate: Send + Sync {
    /// Reviews the plan.
    ///
    /// # Errors
    ///
    /// Returns an [`ExternalCallError`]; retryable errors are retried.
    fn review(&self, request: &QaRequest) -> Result<QaReview, ExternalCallError>;
}

impl<F> QaGate for F
where
    F: Fn(&QaRequest) -> Result<QaReview, ExternalCallError> + Send + Sync,
{
    fn review(&self, request: &QaRequest) -> Result<QaReview, ExternalCallError> {
        self(request)
    }
}

/// The verdict attached to a run.
///
/// Deserializing clamps the score and re-applies the threshold, so a stored
/// result can never claim to pass with a failing score. A stored block is
/// kept even when the score passes (an unavailable review).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "QaRecord")]
pub struct QaResult {
    pub score: u8,
    pub threshold: u8,
    pub blocked: bool,

    #[serde(default)]
    pub findings: Vec<String>,

    #[serde(default)]
    pub fixes: Vec<String>,
}

impl QaResult {
    /// Clamps the review score and applies the threshold.
    #[must_use]
    pub fn from_review(review: QaReview, threshold: u8) -> Self {
        let score = u8::try_from(review.score.clamp(0, 100)).unwrap_or(0);
        Self {
            score,
            threshold,
            blocked: score < threshold,
            findings: review.findings,
            fixes: review.fixes,
        }
    }

    /// Result used when the gate could not be reached.
    #[must_use]
    pub fn unavailable(threshold: u8, reason: &str) -> Self {
        Self {
            score: 0,
            threshold,
            blocked: true,
            findings: vec![format!("QA review failed: {reason}")],
            fixes: vec!["QA review unavailable; re-run QA".to_string()],
        }
    }
}

#[derive(Deserialize)]
struct QaRecord {
    score: u8,
    threshold: u8,
    #[serde(default)]
    blocked: bool,
    #[serde(default)]
    findings: Vec<String>,
    #[serde(default)]
    fixes: Vec<String>,
}

impl From<QaRecord> for QaResult {
    fn from(record: QaRecord) -> Self {
        let score = record.score.min(100);
        Self {
            score,
            threshold: record.threshold,
            blocked: record.blocked || score < record.threshold,
            findings: record.findings,
            fixes: record.fixes,
        }
    }
}

/// Deterministic built-in gate.
///
/// Starts at 100 and subtracts 15 per owned section that is missing or empty,
/// 10 per open conflict, 10 per failed specialist and 5 per ownership
/// violation. Every penalty comes with a fix.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedQa;

impl RuleBasedQa {
    /// Scores a request.
    #[must_use]
    pub fn score(request: &QaRequest) -> QaReview {
        let mut score = 100i64;
        let mut findings = Vec::new();
        let mut fixes = Vec::new();

        for key in SectionKey::ALL {
            if request.plan.is_section_empty(key) {
                score -= MISSING_SECTION_PENALTY;
                findings.push(format!("section '{key}' is missing or empty"));
                match SpecialistRole::owner_of(key) {
                    Some(owner) => fixes.push(format!("Fill in '{key}' (owner: {owner})")),
                    None => fixes.push(format!("Fill in '{key}'")),
                }
            }
        }

        for c in &request.conflicts {
            score -= CONFLICT_PENALTY;
            findings.push(format!("open conflict on '{}': {}", c.topic, c.issue));
            let cites: Vec<&str> = c.citations.iter().map(|s| s.as_str()).collect();
            if cites.is_empty() {
                fixes.push(format!("Resolve conflict on '{}'", c.topic));
            } else {
                fixes.push(format!(
                    "Resolve conflict on '{}' against {}",
                    c.topic,
                    cites.join(", ")
                ));
            }
        }

        for role in &request.failed_specialists {
            score -= FAILED_SPECIALIST_PENALTY;
            findings.push(format!("{role} specialist produced no patch"));
            fixes.push(format!("Re-run the {role} specialist"));
        }

        for v in &request.violations {
            score -= VIOLATION_PENALTY;
            findings.push(format!("dropped write: {v}"));
            fixes.push(format!(
                "Route {}'s change to '{}' through its owner",
                v.role, v.section
            ));
        }

        QaReview {
            score: score.max(0),
            findings,
            fixes,
        }
    }
}

impl QaGate for RuleBasedQa {
    fn review(&self, request: &QaRequest) -> Result<QaReview, ExternalCallError> {
        Ok(Self::score(request))
    }
}
