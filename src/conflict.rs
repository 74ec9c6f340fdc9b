//! Conflict records.
//!
//! Conflicts are explicit objects, not hidden errors. When claims disagree
//! the system emits a Conflict naming the topic and citing every source on
//! each side, and leaves the decision to a human.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::source::SourceId;
use crate::specialist::SpecialistRole;
use crate::text::normalize_key;

/// Where a conflict was detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// In-scope facts for one topic make different claims.
    FactDisagreement,

    /// Two specialists relied on different claims for one topic.
    CrossSpecialist,

    /// A specialist relied on a claim that differs from the canonical fact.
    ContradictsCanonical,

    /// Reported directly by a specialist in its patch.
    #[default]
    Reported,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FactDisagreement => write!(f, "fact_disagreement"),
            Self::CrossSpecialist => write!(f, "cross_specialist"),
            Self::ContradictsCanonical => write!(f, "contradicts_canonical"),
            Self::Reported => write!(f, "reported"),
        }
    }
}

/// A disagreement on one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub topic: String,
    pub issue: String,

    /// Source IDs on every side, first-seen order, no duplicates.
    #[serde(default)]
    pub citations: Vec<SourceId>,

    #[serde(default)]
    pub kind: ConflictKind,

    /// Specialists that raised the conflict. Empty when raised by the context pack.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raised_by: Vec<SpecialistRole>,
}

impl Conflict {
    /// Creates a conflict with no citations.
    #[must_use]
    pub fn new(topic: impl Into<String>, issue: impl Into<String>, kind: ConflictKind) -> Self {
        Self {
            topic: topic.into(),
            issue: issue.into(),
            citations: Vec::new(),
            kind,
            raised_by: Vec::new(),
        }
    }

    /// Adds a citation unless already present.
    pub fn cite(&mut self, source_id: &SourceId) {
        if !self.citations.contains(source_id) {
            self.citations.push(source_id.clone());
        }
    }

    /// Builder form of [`Conflict::cite`] for several sources.
    #[must_use]
    pub fn with_citations<'a, I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = &'a SourceId>,
    {
        for s in sources {
            self.cite(s);
        }
        self
    }

    /// Records a specialist as a raiser unless already present.
    pub fn raised_by(&mut self, role: SpecialistRole) {
        if !self.raised_by.contains(&role) {
            self.raised_by.push(role);
        }
    }

    /// Identity for deduplication: normalized topic and issue.
    #[must_use]
    pub fn dedupe_key(&self) -> (String, String) {
        (normalize_key(&self.topic), normalize_key(&self.issue))
    }

    /// Folds a duplicate into this record (citations and raisers).
    pub fn absorb(&mut self, other: &Self) {
        for s in &other.citations {
            self.cite(s);
        }
        for r in &other.raised_by {
            self.raised_by(*r);
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.topic, self.issue)?;
        if !self.citations.is_empty() {
            let cites: Vec<&str> = self.citations.iter().map(SourceId::as_str).collect();
            write!(f, " ({})", cites.join(", "))?;
        }
        Ok(())
    }
}
