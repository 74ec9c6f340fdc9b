//! Fact types.
//!
//! A fact is one claim about a topic, citing one source. Resolution assigns
//! each in-scope fact a status; out-of-scope facts keep the default status and
//! are reported separately by the context pack.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::project::ProjectContext;
use crate::source::SourceId;
use crate::text::normalize_key;

/// Identifier of a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(String);

impl FactId {
    /// Creates a fact ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Resolution status of a fact.
///
/// Facts excluded by their scope predicate also read `Proposed` and carry
/// no `superseded_by`. Use [`crate::ContextPack::is_excluded`] to tell them
/// apart from outranked proposals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactStatus {
    /// The winning claim for its topic.
    Canonical,
    /// Outranked by the canonical claim; its source was binding.
    Superseded,
    /// Candidate, or outranked but kept visible (reference/internal sources).
    #[default]
    Proposed,
}

impl fmt::Display for FactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canonical => write!(f, "canonical"),
            Self::Superseded => write!(f, "superseded"),
            Self::Proposed => write!(f, "proposed"),
        }
    }
}

/// Scope predicate: every attribute must equal the project's value.
///
/// Comparison is trimmed and case-insensitive. A missing project attribute
/// fails the predicate; an empty predicate always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopePredicate(BTreeMap<String, String>);

impl ScopePredicate {
    /// Creates an empty predicate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required attribute value.
    #[must_use]
    pub fn require(mut self, attribute: impl Into<String>, expected: impl Into<String>) -> Self {
        self.0.insert(attribute.into(), expected.into());
        self
    }

    /// Returns true if the predicate has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Evaluates the predicate against the project.
    #[must_use]
    pub fn matches(&self, project: &ProjectContext) -> bool {
        self.0.iter().all(|(attribute, expected)| {
            project
                .attribute(attribute)
                .is_some_and(|actual| normalize_key(actual) == normalize_key(expected))
        })
    }

    /// Iterates conditions in attribute order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A single claim about a topic.
///
/// # Examples
///
/// ```
/// use buildplan::{Fact, FactStatus};
///
/// let fact = Fact::new("F-1", "Material", "316L", "DWG-1").applies_if("customer", "ACME");
/// assert_eq!(fact.status, FactStatus::Proposed);
/// assert_eq!(fact.topic_key(), "material");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub topic: String,
    pub claim: String,
    pub source_id: SourceId,

    #[serde(default)]
    pub status: FactStatus,

    #[serde(default, skip_serializing_if = "ScopePredicate::is_empty")]
    pub applies_if: ScopePredicate,

    /// Canonical fact that outranked this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<FactId>,
}

impl Fact {
    /// Creates a candidate fact.
    #[must_use]
    pub fn new(
        id: impl Into<FactId>,
        topic: impl Into<String>,
        claim: impl Into<String>,
        source_id: impl Into<SourceId>,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            claim: claim.into(),
            source_id: source_id.into(),
            status: FactStatus::Proposed,
            applies_if: ScopePredicate::new(),
            superseded_by: None,
        }
    }

    /// Adds a scope condition.
    #[must_use]
    pub fn applies_if(mut self, attribute: impl Into<String>, expected: impl Into<String>) -> Self {
        self.applies_if = self.applies_if.require(attribute, expected);
        self
    }

    /// Grouping key for the topic.
    #[must_use]
    pub fn topic_key(&self) -> String {
        normalize_key(&self.topic)
    }

    /// Comparison key for the claim.
    #[must_use]
    pub fn claim_key(&self) -> String {
        normalize_key(&self.claim)
    }

    /// Returns true if the fact's scope predicate holds for the project.
    #[must_use]
    pub fn in_scope(&self, project: &ProjectContext) -> bool {
        self.applies_if.matches(project)
    }

    /// Returns true if this fact is canonical.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.status == FactStatus::Canonical
    }

    pub(crate) fn reset_resolution(&mut self) {
        self.status = FactStatus::Proposed;
        self.superseded_by = None;
    }
}
