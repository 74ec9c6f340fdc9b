//! Fact conflict resolution.
//!
//! Facts are grouped by normalized topic. Within a group, out-of-scope facts
//! are dropped and the rest are ranked by `(precedence_rank, authority rank,
//! insertion order)`. The first becomes canonical; losers from binding sources
//! are superseded and losers from reference or internal sources stay proposed.

mod resolver;

use serde::{Deserialize, Serialize};

use crate::conflict::Conflict;
use crate::fact::{Fact, FactId};

pub use resolver::{resolve_facts, validate_facts};

/// Outcome for one topic with at least one in-scope fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicResolution {
    /// Topic text as written on the first fact seen for the topic.
    pub topic: String,
    pub canonical: FactId,

    #[serde(default)]
    pub superseded: Vec<FactId>,

    #[serde(default)]
    pub proposed: Vec<FactId>,

    /// In-scope claims disagree.
    #[serde(default)]
    pub disputed: bool,
}

/// Output of [`resolve_facts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Every input fact in input order. Excluded facts keep the default status.
    pub facts: Vec<Fact>,

    /// Facts whose scope predicate failed, in input order.
    pub excluded: Vec<FactId>,

    /// Per-topic outcomes ordered by first appearance.
    pub topics: Vec<TopicResolution>,

    /// One conflict per disputed topic.
    pub conflicts: Vec<Conflict>,
}

impl Resolution {
    /// Finds the outcome for a topic (normalized match).
    #[must_use]
    pub fn topic(&self, topic: &str) -> Option<&TopicResolution> {
        let key = crate::text::normalize_key(topic);
        self.topics
            .iter()
            .find(|t| crate::text::normalize_key(&t.topic) == key)
    }

    /// Returns the canonical facts in input order.
    pub fn canonical_facts(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter().filter(|f| f.is_canonical())
    }
}
