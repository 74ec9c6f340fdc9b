//! Context pack: the frozen bundle of sources, resolved facts and policy
//! version for one session.
//!
//! A pack is immutable. Appending sources or facts rebuilds a new pack from
//! the union of inputs and re-runs full resolution, so freezing the same
//! inputs twice always yields equal packs with equal digests.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::conflict::Conflict;
use crate::error::ValidationError;
use crate::fact::{Fact, FactId};
use crate::policy::POLICY_VERSION;
use crate::project::ProjectContext;
use crate::resolution::{resolve_facts, TopicResolution};
use crate::source::{Source, SourceId, SourceOrigin};
use crate::text::normalize_key;

/// Immutable snapshot of sources and resolved facts.
///
/// # Examples
///
/// ```
/// use buildplan::{ContextPack, Fact, ProjectContext, Source, SourceKind, SourceOrigin};
///
/// let sources = vec![
///     Source::new("DWG-1", "GA drawing", SourceKind::Drawing, SourceOrigin::file("dwg-1.pdf")),
///     Source::new("QUOTE-1", "Supplier quote", SourceKind::Quote, SourceOrigin::file("q.pdf")),
/// ];
/// let facts = vec![
///     Fact::new("F-1", "Material", "316L", "DWG-1"),
///     Fact::new("F-2", "Material", "304", "QUOTE-1"),
/// ];
/// let pack = ContextPack::freeze(sources, facts, ProjectContext::new("Frame 12")).unwrap();
/// assert_eq!(pack.canonical("material").unwrap().claim, "316L");
/// assert_eq!(pack.fact_conflicts().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ContextPackSnapshot", into = "ContextPackSnapshot")]
pub struct ContextPack {
    project: ProjectContext,
    sources: Vec<Source>,
    facts: Vec<Fact>,
    excluded: BTreeSet<FactId>,
    resolutions: Vec<TopicResolution>,
    fact_conflicts: Vec<Conflict>,
    policy_version: String,
    digest: String,
}

/// A fact together with the source it cites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Citation<'a> {
    pub fact: &'a Fact,
    pub source: &'a Source,
}

impl fmt::Display for Citation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}: {}, {}]",
            self.fact.claim, self.source.id, self.source.title, self.fact.status
        )
    }
}

impl ContextPack {
    /// Resolves facts against sources and freezes the result.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSource` for a repeated source id, or any error from
    /// fact validation (unknown source, duplicate fact, missing field).
    #[instrument(skip_all, fields(project = %project.name, sources = sources.len(), facts = facts.len()))]
    pub fn freeze(
        sources: Vec<Source>,
        facts: Vec<Fact>,
        project: ProjectContext,
    ) -> Result<Self, ValidationError> {
        let mut seen: HashSet<&SourceId> = HashSet::with_capacity(sources.len());
        for source in &sources {
            if !seen.insert(&source.id) {
                return Err(ValidationError::DuplicateSource {
                    source_id: source.id.to_string(),
                });
            }
        }

        let resolution = resolve_facts(&sources, facts, &project)?;
        let digest = digest(&project, &sources, &resolution.facts);

        info!(
            topics = resolution.topics.len(),
            excluded = resolution.excluded.len(),
            conflicts = resolution.conflicts.len(),
            digest = %digest,
            "context pack frozen"
        );

        Ok(Self {
            project,
            sources,
            facts: resolution.facts,
            excluded: resolution.excluded.into_iter().collect(),
            resolutions: resolution.topics,
            fact_conflicts: resolution.conflicts,
            policy_version: POLICY_VERSION.to_string(),
            digest,
        })
    }

    /// Rebuilds a pack from this pack's inputs plus new sources and facts.
    ///
    /// Existing inputs keep their order ahead of the new ones.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSource` if a new source reuses an existing id, or any
    /// fact validation error.
    pub fn append(&self, sources: Vec<Source>, facts: Vec<Fact>) -> Result<Self, ValidationError> {
        debug!(new_sources = sources.len(), new_facts = facts.len(), "appending to context pack");
        let mut all_sources = self.sources.clone();
        all_sources.extend(sources);
        let mut all_facts = self.facts.clone();
        all_facts.extend(facts);
        Self::freeze(all_sources, all_facts, self.project.clone())
    }

    /// Project metadata.
    #[must_use]
    pub fn project(&self) -> &ProjectContext {
        &self.project
    }

    /// Sources in registry order.
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// All facts in input order, including excluded ones.
    #[must_use]
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Facts whose scope predicate failed.
    ///
    /// They keep status [`crate::FactStatus::Proposed`] with no `superseded_by` and
    /// belong to no topic resolution.
    pub fn excluded_facts(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter().filter(|f| self.excluded.contains(&f.id))
    }

    /// Returns true if the fact was excluded by its scope predicate.
    #[must_use]
    pub fn is_excluded(&self, id: &FactId) -> bool {
        self.excluded.contains(id)
    }

    /// Per-topic outcomes, ordered by first appearance.
    #[must_use]
    pub fn resolutions(&self) -> &[TopicResolution] {
        &self.resolutions
    }

    /// Topics whose in-scope claims disagree.
    #[must_use]
    pub fn fact_conflicts(&self) -> &[Conflict] {
        &self.fact_conflicts
    }

    /// Precedence table version used to build this pack.
    #[must_use]
    pub fn policy_version(&self) -> &str {
        &self.policy_version
    }

    /// Content digest of the inputs; equal inputs give equal digests.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Looks up a source.
    #[must_use]
    pub fn source(&self, id: &SourceId) -> Option<&Source> {
        self.sources.iter().find(|s| &s.id == id)
    }

    /// Looks up a fact.
    #[must_use]
    pub fn fact(&self, id: &FactId) -> Option<&Fact> {
        self.facts.iter().find(|f| &f.id == id)
    }

    /// The canonical fact for a topic (normalized match).
    #[must_use]
    pub fn canonical(&self, topic: &str) -> Option<&Fact> {
        let key = normalize_key(topic);
        self.facts
            .iter()
            .find(|f| f.is_canonical() && f.topic_key() == key)
    }

    /// In-scope facts for a topic, in input order.
    #[must_use]
    pub fn facts_for(&self, topic: &str) -> Vec<&Fact> {
        let key = normalize_key(topic);
        self.facts
            .iter()
            .filter(|f| f.topic_key() == key && !self.excluded.contains(&f.id))
            .collect()
    }

    /// Canonical facts in input order.
    pub fn canonical_facts(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter().filter(|f| f.is_canonical())
    }

    /// A fact with its cited source, for provenance display.
    #[must_use]
    pub fn citation(&self, fact_id: &FactId) -> Option<Citation<'_>> {
        let fact = self.fact(fact_id)?;
        let source = self.source(&fact.source_id)?;
        Some(Citation { fact, source })
    }
}

/// Serialized form of a [`ContextPack`].
///
/// Derived fields are informational; deserializing re-freezes from
/// `project`, `sources` and `facts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPackSnapshot {
    pub project: ProjectContext,
    pub sources: Vec<Source>,
    pub facts: Vec<Fact>,

    #[serde(default)]
    pub excluded_facts: Vec<FactId>,

    #[serde(default)]
    pub resolutions: Vec<TopicResolution>,

    #[serde(default)]
    pub fact_conflicts: Vec<Conflict>,

    #[serde(default)]
    pub policy_version: String,

    #[serde(default)]
    pub digest: String,
}

impl From<ContextPack> for ContextPackSnapshot {
    fn from(pack: ContextPack) -> Self {
        Self {
            project: pack.project,
            sources: pack.sources,
            facts: pack.facts,
            excluded_facts: pack.excluded.into_iter().collect(),
            resolutions: pack.resolutions,
            fact_conflicts: pack.fact_conflicts,
            policy_version: pack.policy_version,
            digest: pack.digest,
        }
    }
}

impl TryFrom<ContextPackSnapshot> for ContextPack {
    type Error = ValidationError;

    fn try_from(snapshot: ContextPackSnapshot) -> Result<Self, Self::Error> {
        let pack = Self::freeze(snapshot.sources, snapshot.facts, snapshot.project)?;
        if !snapshot.digest.is_empty() && snapshot.digest != pack.digest {
            debug!(stored = %snapshot.digest, rebuilt = %pack.digest, "snapshot digest differs after re-freeze");
        }
        Ok(pack)
    }
}

/// Length-prefixed field hashing so adjacent fields cannot run together.
struct Preimage(Hasher);

impl Preimage {
    fn field(&mut self, value: &str) -> &mut Self {
        self.0.update(&(value.len() as u64).to_le_bytes());
        self.0.update(value.as_bytes());
        self
    }
}

fn digest(project: &ProjectContext, sources: &[Source], facts: &[Fact]) -> String {
    let mut p = Preimage(Hasher::new());
    p.field("context-pack-v1").field(POLICY_VERSION).field(&project.name);
    for (key, value) in project.attributes() {
        p.field(key).field(value);
    }

    p.field("sources");
    for s in sources {
        p.field(s.id.as_str())
            .field(&s.title)
            .field(s.kind.as_str())
            .field(s.authority.as_str())
            .field(&s.precedence_rank.to_string());
        for tag in &s.scope_tags {
            p.field(tag);
        }
        match &s.origin {
            SourceOrigin::UploadedFile {
                file_name,
                mime_type,
            } => {
                p.field("file")
                    .field(file_name)
                    .field(mime_type.as_deref().unwrap_or(""));
            }
            SourceOrigin::WikiPage { page_id, url } => {
                p.field("wiki")
                    .field(page_id)
                    .field(url.as_deref().unwrap_or(""));
            }
        }
    }

    p.field("facts");
    for f in facts {
        p.field(f.id.as_str())
            .field(&f.topic)
            .field(&f.claim)
            .field(f.source_id.as_str());
        for (attribute, expected) in f.applies_if.iter() {
            p.field(attribute).field(expected);
        }
        p.field(f.status.to_string().as_str());
    }

    p.0.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FactStatus;
    use crate::source::SourceKind;

    fn sources() -> Vec<Source> {
        vec![
            Source::new("DWG-1", "GA drawing", SourceKind::Drawing, SourceOrigin::file("dwg.pdf")),
            Source::new("QUOTE-1", "Quote", SourceKind::Quote, SourceOrigin::file("q.pdf")),
        ]
    }

    fn facts() -> Vec<Fact> {
        vec![
            Fact::new("F-1", "Material", "316L", "DWG-1"),
            Fact::new("F-2", "Material", "304", "QUOTE-1"),
            Fact::new("F-3", "Coating", "Zinc", "QUOTE-1").applies_if("customer", "ACME"),
        ]
    }

    fn project() -> ProjectContext {
        ProjectContext::new("Frame 12").with_attribute("customer", "Globex")
    }

    #[test]
    fn test_freeze_is_idempotent() {
        let a = ContextPack::freeze(sources(), facts(), project()).unwrap();
        let b = ContextPack::freeze(sources(), facts(), project()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
        assert_eq!(a.policy_version(), POLICY_VERSION);

        let refrozen =
            ContextPack::freeze(a.sources().to_vec(), a.facts().to_vec(), a.project().clone()).unwrap();
        assert_eq!(refrozen, a);
    }

    #[test]
    fn test_digest_changes_with_inputs() {
        let a = ContextPack::freeze(sources(), facts(), project()).unwrap();
        let mut changed = facts();
        changed[1].claim = "316".to_string();
        let b = ContextPack::freeze(sources(), changed, project()).unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_accessors() {
        let pack = ContextPack::freeze(sources(), facts(), project()).unwrap();
        assert_eq!(pack.canonical("MATERIAL").unwrap().id.as_str(), "F-1");
        assert_eq!(pack.facts_for("material").len(), 2);
        assert!(pack.facts_for("coating").is_empty());
        assert!(pack.canonical("coating").is_none());
        assert!(pack.is_excluded(&FactId::from("F-3")));
        assert_eq!(pack.excluded_facts().count(), 1);

        let c = pack.citation(&FactId::from("F-2")).unwrap();
        assert_eq!(c.source.id.as_str(), "QUOTE-1");
        assert_eq!(c.to_string(), "304 [QUOTE-1: Quote, superseded]");
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let mut s = sources();
        s.push(Source::new("DWG-1", "dup", SourceKind::Drawing, SourceOrigin::file("d2.pdf")));
        let err = ContextPack::freeze(s, facts(), project()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateSource {
                source_id: "DWG-1".to_string()
            }
        );
    }

    #[test]
    fn test_append_rebuilds_with_new_winner() {
        let pack = ContextPack::freeze(vec![sources()[1].clone()], vec![facts()[1].clone()], project())
            .unwrap();
        assert_eq!(pack.canonical("material").unwrap().claim, "304");

        let appended = pack
            .append(vec![sources()[0].clone()], vec![facts()[0].clone()])
            .unwrap();
        assert_eq!(appended.canonical("material").unwrap().claim, "316L");
        assert_eq!(
            appended.fact(&FactId::from("F-2")).unwrap().status,
            FactStatus::Superseded
        );
        assert_eq!(pack.canonical("material").unwrap().claim, "304");

        let err = appended.append(vec![sources()[0].clone()], vec![]).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateSource { .. }));
    }

    #[test]
    fn test_serde_round_trip_refreezes() {
        let pack = ContextPack::freeze(sources(), facts(), project()).unwrap();
        let mut json = serde_json::to_value(&pack).unwrap();
        assert_eq!(json["excluded_facts"][0], "F-3");
        assert_eq!(json["policy_version"], POLICY_VERSION);

        json["facts"][1]["status"] = serde_json::Value::from("canonical");
        let back: ContextPack = serde_json::from_value(json).unwrap();
        assert_eq!(back, pack);
        assert_eq!(back.canonical_facts().count(), 1);
    }
}
