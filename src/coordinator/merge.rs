//! Single-writer merge of specialist patches.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::conflict::{Conflict, ConflictKind};
use crate::context::ContextPack;
use crate::fingerprint::Fingerprint;
use crate::patch::{AgentPatch, AgentTask, OwnershipViolation, PatchClaim};
use crate::plan::Plan;
use crate::specialist::SpecialistRole;
use crate::text::normalize_key;

/// Result of merging a batch of patches.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub plan: Plan,

    /// New tasks, first proposer wins.
    pub tasks: Vec<AgentTask>,

    /// Fingerprints proposed more than once in this run.
    pub duplicate_tasks: Vec<Fingerprint>,

    /// Fingerprints the caller had already created.
    pub skipped_existing: Vec<Fingerprint>,

    pub conflicts: Vec<Conflict>,
    pub violations: Vec<OwnershipViolation>,
}

/// Merges patches into a copy of `base`.
///
/// Patches are applied in the order given; the coordinator passes them in
/// fixed specialist order so the result does not depend on completion order.
#[must_use]
pub fn merge_patches(
    base: &Plan,
    patches: &[AgentPatch],
    context: &ContextPack,
    already_created: &BTreeSet<Fingerprint>,
) -> MergeOutcome {
    let mut plan = base.clone();
    let mut violations = Vec::new();

    for patch in patches {
        for (section, value) in &patch.sections {
            if patch.owner.owns(*section) {
                plan.merge_section(*section, value);
            } else {
                warn!(role = %patch.owner, section = %section, "dropping out-of-ownership write");
                violations.push(OwnershipViolation {
                    role: patch.owner,
                    section: section.as_str().to_string(),
                    owner: SpecialistRole::owner_of(*section),
                });
            }
        }
    }

    let (tasks, duplicate_tasks, skipped_existing) = collect_tasks(patches, already_created);

    let mut conflicts = ConflictSet::default();
    for patch in patches {
        for c in &patch.conflicts {
            conflicts.add(c.clone());
        }
    }
    for c in claim_conflicts(patches, context) {
        conflicts.add(c);
    }
    let conflicts = conflicts.into_vec();

    info!(
        tasks = tasks.len(),
        duplicates = duplicate_tasks.len(),
        skipped = skipped_existing.len(),
        conflicts = conflicts.len(),
        violations = violations.len(),
        "patches merged"
    );

    MergeOutcome {
        plan,
        tasks,
        duplicate_tasks,
        skipped_existing,
        conflicts,
        violations,
    }
}

fn collect_tasks(
    patches: &[AgentPatch],
    already_created: &BTreeSet<Fingerprint>,
) -> (Vec<AgentTask>, Vec<Fingerprint>, Vec<Fingerprint>) {
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    let mut duplicates = Vec::new();
    let mut skipped = Vec::new();

    for patch in patches {
        for task in &patch.tasks {
            let fp = task.fingerprint();
            if already_created.contains(fp) {
                debug!(role = %patch.owner, task = %task.name(), fingerprint = %fp, "task already created");
                skipped.push(fp.clone());
            } else if !seen.insert(fp.clone()) {
                debug!(role = %patch.owner, task = %task.name(), fingerprint = %fp, "duplicate task");
                duplicates.push(fp.clone());
            } else {
                tasks.push(task.clone());
            }
        }
    }
    (tasks, duplicates, skipped)
}

/// Conflicts deduplicated by normalized topic and issue, first-seen order.
#[derive(Default)]
struct ConflictSet {
    items: Vec<Conflict>,
    index: HashMap<(String, String), usize>,
}

impl ConflictSet {
    fn add(&mut self, conflict: Conflict) {
        let key = conflict.dedupe_key();
        match self.index.get(&key) {
            Some(&i) => self.items[i].absorb(&conflict),
            None => {
                self.index.insert(key, self.items.len());
                self.items.push(conflict);
            }
        }
    }

    fn into_vec(self) -> Vec<Conflict> {
        self.items
    }
}

struct TopicClaims<'a> {
    topic: &'a str,
    claims: Vec<(SpecialistRole, &'a PatchClaim)>,
}

fn claim_conflicts(patches: &[AgentPatch], context: &ContextPack) -> Vec<Conflict> {
    let mut topics: Vec<TopicClaims<'_>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for patch in patches {
        for claim in &patch.claims {
            let key = normalize_key(&claim.topic);
            let i = *index.entry(key).or_insert_with(|| {
                topics.push(TopicClaims {
                    topic: &claim.topic,
                    claims: Vec::new(),
                });
                topics.len() - 1
            });
            // A specialist holds one position per topic: its last claim.
            let claims = &mut topics[i].claims;
            match claims.iter_mut().find(|(role, _)| *role == patch.owner) {
                Some(slot) => {
                    if normalize_key(&slot.1.claim) != normalize_key(&claim.claim) {
                        warn!(
                            role = %patch.owner,
                            topic = %claim.topic,
                            replaced = %slot.1.claim,
                            claim = %claim.claim,
                            "specialist restated a topic; keeping its last claim"
                        );
                    }
                    slot.1 = claim;
                }
                None => claims.push((patch.owner, claim)),
            }
        }
    }

    let mut out = Vec::new();
    for group in &topics {
        out.extend(cross_specialist(group));
        out.extend(against_canonical(group, context));
    }
    out
}

/// Two or more specialists relied on different claims for one topic.
///
/// Each role appears at most once in `group`, so two sides always means
/// two specialists.
fn cross_specialist(group: &TopicClaims<'_>) -> Option<Conflict> {
    let mut sides: Vec<(String, &str, Vec<SpecialistRole>)> = Vec::new();
    for (role, claim) in &group.claims {
        let key = normalize_key(&claim.claim);
        match sides.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, roles)) => {
                if !roles.contains(role) {
                    roles.push(*role);
                }
            }
            None => sides.push((key, claim.claim.as_str(), vec![*role])),
        }
    }
    if sides.len() < 2 {
        return None;
    }

    let parts: Vec<String> = sides
        .iter()
        .map(|(_, claim, roles)| {
            let names: Vec<&str> = roles.iter().map(SpecialistRole::as_str).collect();
            format!("{} says '{claim}'", names.join("+"))
        })
        .collect();
    let mut conflict = Conflict::new(group.topic, parts.join(", "), ConflictKind::CrossSpecialist)
        .with_citations(group.claims.iter().flat_map(|(_, c)| c.citations.iter()));
    for (role, _) in &group.claims {
        conflict.raised_by(*role);
    }
    warn!(topic = %group.topic, sides = sides.len(), "specialists disagree");
    Some(conflict)
}

/// Specialist claims that differ from the canonical fact.
fn against_canonical(group: &TopicClaims<'_>, context: &ContextPack) -> Vec<Conflict> {
    let Some(canonical) = context.canonical(group.topic) else {
        return Vec::new();
    };
    let canonical_key = canonical.claim_key();

    let mut set = ConflictSet::default();
    for (role, claim) in &group.claims {
        if normalize_key(&claim.claim) == canonical_key {
            continue;
        }
        let issue = format!(
            "specialist claim '{}' contradicts canonical '{}' ({})",
            claim.claim, canonical.claim, canonical.source_id
        );
        let mut conflict = Conflict::new(group.topic, issue, ConflictKind::ContradictsCanonical)
            .with_citations(std::iter::once(&canonical.source_id).chain(claim.citations.iter()));
        conflict.raised_by(*role);
        warn!(role = %role, topic = %group.topic, claim = %claim.claim, "claim contradicts canonical fact");
        set.add(conflict);
    }
    set.into_vec()
}
