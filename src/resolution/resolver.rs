use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::conflict::{Conflict, ConflictKind};
use crate::error::ValidationError;
use crate::fact::{Fact, FactStatus};
use crate::project::ProjectContext;
use crate::resolution::{Resolution, TopicResolution};
use crate::source::{Source, SourceId};

/// Checks facts against the source registry without resolving them.
///
/// # Errors
///
/// Returns the first problem found, in input order:
/// - `MissingField` for an empty id, topic or claim;
/// - `DuplicateFact` for a repeated fact id;
/// - `UnknownSource` for a source id absent from `sources`.
pub fn validate_facts(sources: &[Source], facts: &[Fact]) -> Result<(), ValidationError> {
    let known: HashSet<&SourceId> = sources.iter().map(|s| &s.id).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(facts.len());

    for (index, fact) in facts.iter().enumerate() {
        if fact.id.as_str().trim().is_empty() {
            return Err(ValidationError::MissingField {
                record: format!("fact #{index}"),
                field: "id".to_string(),
            });
        }
        if fact.topic.trim().is_empty() {
            return Err(missing(fact, "topic"));
        }
        if fact.claim.trim().is_empty() {
            return Err(missing(fact, "claim"));
        }
        if !seen.insert(fact.id.as_str()) {
            return Err(ValidationError::DuplicateFact {
                fact_id: fact.id.to_string(),
            });
        }
        if !known.contains(&fact.source_id) {
            return Err(ValidationError::UnknownSource {
                fact_id: fact.id.to_string(),
                source_id: fact.source_id.to_string(),
            });
        }
    }
    Ok(())
}

fn missing(fact: &Fact, field: &str) -> ValidationError {
    ValidationError::MissingField {
        record: fact.id.to_string(),
        field: field.to_string(),
    }
}

/// Resolves candidate facts against a source registry and project context.
///
/// Any status already present on the input facts is discarded; the result
/// depends only on sources, facts (and their order) and the project.
///
/// # Errors
///
/// Returns a [`ValidationError`] if the facts fail [`validate_facts`].
#[instrument(skip_all, fields(sources = sources.len(), facts = facts.len()))]
pub fn resolve_facts(
    sources: &[Source],
    mut facts: Vec<Fact>,
    project: &ProjectContext,
) -> Result<Resolution, ValidationError> {
    validate_facts(sources, &facts)?;

    let by_id: HashMap<&SourceId, &Source> = sources.iter().map(|s| (&s.id, s)).collect();

    let mut excluded = Vec::new();
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();

    for (index, fact) in facts.iter_mut().enumerate() {
        fact.reset_resolution();
        if !fact.in_scope(project) {
            debug!(fact = %fact.id, topic = %fact.topic, "fact out of scope");
            excluded.push(fact.id.clone());
            continue;
        }
        let key = fact.topic_key();
        match group_index.get(&key) {
            Some(&g) => groups[g].1.push(index),
            None => {
                group_index.insert(key.clone(), groups.len());
                groups.push((key, vec![index]));
            }
        }
    }

    let mut topics = Vec::with_capacity(groups.len());
    let mut conflicts = Vec::new();

    for (_, mut members) in groups {
        // Validation guarantees every source is present.
        let rank = |i: &usize| {
            let (p, a) = by_id[&facts[*i].source_id].precedence_key();
            (p, a, *i)
        };
        let topic_text = facts[members[0]].topic.clone();
        members.sort_by_key(rank);

        let winner = members[0];
        let winner_id = facts[winner].id.clone();
        facts[winner].status = FactStatus::Canonical;

        let mut superseded = Vec::new();
        let mut proposed = Vec::new();
        for &loser in &members[1..] {
            let binding = by_id[&facts[loser].source_id].authority.is_binding();
            let fact = &mut facts[loser];
            fact.superseded_by = Some(winner_id.clone());
            if binding {
                fact.status = FactStatus::Superseded;
                superseded.push(fact.id.clone());
            } else {
                proposed.push(fact.id.clone());
            }
        }

        let conflict = disagreement(&topic_text, &members, &facts);
        let disputed = conflict.is_some();
        debug!(
            topic = %topic_text,
            canonical = %winner_id,
            candidates = members.len(),
            disputed,
            "topic resolved"
        );
        conflicts.extend(conflict);
        topics.push(TopicResolution {
            topic: topic_text,
            canonical: winner_id,
            superseded,
            proposed,
            disputed,
        });
    }

    Ok(Resolution {
        facts,
        excluded,
        topics,
        conflicts,
    })
}

/// Builds a conflict when ranked members make more than one distinct claim.
fn disagreement(topic: &str, ranked: &[usize], facts: &[Fact]) -> Option<Conflict> {
    let mut claims: Vec<(String, &Fact)> = Vec::new();
    for &i in ranked {
        let key = facts[i].claim_key();
        if !claims.iter().any(|(k, _)| *k == key) {
            claims.push((key, &facts[i]));
        }
    }
    if claims.len() < 2 {
        return None;
    }

    let (_, canonical) = &claims[0];
    let others: Vec<String> = claims[1..]
        .iter()
        .map(|(_, f)| format!("'{}' ({})", f.claim, f.source_id))
        .collect();
    let issue = format!(
        "canonical '{}' ({}) disagrees with {}",
        canonical.claim,
        canonical.source_id,
        others.join(", ")
    );

    Some(
        Conflict::new(topic, issue, ConflictKind::FactDisagreement)
            .with_citations(ranked.iter().map(|&i| &facts[i].source_id)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FactId;
    use crate::source::{Authority, SourceKind, SourceOrigin};

    fn src(id: &str, kind: SourceKind) -> Source {
        Source::new(id, id, kind, SourceOrigin::file(format!("{id}.pdf")))
    }

    fn registry() -> Vec<Source> {
        vec![
            src("DWG-1", SourceKind::Drawing),
            src("QUOTE-1", SourceKind::Quote),
            src("SPEC-1", SourceKind::GenericSpec),
            src("EMAIL-1", SourceKind::Email),
        ]
    }

    #[test]
    fn drawing_beats_quote_and_quote_is_superseded() {
        let facts = vec![
            Fact::new("F-2", "Material", "304", "QUOTE-1"),
            Fact::new("F-1", "Material", "316L", "DWG-1"),
        ];
        let r = resolve_facts(&registry(), facts, &ProjectContext::new("p")).unwrap();

        let t = r.topic("material").unwrap();
        assert_eq!(t.canonical.as_str(), "F-1");
        assert_eq!(t.superseded, vec![FactId::from("F-2")]);
        assert!(t.disputed);

        assert_eq!(r.facts[0].status, FactStatus::Superseded);
        assert_eq!(r.facts[0].superseded_by, Some("F-1".into()));
        assert_eq!(r.facts[1].status, FactStatus::Canonical);

        assert_eq!(r.conflicts.len(), 1);
        let c = &r.conflicts[0];
        assert_eq!(c.kind, ConflictKind::FactDisagreement);
        assert_eq!(c.citations, vec![SourceId::from("DWG-1"), SourceId::from("QUOTE-1")]);
        assert!(c.issue.contains("316L"));
        assert!(c.issue.contains("304"));
    }

    #[test]
    fn reference_and_internal_losers_stay_proposed() {
        let facts = vec![
            Fact::new("F-1", "Finish", "Ra 0.8", "DWG-1"),
            Fact::new("F-2", "Finish", "Ra 1.6", "SPEC-1"),
            Fact::new("F-3", "Finish", "Ra 3.2", "EMAIL-1"),
        ];
        let r = resolve_facts(&registry(), facts, &ProjectContext::new("p")).unwrap();
        let t = r.topic("Finish").unwrap();
        assert!(t.superseded.is_empty());
        assert_eq!(t.proposed.len(), 2);
        assert_eq!(r.facts[2].superseded_by, Some("F-1".into()));
        assert_eq!(r.conflicts[0].citations.len(), 3);
    }

    #[test]
    fn agreeing_claims_are_not_disputed() {
        let facts = vec![
            Fact::new("F-1", "Material", "316L", "DWG-1"),
            Fact::new("F-2", "material", " 316l ", "QUOTE-1"),
        ];
        let r = resolve_facts(&registry(), facts, &ProjectContext::new("p")).unwrap();
        assert_eq!(r.topics.len(), 1);
        assert!(!r.topics[0].disputed);
        assert!(r.conflicts.is_empty());
        assert_eq!(r.facts[1].status, FactStatus::Superseded);
    }

    #[test]
    fn ties_break_on_insertion_order() {
        let sources = vec![src("DWG-1", SourceKind::Drawing), src("PO-1", SourceKind::Po)];
        let facts = vec![
            Fact::new("F-PO", "Qty", "10", "PO-1"),
            Fact::new("F-DWG", "Qty", "12", "DWG-1"),
        ];
        let r = resolve_facts(&sources, facts, &ProjectContext::new("p")).unwrap();
        assert_eq!(r.topics[0].canonical.as_str(), "F-PO");
    }

    #[test]
    fn authority_breaks_equal_rank() {
        let sources = vec![
            src("A", SourceKind::Other).with_authority(Authority::Internal, 3),
            src("B", SourceKind::Other).with_authority(Authority::Conditional, 3),
        ];
        let facts = vec![Fact::new("F-A", "Qty", "10", "A"), Fact::new("F-B", "Qty", "12", "B")];
        let r = resolve_facts(&sources, facts, &ProjectContext::new("p")).unwrap();
        assert_eq!(r.topics[0].canonical.as_str(), "F-B");
        assert_eq!(r.facts[0].status, FactStatus::Proposed);
    }

    #[test]
    fn out_of_scope_fact_is_excluded_entirely() {
        let facts = vec![
            Fact::new("F-1", "Coating", "Zinc", "DWG-1").applies_if("customer", "ACME"),
            Fact::new("F-2", "Coating", "Paint", "QUOTE-1"),
        ];
        let project = ProjectContext::new("p").with_attribute("customer", "Globex");
        let r = resolve_facts(&registry(), facts, &project).unwrap();

        assert_eq!(r.excluded, vec![FactId::from("F-1")]);
        assert_eq!(r.facts[0].status, FactStatus::Proposed);
        assert_eq!(r.facts[0].superseded_by, None);
        assert_eq!(r.topics[0].canonical.as_str(), "F-2");
        assert!(r.conflicts.is_empty());
    }

    #[test]
    fn input_statuses_are_discarded() {
        let mut forged = Fact::new("F-2", "Material", "304", "QUOTE-1");
        forged.status = FactStatus::Canonical;
        let facts = vec![Fact::new("F-1", "Material", "316L", "DWG-1"), forged];
        let r = resolve_facts(&registry(), facts, &ProjectContext::new("p")).unwrap();
        assert_eq!(r.canonical_facts().count(), 1);
    }

    #[test]
    fn unknown_source_is_validation_error() {
        let facts = vec![Fact::new("F-9", "Material", "316L", "DWG-404")];
        let err = resolve_facts(&registry(), facts, &ProjectContext::new("p")).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownSource {
                fact_id: "F-9".to_string(),
                source_id: "DWG-404".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_and_empty_fields_are_rejected() {
        let dup = vec![
            Fact::new("F-1", "Material", "316L", "DWG-1"),
            Fact::new("F-1", "Finish", "Ra 0.8", "DWG-1"),
        ];
        assert!(matches!(
            validate_facts(&registry(), &dup),
            Err(ValidationError::DuplicateFact { .. })
        ));

        let empty = vec![Fact::new("F-1", " ", "316L", "DWG-1")];
        assert_eq!(
            validate_facts(&registry(), &empty),
            Err(ValidationError::MissingField {
                record: "F-1".to_string(),
                field: "topic".to_string(),
            })
        );
    }

    #[test]
    fn topics_follow_first_appearance() {
        let facts = vec![
            Fact::new("F-1", "Weld", "ISO 3834", "DWG-1"),
            Fact::new("F-2", "Material", "316L", "DWG-1"),
            Fact::new("F-3", "weld", "ISO 3834-2", "QUOTE-1"),
        ];
        let r = resolve_facts(&registry(), facts, &ProjectContext::new("p")).unwrap();
        let order: Vec<&str> = r.topics.iter().map(|t| t.topic.as_str()).collect();
        assert_eq!(order, vec!["Weld", "Material"]);
    }
}
