use buildplan::{
    build_source_registry, ContextPack, Fact, FactId, FactStatus, ProjectContext, RegistryInput,
    SourceKind, UploadedFile,
};

fn project(customer: &str) -> ProjectContext {
    ProjectContext::new("Frame 12").with_attribute("customer", customer)
}

fn registry_input() -> RegistryInput {
    RegistryInput::new()
        .file(UploadedFile::new("frame_12_dwg.pdf").with_id("DWG-1"))
        .file(UploadedFile::new("Proposal for ACME Project.pdf").with_id("QUOTE-1"))
        .file(UploadedFile::new("Purchase_Order_1001.pdf").with_id("PO-1"))
        .file(UploadedFile::new("Kickoff meeting notes.docx").with_id("MTG-1"))
}

fn facts() -> Vec<Fact> {
    vec![
        Fact::new("F-1", "Material", "316L", "DWG-1"),
        Fact::new("F-2", "Material", "304", "QUOTE-1"),
        Fact::new("F-3", "Lead time", "8 weeks", "QUOTE-1"),
        Fact::new("F-4", "Lead time", "6 weeks", "PO-1"),
        Fact::new("F-5", "Packaging", "Crated", "MTG-1").applies_if("customer", "ACME"),
    ]
}

fn freeze(customer: &str) -> ContextPack {
    let project = project(customer);
    let registry = build_source_registry(&registry_input(), &project);
    ContextPack::freeze(registry.into_sources(), facts(), project).unwrap()
}

fn status(pack: &ContextPack, id: &str) -> FactStatus {
    pack.fact(&FactId::from(id)).unwrap().status
}

#[test]
fn registry_detects_kinds_from_file_names() {
    let registry = build_source_registry(&registry_input(), &project("ACME"));
    let kinds: Vec<SourceKind> = registry.sources().iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![SourceKind::Drawing, SourceKind::Quote, SourceKind::Po, SourceKind::MeetingNotes]
    );
    assert!(registry.warnings().is_empty());
}

#[test]
fn drawing_beats_quote_on_material() {
    let pack = freeze("ACME");

    let canonical = pack.canonical("material").unwrap();
    assert_eq!(canonical.id, FactId::from("F-1"));
    assert_eq!(canonical.claim, "316L");

    // The quote is conditional, so it is superseded and points at the winner.
    let quote = pack.fact(&FactId::from("F-2")).unwrap();
    assert_eq!(quote.status, FactStatus::Superseded);
    assert_eq!(quote.superseded_by, Some(FactId::from("F-1")));

    let conflict = pack
        .fact_conflicts()
        .iter()
        .find(|c| c.topic == "Material")
        .unwrap();
    let cited: Vec<&str> = conflict.citations.iter().map(|s| s.as_str()).collect();
    assert_eq!(cited, vec!["DWG-1", "QUOTE-1"]);
}

#[test]
fn purchase_order_beats_quote_on_lead_time() {
    let pack = freeze("ACME");
    assert_eq!(status(&pack, "F-4"), FactStatus::Canonical);
    assert_eq!(status(&pack, "F-3"), FactStatus::Superseded);

    let citation = pack.citation(&FactId::from("F-3")).unwrap();
    assert_eq!(citation.source.kind, SourceKind::Quote);
}

#[test]
fn out_of_scope_fact_is_excluded() {
    let acme = freeze("ACME");
    assert_eq!(status(&acme, "F-5"), FactStatus::Canonical);

    let globex = freeze("Globex");
    assert!(globex.is_excluded(&FactId::from("F-5")));
    assert_eq!(status(&globex, "F-5"), FactStatus::Proposed);
    assert_eq!(globex.fact(&FactId::from("F-5")).unwrap().superseded_by, None);
    assert_eq!(globex.excluded_facts().count(), 1);
    assert!(!acme.is_excluded(&FactId::from("F-5")));
    assert!(globex.canonical("Packaging").is_none());
    assert!(globex.facts_for("packaging").is_empty());
}

#[test]
fn every_topic_has_exactly_one_canonical() {
    let pack = freeze("ACME");
    for resolution in pack.resolutions() {
        let canonical: Vec<&Fact> = pack
            .facts_for(&resolution.topic)
            .into_iter()
            .filter(|f| f.is_canonical())
            .collect();
        assert_eq!(canonical.len(), 1, "topic {}", resolution.topic);
        assert_eq!(canonical[0].id, resolution.canonical);
    }
}

#[test]
fn refreeze_is_idempotent() {
    let a = freeze("ACME");
    let b = freeze("ACME");
    assert_eq!(a, b);
    assert_eq!(a.digest(), b.digest());

    // Re-freezing a pack's own output changes nothing either.
    let again = ContextPack::freeze(a.sources().to_vec(), a.facts().to_vec(), a.project().clone()).unwrap();
    assert_eq!(again.digest(), a.digest());
}

#[test]
fn append_matches_single_freeze() {
    let project = project("ACME");
    let registry = build_source_registry(&registry_input(), &project);
    let sources = registry.into_sources();
    let facts = facts();

    let whole = ContextPack::freeze(sources.clone(), facts.clone(), project.clone()).unwrap();
    let first = ContextPack::freeze(sources[..2].to_vec(), facts[..2].to_vec(), project).unwrap();
    let appended = first.append(sources[2..].to_vec(), facts[2..].to_vec()).unwrap();

    assert_eq!(appended.digest(), whole.digest());
}

#[test]
fn snapshot_round_trip_repairs_tampered_status() {
    let pack = freeze("ACME");
    let mut json = serde_json::to_value(&pack).unwrap();
    for fact in json["facts"].as_array_mut().unwrap() {
        fact["status"] = serde_json::json!("canonical");
    }
    let restored: ContextPack = serde_json::from_value(json).unwrap();
    assert_eq!(restored, pack);
}
