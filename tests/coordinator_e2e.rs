use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use buildplan::{
    fingerprint, ConflictKind, ContextPack, Coordinator, CoordinatorConfig, ExternalCallError, Fact,
    KnowledgeRef, OutcomeStatus, OwnerHint, Plan, PlanError, ProjectContext, PublishError, QaRequest,
    QaReview, RunReport, SectionKey, Source, SourceKind, SourceOrigin, SpecialistRequest,
    SpecialistRole, SpecialistSet, StaticBackend,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn context() -> ContextPack {
    let sources = vec![
        Source::new("DWG-1", "Frame drawing", SourceKind::Drawing, SourceOrigin::file("frame_dwg.pdf")),
        Source::new("QUOTE-1", "Acme quote", SourceKind::Quote, SourceOrigin::file("quote.pdf")),
    ];
    let facts = vec![
        Fact::new("F-1", "Material", "316L", "DWG-1"),
        Fact::new("F-2", "Material", "304", "QUOTE-1"),
    ];
    ContextPack::freeze(sources, facts, ProjectContext::new("Frame 12")).unwrap()
}

fn config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig {
        batch_timeout_ms: 2_000,
        qa_timeout_ms: 1_000,
        ..CoordinatorConfig::default()
    };
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config
}

fn quality() -> StaticBackend {
    StaticBackend::new(json!({
        "sections": {
            "quality_plan": {"hold_points": ["weld NDT"]},
            "purchasing": {"vendors": ["Quality's favourite mill"]}
        },
        "claims": [{"topic": "Material", "claim": "316L", "citations": ["DWG-1"]}]
    }))
}

fn purchasing() -> StaticBackend {
    StaticBackend::new(json!({
        "sections": {"purchasing": {"vendors": ["Acme Steel"]}},
        "tasks": [{"name": "Order 316L plate", "due": "2024-06-01"}],
        "claims": [{"topic": "material", "claim": "304", "citations": ["QUOTE-1"]}]
    }))
}

fn scheduling() -> StaticBackend {
    StaticBackend::new(json!({
        "sections": {
            "release_plan": {"lots": 2},
            "execution_strategy": {"shifts": 1}
        },
        "tasks": [
            {"name": "order 316l   plate", "owner_hint": "BUY", "due": "2024-06-01T16:00:00Z"},
            {"name": "Book paint line", "due": "2024-06-10"}
        ]
    }))
}

fn engineering() -> StaticBackend {
    StaticBackend::new(json!({
        "sections": {"engineering_instructions": {"weld_procedure": "WPS-7"}}
    }))
}

fn full_set() -> SpecialistSet {
    SpecialistSet::new()
        .with(SpecialistRole::Quality, quality())
        .unwrap()
        .with(SpecialistRole::Purchasing, purchasing())
        .unwrap()
        .with(SpecialistRole::Scheduling, scheduling())
        .unwrap()
        .with(SpecialistRole::Engineering, engineering())
        .unwrap()
}

fn run(coordinator: &Coordinator, created: &BTreeSet<buildplan::Fingerprint>) -> RunReport {
    coordinator
        .run(&Plan::new(), &context(), &KnowledgeRef::new("kb-frame-12"), created)
        .unwrap()
}

#[test]
fn foreign_section_writes_are_dropped() {
    init_tracing();
    let coordinator = Coordinator::new(full_set()).with_config(config());
    let report = run(&coordinator, &BTreeSet::new());

    assert_eq!(
        report.plan.section(SectionKey::Purchasing),
        Some(&json!({"vendors": ["Acme Steel"]}))
    );
    assert_eq!(report.violations.len(), 1);
    let v = &report.violations[0];
    assert_eq!(v.role, SpecialistRole::Quality);
    assert_eq!(v.section, "purchasing");
    assert_eq!(v.owner, Some(SpecialistRole::Purchasing));
    for key in SectionKey::ALL {
        assert!(!report.plan.is_section_empty(key), "{key} should be filled");
    }
}

#[test]
fn tasks_are_deduplicated_by_fingerprint() {
    init_tracing();
    let coordinator = Coordinator::new(full_set()).with_config(config());
    let report = run(&coordinator, &BTreeSet::new());

    let names: Vec<&str> = report.tasks.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["Order 316L plate", "Book paint line"]);
    assert_eq!(report.tasks[1].owner_hint(), OwnerHint::Sched);
    assert_eq!(
        report.duplicate_tasks,
        vec![fingerprint("Order 316L plate", OwnerHint::Buy, Some("2024-06-01"))]
    );

    // A second run against the tracker's created set proposes nothing new.
    let created: BTreeSet<_> = report.task_fingerprints().cloned().collect();
    let second = run(&coordinator, &created);
    assert!(second.tasks.is_empty());
    assert_eq!(second.skipped_existing.len(), 3);
}

#[test]
fn claims_raise_cross_specialist_and_canonical_conflicts() {
    init_tracing();
    let coordinator = Coordinator::new(full_set()).with_config(config());
    let report = run(&coordinator, &BTreeSet::new());

    let kinds: Vec<ConflictKind> = report.conflicts.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ConflictKind::CrossSpecialist, ConflictKind::ContradictsCanonical]);

    let canonical = &report.conflicts[1];
    assert_eq!(canonical.raised_by, vec![SpecialistRole::Purchasing]);
    let cited: Vec<&str> = canonical.citations.iter().map(|s| s.as_str()).collect();
    assert_eq!(cited, vec!["DWG-1", "QUOTE-1"]);
}

#[test]
fn failing_specialist_does_not_abort_the_run() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let flaky = move |_: &SpecialistRequest| -> Result<JsonValue, ExternalCallError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(ExternalCallError::transient("upstream 503"))
    };
    let specialists = SpecialistSet::new()
        .with(SpecialistRole::Quality, quality())
        .unwrap()
        .with(SpecialistRole::Purchasing, flaky)
        .unwrap()
        .with(SpecialistRole::Engineering, engineering())
        .unwrap();

    let report = run(&Coordinator::new(specialists).with_config(config()), &BTreeSet::new());

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let purchasing = report
        .outcomes
        .iter()
        .find(|o| o.role == SpecialistRole::Purchasing)
        .unwrap();
    assert_eq!(purchasing.status, OutcomeStatus::Failed);
    assert_eq!(purchasing.attempts, 3);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.role == Some(SpecialistRole::Purchasing) && w.message.contains("upstream 503")));

    assert!(!report.plan.is_section_empty(SectionKey::QualityPlan));
    assert!(!report.plan.is_section_empty(SectionKey::EngineeringInstructions));
    assert!(report.plan.is_section_empty(SectionKey::Purchasing));

    // Built-in gate: 3 empty sections, 1 failed specialist, 1 violation.
    assert_eq!(report.qa.score, 100 - 3 * 15 - 10 - 5);
    assert!(report.qa.blocked);
}

#[test]
fn qa_score_72_blocks_publication() {
    init_tracing();
    let gate = |request: &QaRequest| -> Result<QaReview, ExternalCallError> {
        assert!(!request.plan.is_section_empty(SectionKey::QualityPlan));
        Ok(QaReview {
            score: 72,
            findings: vec!["no hold point after final weld".to_string()],
            fixes: vec!["Add hold point for weld NDT".to_string()],
        })
    };
    let coordinator = Coordinator::new(full_set()).with_qa_gate(gate).with_config(config());
    let report = run(&coordinator, &BTreeSet::new());

    assert_eq!(report.qa.score, 72);
    assert!(report.qa.blocked);
    // The plan is still returned in full.
    assert!(!report.plan.is_empty());

    let err = report.ensure_publishable().unwrap_err();
    let PublishError::QaBlocked { score, threshold, fixes } = &err;
    assert_eq!((*score, *threshold), (72, 85));
    assert_eq!(fixes, &vec!["Add hold point for weld NDT".to_string()]);
    assert!(PlanError::from(err).is_publish_blocked());
}

#[test]
fn repeated_runs_merge_identically() {
    init_tracing();
    let coordinator = Coordinator::new(full_set()).with_config(config());
    let a = run(&coordinator, &BTreeSet::new());
    let b = run(&coordinator, &BTreeSet::new());
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.plan, b.plan);
    assert_eq!(a.tasks, b.tasks);
    assert_eq!(a.conflicts, b.conflicts);
    assert_eq!(a.qa, b.qa);
}

#[test]
fn run_report_serializes() {
    let coordinator = Coordinator::new(full_set()).with_config(config());
    let report = run(&coordinator, &BTreeSet::new());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcomes"][0]["status"], json!("ok"));
    assert_eq!(json["qa"]["threshold"], json!(85));
    let back: RunReport = serde_json::from_value(json).unwrap();
    assert_eq!(back, report);
}
