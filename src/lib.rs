//! # buildplan - Source-precedence context and specialist coordination
//!
//! buildplan turns a project's uploaded documents into a frozen, citable
//! context and coordinates independent specialists that draft a
//! manufacturing build plan from it.
//!
//! ## Core Concepts
//!
//! - **Source**: a citable file or wiki page, classified by a fixed precedence policy
//! - **Fact**: one claim about a topic, citing one source
//! - **ContextPack**: the immutable result of resolving facts, one canonical per topic
//! - **Coordinator**: runs specialists concurrently and merges their patches
//!   under a fixed section-ownership map
//! - **QA gate**: scores the merged plan; scores below the threshold block publication
//!
//! ## Usage
//!
//! ```rust
//! use buildplan::{
//!     build_source_registry, ContextPack, Fact, FactStatus, ProjectContext, RegistryInput,
//!     UploadedFile,
//! };
//!
//! let project = ProjectContext::new("Frame 12").with_attribute("customer", "ACME");
//! let input = RegistryInput::new()
//!     .file(UploadedFile::new("frame_12_dwg.pdf").with_id("DWG-1"))
//!     .file(UploadedFile::new("Proposal for ACME Project.pdf").with_id("QUOTE-1"));
//! let registry = build_source_registry(&input, &project);
//!
//! let facts = vec![
//!     Fact::new("F-1", "Material", "316L", "DWG-1"),
//!     Fact::new("F-2", "Material", "304", "QUOTE-1"),
//! ];
//! let pack = ContextPack::freeze(registry.into_sources(), facts, project)?;
//!
//! assert_eq!(pack.canonical("Material").unwrap().claim, "316L");
//! assert_eq!(pack.fact(&"F-2".into()).unwrap().status, FactStatus::Superseded);
//! assert_eq!(pack.fact_conflicts().len(), 1);
//! # Ok::<(), buildplan::ValidationError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod text;

// Sources and facts
pub mod conflict;
pub mod error;
pub mod fact;
pub mod policy;
pub mod project;
pub mod registry;
pub mod source;

// Resolution and the frozen pack
pub mod context;
pub mod ingest;
pub mod resolution;

// Specialist coordination
pub mod coordinator;
pub mod fingerprint;
pub mod patch;
pub mod plan;
pub mod qa;
pub mod retry;
pub mod specialist;

// Outer surfaces
pub mod config;
pub mod publish;
pub mod session;

// Re-export primary types at crate root for convenience
pub use conflict::{Conflict, ConflictKind};
pub use error::{
    ConfigError, ExternalCallError, PlanError, PlanResult, PublishError, SessionError,
    ValidationError,
};
pub use fact::{Fact, FactId, FactStatus, ScopePredicate};
pub use policy::{classify, detect_kind, Classification, DetectionHints, POLICY_VERSION};
pub use project::ProjectContext;
pub use registry::{
    build_source_registry, RegistryInput, RegistryWarning, SourceOverride, SourceRegistry,
    SourceRegistryBuilder, UploadedFile, WikiPage,
};
pub use source::{Authority, Source, SourceId, SourceKind, SourceOrigin};

pub use context::{Citation, ContextPack, ContextPackSnapshot};
pub use ingest::{ingest, ingest_append, Ingested};
pub use resolution::{resolve_facts, validate_facts, Resolution, TopicResolution};

pub use coordinator::{
    merge_patches, run_specialists, Coordinator, MergeOutcome, OutcomeStatus, RunReport,
    RunWarning, SpecialistOutcome,
};
pub use fingerprint::{fingerprint, Fingerprint, FINGERPRINT_VERSION};
pub use patch::{ingest_patch, AgentPatch, AgentTask, OwnerHint, OwnershipViolation, PatchClaim, PatchIngest};
pub use plan::{Plan, SectionKey};
pub use qa::{QaGate, QaRequest, QaResult, QaReview, RuleBasedQa, DEFAULT_QA_THRESHOLD};
pub use retry::{RetryOutcome, RetryPolicy};
pub use specialist::{
    KnowledgeRef, SpecialistBackend, SpecialistRequest, SpecialistRole, SpecialistSet,
    StaticBackend,
};

pub use config::{BuildPlanConfig, CoordinatorConfig, RegistryConfig, RetryConfig, SessionConfig};
pub use publish::ensure_publishable;
pub use session::{InMemorySessionStore, SessionId, SessionSnapshot, SessionStore};
