//! Ingest convenience: source registry plus freeze.

use tracing::info;

use crate::config::RegistryConfig;
use crate::context::ContextPack;
use crate::error::ValidationError;
use crate::fact::Fact;
use crate::project::ProjectContext;
use crate::registry::{RegistryInput, RegistryWarning, SourceRegistryBuilder};

/// A frozen pack and the registry's warnings.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub context: ContextPack,
    pub warnings: Vec<RegistryWarning>,
}

/// Registers uploaded sources and freezes them with `facts`.
///
/// Facts cite sources by id, so callers that extract facts before
/// registration should pin ids with [`crate::UploadedFile::with_id`].
///
/// # Errors
///
/// Returns `MalformedOverride` in strict mode, or any freeze error.
///
/// # Examples
///
/// ```
/// use buildplan::{ingest, Fact, ProjectContext, RegistryConfig, RegistryInput, UploadedFile};
///
/// let input = RegistryInput::new()
///     .file(UploadedFile::new("bracket_rev_b.dwg").with_id("DWG-1"))
///     .file(UploadedFile::new("Proposal for ACME Project.pdf").with_id("QUOTE-1"));
/// let facts = vec![
///     Fact::new("F-1", "Material", "316L", "DWG-1"),
///     Fact::new("F-2", "Material", "304", "QUOTE-1"),
/// ];
/// let out = ingest(&input, facts, ProjectContext::new("Frame 12"), &RegistryConfig::default()).unwrap();
/// assert_eq!(out.context.canonical("material").unwrap().claim, "316L");
/// ```
pub fn ingest(
    input: &RegistryInput,
    facts: Vec<Fact>,
    project: ProjectContext,
    config: &RegistryConfig,
) -> Result<Ingested, ValidationError> {
    let registry = SourceRegistryBuilder::from_config(config).build(input, &project)?;
    let warnings = registry.warnings().to_vec();
    let context = ContextPack::freeze(registry.into_sources(), facts, project)?;
    info!(digest = %context.digest(), warnings = warnings.len(), "ingest complete");
    Ok(Ingested { context, warnings })
}

/// Registers more sources and rebuilds `context` from the union.
///
/// Derived ids that clash with a source already in the pack are suffixed
/// (`DWG-1001-2`), so re-uploading a revision never fails.
///
/// # Errors
///
/// Returns `DuplicateSource` if an explicit id is already in the pack,
/// `MalformedOverride` in strict mode, or any fact validation error.
pub fn ingest_append(
    context: &ContextPack,
    input: &RegistryInput,
    facts: Vec<Fact>,
    config: &RegistryConfig,
) -> Result<Ingested, ValidationError> {
    let registry = SourceRegistryBuilder::from_config(config).build_after(
        context.sources(),
        input,
        context.project(),
    )?;
    let warnings = registry.warnings().to_vec();
    let context = context.append(registry.into_sources(), facts)?;
    info!(digest = %context.digest(), warnings = warnings.len(), "append-ingest complete");
    Ok(Ingested { context, warnings })
}
