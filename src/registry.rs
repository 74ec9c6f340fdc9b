//! Source registry builder.
//!
//! Turns uploaded-file and wiki-page descriptors into an ordered list of
//! classified [`Source`] records. Every input yields exactly one source:
//! uploaded files first, then wiki pages, each in input order.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};

use crate::error::ValidationError;
use crate::policy::{self, Classification, DetectionHints};
use crate::project::ProjectContext;
use crate::source::{normalize_tags, Authority, Source, SourceId, SourceKind, SourceOrigin};
use crate::text::slug;

/// An uploaded document descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_name: String,

    /// Requested source id. Derived from the file stem when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(default)]
    pub scope_tags: Vec<String>,
}

impl UploadedFile {
    /// Creates a descriptor with only a file name.
    #[must_use]
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            id: None,
            title: None,
            mime_type: None,
            scope_tags: Vec::new(),
        }
    }

    /// Sets the requested id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Sets scope tags.
    #[must_use]
    pub fn with_scope_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    fn stem(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
    }
}

/// A wiki page descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiPage {
    pub page_id: String,
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Requested source id. Derived as `WIKI-<title slug>` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub scope_tags: Vec<String>,
}

impl WikiPage {
    /// Creates a page descriptor.
    #[must_use]
    pub fn new(page_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            title: title.into(),
            url: None,
            id: None,
            scope_tags: Vec::new(),
        }
    }

    /// Sets the page URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the requested id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOverride {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    authority: Option<String>,
    #[serde(default)]
    precedence_rank: Option<u32>,
}

/// A validated per-file classification override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceOverride {
    pub kind: Option<SourceKind>,
    pub authority: Option<Authority>,
    pub precedence_rank: Option<u32>,
}

impl SourceOverride {
    /// Schema-checks raw override metadata for `file_name`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedOverride` for a non-object, unknown fields, an unknown
    /// kind or authority, or a rank that is not a non-negative integer.
    pub fn parse(file_name: &str, raw: &JsonValue) -> Result<Self, ValidationError> {
        let malformed = |reason: String| ValidationError::MalformedOverride {
            file_name: file_name.to_string(),
            reason,
        };

        let raw: RawOverride =
            serde_json::from_value(raw.clone()).map_err(|e| malformed(e.to_string()))?;
        let kind = raw
            .kind
            .as_deref()
            .map(str::parse::<SourceKind>)
            .transpose()
            .map_err(|e| malformed(e.to_string()))?;
        let authority = raw
            .authority
            .as_deref()
            .map(str::parse::<Authority>)
            .transpose()
            .map_err(|e| malformed(e.to_string()))?;

        Ok(Self {
            kind,
            authority,
            precedence_rank: raw.precedence_rank,
        })
    }

    /// Applies the override on top of a detected classification.
    ///
    /// An overridden kind starts from that kind's table entry; explicit
    /// authority and rank then win verbatim.
    #[must_use]
    pub fn apply(&self, detected: Classification) -> Classification {
        let base = self.kind.map_or(detected, policy::classification);
        Classification {
            kind: base.kind,
            authority: self.authority.unwrap_or(base.authority),
            precedence_rank: self.precedence_rank.unwrap_or(base.precedence_rank),
        }
    }
}

/// Everything the registry builder consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryInput {
    #[serde(default)]
    pub files: Vec<UploadedFile>,

    /// Raw override metadata keyed by file name.
    #[serde(default)]
    pub overrides: BTreeMap<String, JsonValue>,

    #[serde(default)]
    pub wiki_pages: Vec<WikiPage>,
}

impl RegistryInput {
    /// Creates an empty input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an uploaded file.
    #[must_use]
    pub fn file(mut self, file: UploadedFile) -> Self {
        self.files.push(file);
        self
    }

    /// Adds a wiki page.
    #[must_use]
    pub fn wiki_page(mut self, page: WikiPage) -> Self {
        self.wiki_pages.push(page);
        self
    }

    /// Adds raw override metadata for a file name.
    #[must_use]
    pub fn with_override(mut self, file_name: impl Into<String>, raw: JsonValue) -> Self {
        self.overrides.insert(file_name.into(), raw);
        self
    }
}

/// A non-fatal problem found while building the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryWarning {
    /// Override metadata failed its schema check and was ignored.
    MalformedOverride { file_name: String, reason: String },

    /// Override keyed by a file name that was not uploaded.
    UnusedOverride { file_name: String },

    /// Requested id was already taken and a suffix was appended.
    IdRenamed { requested: String, assigned: SourceId },
}

/// Ordered sources plus the warnings raised while building them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    sources: Vec<Source>,

    #[serde(default)]
    warnings: Vec<RegistryWarning>,
}

impl SourceRegistry {
    /// Sources in registry order.
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Consumes the registry, returning its sources.
    #[must_use]
    pub fn into_sources(self) -> Vec<Source> {
        self.sources
    }

    /// Warnings raised during the build.
    #[must_use]
    pub fn warnings(&self) -> &[RegistryWarning] {
        &self.warnings
    }

    /// Looks up a source by id.
    #[must_use]
    pub fn get(&self, id: &SourceId) -> Option<&Source> {
        self.sources.iter().find(|s| &s.id == id)
    }

    /// Number of sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if there are no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Assigns `ID`, `ID-2`, `ID-3`, ... in request order.
#[derive(Debug, Default)]
struct IdAllocator {
    used: HashSet<String>,
}

impl IdAllocator {
    fn assign(&mut self, requested: &str) -> SourceId {
        if self.used.insert(requested.to_string()) {
            return SourceId::new(requested);
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{requested}-{n}");
            if self.used.insert(candidate.clone()) {
                return SourceId::new(candidate);
            }
            n += 1;
        }
    }
}

/// Builds a [`SourceRegistry`].
///
/// # Examples
///
/// ```
/// use buildplan::{ProjectContext, RegistryInput, SourceKind, SourceRegistryBuilder, UploadedFile};
///
/// let input = RegistryInput::new()
///     .file(UploadedFile::new("Purchase_Order_1001.pdf"))
///     .file(UploadedFile::new("Proposal for ACME Project.pdf"));
/// let registry = SourceRegistryBuilder::new()
///     .build(&input, &ProjectContext::new("Frame 12"))
///     .unwrap();
/// assert_eq!(registry.sources()[0].kind, SourceKind::Po);
/// assert_eq!(registry.sources()[1].kind, SourceKind::Quote);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceRegistryBuilder {
    strict_overrides: bool,
}

impl SourceRegistryBuilder {
    /// Creates a lenient builder: malformed overrides become warnings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder from configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::RegistryConfig) -> Self {
        Self {
            strict_overrides: config.strict_overrides,
        }
    }

    /// Rejects malformed overrides instead of ignoring them.
    #[must_use]
    pub fn strict_overrides(mut self, strict: bool) -> Self {
        self.strict_overrides = strict;
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Only in strict mode: returns `MalformedOverride` for the first override
    /// (in file order) that fails its schema check.
    pub fn build(
        &self,
        input: &RegistryInput,
        project: &ProjectContext,
    ) -> Result<SourceRegistry, ValidationError> {
        self.build_reserving(&[], input, project)
    }

    /// Builds the registry for sources appended after `existing`.
    ///
    /// Derived ids that collide with an existing source get the usual
    /// numeric suffix. Explicit ids must be new.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSource` for an explicit id already used by
    /// `existing`, and `MalformedOverride` in strict mode.
    pub fn build_after(
        &self,
        existing: &[Source],
        input: &RegistryInput,
        project: &ProjectContext,
    ) -> Result<SourceRegistry, ValidationError> {
        self.build_reserving(existing, input, project)
    }

    #[instrument(skip_all, fields(existing = existing.len(), files = input.files.len(), wiki_pages = input.wiki_pages.len()))]
    fn build_reserving(
        &self,
        existing: &[Source],
        input: &RegistryInput,
        project: &ProjectContext,
    ) -> Result<SourceRegistry, ValidationError> {
        let taken: HashSet<&str> = existing.iter().map(|s| s.id.as_str()).collect();
        let mut ids = IdAllocator {
            used: taken.iter().map(|id| (*id).to_string()).collect(),
        };
        let mut warnings = Vec::new();
        let mut sources = Vec::with_capacity(input.files.len() + input.wiki_pages.len());
        let customer = project.customer();

        for file in &input.files {
            let detected = policy::classify(&DetectionHints {
                file_name: Some(&file.file_name),
                title: file.title.as_deref(),
                mime_type: file.mime_type.as_deref(),
                customer,
            });
            let class = match input.overrides.get(&file.file_name) {
                None => detected,
                Some(raw) => match SourceOverride::parse(&file.file_name, raw) {
                    Ok(ov) => ov.apply(detected),
                    Err(err) if self.strict_overrides => return Err(err),
                    Err(err) => {
                        warn!(file = %file.file_name, error = %err, "ignoring malformed source override");
                        if let ValidationError::MalformedOverride { file_name, reason } = err {
                            warnings.push(RegistryWarning::MalformedOverride { file_name, reason });
                        }
                        detected
                    }
                },
            };

            let requested = explicit_id(file.id.as_deref(), &taken)?
                .map_or_else(|| derived_id(file.stem(), "SOURCE"), str::to_string);
            let id = allocate(&mut ids, &requested, &mut warnings);
            let title = file
                .title
                .clone()
                .unwrap_or_else(|| file.stem().to_string());
            let origin = SourceOrigin::UploadedFile {
                file_name: file.file_name.clone(),
                mime_type: file.mime_type.clone(),
            };
            sources.push(classified(id, title, class, &file.scope_tags, origin));
        }

        for page in &input.wiki_pages {
            let class = policy::classify(&DetectionHints {
                file_name: None,
                title: Some(&page.title),
                mime_type: None,
                customer,
            });
            let requested = explicit_id(page.id.as_deref(), &taken)?
                .map_or_else(
                    || {
                        let base = if slug(&page.title).is_empty() {
                            &page.page_id
                        } else {
                            &page.title
                        };
                        format!("WIKI-{}", derived_id(base, "PAGE"))
                    },
                    str::to_string,
                );
            let id = allocate(&mut ids, &requested, &mut warnings);
            let origin = SourceOrigin::WikiPage {
                page_id: page.page_id.clone(),
                url: page.url.clone(),
            };
            sources.push(classified(id, page.title.clone(), class, &page.scope_tags, origin));
        }

        let uploaded: HashSet<&str> = input.files.iter().map(|f| f.file_name.as_str()).collect();
        for file_name in input.overrides.keys() {
            if !uploaded.contains(file_name.as_str()) {
                warn!(file = %file_name, "override names a file that was not uploaded");
                warnings.push(RegistryWarning::UnusedOverride {
                    file_name: file_name.clone(),
                });
            }
        }

        debug!(sources = sources.len(), warnings = warnings.len(), "source registry built");
        Ok(SourceRegistry { sources, warnings })
    }
}

/// Lenient registry build: malformed overrides are ignored with a warning.
#[must_use]
pub fn build_source_registry(input: &RegistryInput, project: &ProjectContext) -> SourceRegistry {
    // Lenient builds have no error path.
    SourceRegistryBuilder::new()
        .build(input, project)
        .unwrap_or_default()
}

fn explicit_id<'a>(id: Option<&'a str>, taken: &HashSet<&str>) -> Result<Option<&'a str>, ValidationError> {
    match id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) if taken.contains(id) => Err(ValidationError::DuplicateSource {
            source_id: id.to_string(),
        }),
        other => Ok(other),
    }
}

fn derived_id(text: &str, fallback: &str) -> String {
    let s = slug(text);
    if s.is_empty() {
        fallback.to_string()
    } else {
        s
    }
}

fn allocate(ids: &mut IdAllocator, requested: &str, warnings: &mut Vec<RegistryWarning>) -> SourceId {
    let id = ids.assign(requested);
    if id.as_str() != requested {
        debug!(requested, assigned = %id, "source id disambiguated");
        warnings.push(RegistryWarning::IdRenamed {
            requested: requested.to_string(),
            assigned: id.clone(),
        });
    }
    id
}

fn classified(
    id: SourceId,
    title: String,
    class: Classification,
    tags: &[String],
    origin: SourceOrigin,
) -> Source {
    Source {
        id,
        title,
        kind: class.kind,
        authority: class.authority,
        precedence_rank: class.precedence_rank,
        scope_tags: normalize_tags(tags),
        origin,
    }
}
