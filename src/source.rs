//! Source and provenance types.
//!
//! Every fact cites exactly one source. A source carries the authority and
//! precedence rank that decide which claim wins when documents disagree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::policy;

/// Identifier of a source, unique within one registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a source ID.
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

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What kind of document a source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Drawing,
    Po,
    Itp,
    Quote,
    SowSpec,
    CustomerSpec,
    SupplierQm,
    GenericSpec,
    MeetingNotes,
    Email,
    LessonsLearned,
    Other,
}

impl SourceKind {
    /// Every kind, in policy-table order.
    pub const ALL: [Self; 12] = [
        Self::Drawing,
        Self::Po,
        Self::Itp,
        Self::Quote,
        Self::SowSpec,
        Self::CustomerSpec,
        Self::SupplierQm,
        Self::GenericSpec,
        Self::MeetingNotes,
        Self::Email,
        Self::LessonsLearned,
        Self::Other,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Drawing => "drawing",
            Self::Po => "po",
            Self::Itp => "itp",
            Self::Quote => "quote",
            Self::SowSpec => "sow_spec",
            Self::CustomerSpec => "customer_spec",
            Self::SupplierQm => "supplier_qm",
            Self::GenericSpec => "generic_spec",
            Self::MeetingNotes => "meeting_notes",
            Self::Email => "email",
            Self::LessonsLearned => "lessons_learned",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownValue {
                field: "source kind".to_string(),
                value: s.to_string(),
            })
    }
}

/// How binding a source is.
///
/// Ordering follows strength: `Mandatory < Conditional < Reference < Internal`,
/// so a smaller value wins during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    /// Contractually binding (drawings, purchase orders).
    Mandatory,
    /// Binding once accepted (quotes, statements of work).
    Conditional,
    /// Advisory.
    Reference,
    /// Internal correspondence and lessons learned.
    Internal,
}

impl Authority {
    /// Rank used as the second resolution key (lower wins).
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Mandatory => 0,
            Self::Conditional => 1,
            Self::Reference => 2,
            Self::Internal => 3,
        }
    }

    /// Mandatory and conditional sources hard-supersede the claims they beat.
    #[must_use]
    pub const fn is_binding(&self) -> bool {
        matches!(self, Self::Mandatory | Self::Conditional)
    }

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mandatory => "mandatory",
            Self::Conditional => "conditional",
            Self::Reference => "reference",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Authority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mandatory" => Ok(Self::Mandatory),
            "conditional" => Ok(Self::Conditional),
            "reference" => Ok(Self::Reference),
            "internal" => Ok(Self::Internal),
            _ => Err(ValidationError::UnknownValue {
                field: "authority".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Where a source came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceOrigin {
    UploadedFile {
        file_name: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },

    WikiPage {
        page_id: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl SourceOrigin {
    /// Creates an uploaded-file origin.
    #[must_use]
    pub fn file(file_name: impl Into<String>) -> Self {
        Self::UploadedFile {
            file_name: file_name.into(),
            mime_type: None,
        }
    }

    /// Creates a wiki-page origin.
    #[must_use]
    pub fn wiki(page_id: impl Into<String>) -> Self {
        Self::WikiPage {
            page_id: page_id.into(),
            url: None,
        }
    }

    /// Returns a human-readable origin type.
    #[must_use]
    pub const fn origin_type(&self) -> &'static str {
        match self {
            Self::UploadedFile { .. } => "uploaded_file",
            Self::WikiPage { .. } => "wiki_page",
        }
    }
}

/// A citable origin with an authority/precedence classification.
///
/// # Examples
///
/// ```
/// use buildplan::{Authority, Source, SourceKind, SourceOrigin};
///
/// let dwg = Source::new("DWG-1", "GA drawing rev C", SourceKind::Drawing, SourceOrigin::file("dwg-1.pdf"));
/// assert_eq!(dwg.authority, Authority::Mandatory);
/// assert_eq!(dwg.precedence_rank, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub title: String,
    pub kind: SourceKind,
    pub authority: Authority,

    /// Lower wins.
    pub precedence_rank: u32,

    #[serde(default)]
    pub scope_tags: Vec<String>,

    pub origin: SourceOrigin,
}

impl Source {
    /// Creates a source classified by the static policy table for `kind`.
    #[must_use]
    pub fn new(
        id: impl Into<SourceId>,
        title: impl Into<String>,
        kind: SourceKind,
        origin: SourceOrigin,
    ) -> Self {
        let class = policy::classification(kind);
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            authority: class.authority,
            precedence_rank: class.precedence_rank,
            scope_tags: Vec::new(),
            origin,
        }
    }

    /// Replaces the policy-table classification.
    #[must_use]
    pub fn with_authority(mut self, authority: Authority, precedence_rank: u32) -> Self {
        self.authority = authority;
        self.precedence_rank = precedence_rank;
        self
    }

    /// Sets scope tags (normalized, deduplicated, sorted).
    #[must_use]
    pub fn with_scope_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scope_tags = normalize_tags(tags);
        self
    }

    /// Resolution key: (precedence_rank, authority rank). Lower wins.
    #[must_use]
    pub const fn precedence_key(&self) -> (u32, u8) {
        (self.precedence_rank, self.authority.rank())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, rank {})",
            self.id, self.kind, self.authority, self.precedence_rank
        )
    }
}

pub(crate) fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
