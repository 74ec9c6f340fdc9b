//! Specialist patches and their ingestion.
//!
//! A specialist's output is untrusted JSON. [`ingest_patch`] schema-checks it
//! at the coordinator boundary and keeps only what the role may contribute:
//!
//! ```json
//! {
//!   "sections": { "purchasing": { "vendors": ["Acme Steel"] } },
//!   "tasks":    [ { "name": "Order 316L plate", "owner_hint": "BUY", "due": "2024-06-01" } ],
//!   "conflicts": [ { "topic": "Lead time", "issue": "6 vs 8 weeks", "citations": ["PO-1"] } ],
//!   "claims":   [ { "topic": "Material", "claim": "316L", "citations": ["DWG-1"] } ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::conflict::{Conflict, ConflictKind};
use crate::error::{ExternalCallError, ValidationError};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::plan::SectionKey;
use crate::source::SourceId;
use crate::specialist::SpecialistRole;

/// Team a follow-up task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OwnerHint {
    Eng,
    Qa,
    Buy,
    Sched,
    Legal,
}

impl OwnerHint {
    /// Upper-case code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Eng => "ENG",
            Self::Qa => "QA",
            Self::Buy => "BUY",
            Self::Sched => "SCHED",
            Self::Legal => "LEGAL",
        }
    }
}

impl fmt::Display for OwnerHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerHint {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENG" => Ok(Self::Eng),
            "QA" => Ok(Self::Qa),
            "BUY" => Ok(Self::Buy),
            "SCHED" => Ok(Self::Sched),
            "LEGAL" => Ok(Self::Legal),
            _ => Err(ValidationError::UnknownValue {
                field: "owner hint".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// A follow-up task proposed by a specialist.
///
/// The fingerprint is derived from name, owner hint and due hint, so those
/// are read-only. Deserializing recomputes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TaskRecord")]
pub struct AgentTask {
    name: String,
    owner_hint: OwnerHint,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    due_hint: Option<String>,

    fingerprint: Fingerprint,
}

impl AgentTask {
    /// Creates a task and computes its fingerprint.
    #[must_use]
    pub fn new(name: impl Into<String>, owner_hint: OwnerHint) -> Self {
        let name = name.into();
        let fingerprint = fingerprint(&name, owner_hint, None);
        Self {
            name,
            owner_hint,
            notes: String::new(),
            due_hint: None,
            fingerprint,
        }
    }

    /// Sets notes. Notes do not affect the fingerprint.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Sets the due hint and recomputes the fingerprint.
    #[must_use]
    pub fn with_due(mut self, due: impl Into<String>) -> Self {
        self.due_hint = Some(due.into());
        self.fingerprint = fingerprint(&self.name, self.owner_hint, self.due_hint.as_deref());
        self
    }

    /// Task name as proposed.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning team.
    #[must_use]
    pub fn owner_hint(&self) -> OwnerHint {
        self.owner_hint
    }

    /// Due hint as proposed, before rounding.
    #[must_use]
    pub fn due_hint(&self) -> Option<&str> {
        self.due_hint.as_deref()
    }

    /// Identity used for dedupe against the task tracker.
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

#[derive(Deserialize)]
struct TaskRecord {
    name: String,
    owner_hint: OwnerHint,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    due_hint: Option<String>,
}

impl From<TaskRecord> for AgentTask {
    fn from(record: TaskRecord) -> Self {
        let task = Self::new(record.name, record.owner_hint).with_notes(record.notes);
        match record.due_hint {
            Some(due) => task.with_due(due),
            None => task,
        }
    }
}

/// A claim a specialist relied on while drafting its sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchClaim {
    pub topic: String,
    pub claim: String,

    #[serde(default)]
    pub citations: Vec<SourceId>,
}

impl PatchClaim {
    /// Creates a claim.
    #[must_use]
    pub fn new<'a>(
        topic: impl Into<String>,
        claim: impl Into<String>,
        citations: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            topic: topic.into(),
            claim: claim.into(),
            citations: citations.into_iter().map(SourceId::from).collect(),
        }
    }
}

/// A specialist's validated contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPatch {
    pub owner: SpecialistRole,
    pub allowed_sections: Vec<SectionKey>,

    /// Section fragments, applied as JSON merge patches.
    #[serde(default)]
    pub sections: BTreeMap<SectionKey, JsonValue>,

    #[serde(default)]
    pub tasks: Vec<AgentTask>,

    #[serde(default)]
    pub conflicts: Vec<Conflict>,

    #[serde(default)]
    pub claims: Vec<PatchClaim>,
}

impl AgentPatch {
    /// An empty patch for a role, used when its call fails.
    #[must_use]
    pub fn empty(owner: SpecialistRole) -> Self {
        Self {
            owner,
            allowed_sections: owner.owned_sections().to_vec(),
            sections: BTreeMap::new(),
            tasks: Vec::new(),
            conflicts: Vec::new(),
            claims: Vec::new(),
        }
    }

    /// Returns true if the patch contributes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
            && self.tasks.is_empty()
            && self.conflicts.is_empty()
            && self.claims.is_empty()
    }
}

/// A write outside the writer's owned sections. The write is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipViolation {
    pub role: SpecialistRole,

    /// Section key as written by the specialist.
    pub section: String,

    /// Actual owner, if the key is an ownable section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<SpecialistRole>,
}

impl fmt::Display for OwnershipViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner {
            Some(owner) => write!(
                f,
                "{} wrote '{}' owned by {}",
                self.role, self.section, owner
            ),
            None => write!(f, "{} wrote unowned section '{}'", self.role, self.section),
        }
    }
}

/// Result of [`ingest_patch`].
#[derive(Debug, Clone, PartialEq)]
pub struct PatchIngest {
    pub patch: AgentPatch,
    pub violations: Vec<OwnershipViolation>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    name: String,
    #[serde(default)]
    owner_hint: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default, alias = "due_hint")]
    due: Option<String>,
}

const KNOWN_FIELDS: [&str; 4] = ["sections", "tasks", "conflicts", "claims"];

/// Schema-checks a specialist's raw output.
///
/// Unknown top-level fields are stripped with a warning. Section keys outside
/// the role's ownership are stripped and reported as violations. Malformed
/// tasks, conflicts and claims are dropped with a warning. Tasks without an
/// owner hint get the role's default; every task's fingerprint is recomputed.
///
/// # Errors
///
/// Returns `MalformedOutput` if the output is not a JSON object, or if
/// `sections` is present but not an object.
pub fn ingest_patch(role: SpecialistRole, raw: &JsonValue) -> Result<PatchIngest, ExternalCallError> {
    let JsonValue::Object(fields) = raw else {
        return Err(ExternalCallError::MalformedOutput {
            reason: format!("{role} output is not a JSON object"),
        });
    };

    let mut patch = AgentPatch::empty(role);
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    for key in fields.keys() {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            warnings.push(format!("{role}: ignored unknown field '{key}'"));
        }
    }

    match fields.get("sections") {
        None | Some(JsonValue::Null) => {}
        Some(JsonValue::Object(sections)) => {
            for (key, value) in sections {
                match key.parse::<SectionKey>() {
                    Ok(section) if role.owns(section) => {
                        patch.sections.insert(section, value.clone());
                    }
                    parsed => {
                        let violation = OwnershipViolation {
                            role,
                            section: key.clone(),
                            owner: parsed.ok().and_then(SpecialistRole::owner_of),
                        };
                        warn!(role = %role, section = %key, "dropping out-of-ownership write");
                        violations.push(violation);
                    }
                }
            }
        }
        Some(_) => {
            return Err(ExternalCallError::MalformedOutput {
                reason: format!("{role} output has non-object 'sections'"),
            });
        }
    }

    for (i, item) in array_items(fields.get("tasks"), "tasks", role, &mut warnings) {
        match task_from_raw(role, item) {
            Ok(task) => patch.tasks.push(task),
            Err(reason) => warnings.push(format!("{role}: dropped task #{i}: {reason}")),
        }
    }

    for (i, item) in array_items(fields.get("conflicts"), "conflicts", role, &mut warnings) {
        match serde_json::from_value::<Conflict>(item.clone()) {
            Ok(mut conflict) if !conflict.topic.trim().is_empty() => {
                conflict.kind = ConflictKind::Reported;
                conflict.raised_by.clear();
                conflict.raised_by(role);
                patch.conflicts.push(conflict);
            }
            Ok(_) => warnings.push(format!("{role}: dropped conflict #{i}: empty topic")),
            Err(e) => warnings.push(format!("{role}: dropped conflict #{i}: {e}")),
        }
    }

    for (i, item) in array_items(fields.get("claims"), "claims", role, &mut warnings) {
        match serde_json::from_value::<PatchClaim>(item.clone()) {
            Ok(claim) if !claim.topic.trim().is_empty() && !claim.claim.trim().is_empty() => {
                patch.claims.push(claim);
            }
            Ok(_) => warnings.push(format!("{role}: dropped claim #{i}: empty topic or claim")),
            Err(e) => warnings.push(format!("{role}: dropped claim #{i}: {e}")),
        }
    }

    for w in &warnings {
        warn!(role = %role, "{w}");
    }

    Ok(PatchIngest {
        patch,
        violations,
        warnings,
    })
}

fn array_items<'a>(
    value: Option<&'a JsonValue>,
    field: &str,
    role: SpecialistRole,
    warnings: &mut Vec<String>,
) -> impl Iterator<Item = (usize, &'a JsonValue)> {
    let items: &[JsonValue] = match value {
        None | Some(JsonValue::Null) => &[],
        Some(JsonValue::Array(items)) => items,
        Some(_) => {
            warnings.push(format!("{role}: ignored non-array '{field}'"));
            &[]
        }
    };
    items.iter().enumerate()
}

fn task_from_raw(role: SpecialistRole, item: &JsonValue) -> Result<AgentTask, String> {
    let raw: RawTask = serde_json::from_value(item.clone()).map_err(|e| e.to_string())?;
    let name = raw.name.trim();
    if name.is_empty() {
        return Err("empty name".to_string());
    }
    let owner_hint = match raw.owner_hint.as_deref().map(str::trim) {
        None | Some("") => role.default_owner_hint(),
        Some(hint) => hint.parse::<OwnerHint>().map_err(|e| e.to_string())?,
    };

    let mut task = AgentTask::new(name, owner_hint);
    if let Some(notes) = raw.notes {
        task = task.with_notes(notes);
    }
    if let Some(due) = raw.due.filter(|d| !d.trim().is_empty()) {
        task = task.with_due(due);
    }
    Ok(task)
}
