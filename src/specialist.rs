//! Specialists and their backends.
//!
//! The set of specialists is closed. Each contributor owns a disjoint set of
//! plan sections; the QA gate owns none and runs after the merge.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::context::ContextPack;
use crate::error::{ExternalCallError, ValidationError};
use crate::patch::OwnerHint;
use crate::plan::{Plan, SectionKey};

/// A specialist role.
///
/// Declaration order is the fixed merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistRole {
    Quality,
    Purchasing,
    Scheduling,
    Engineering,
    /// Terminal gate; writes nothing.
    Qa,
}

impl SpecialistRole {
    /// Contributors in merge order (the QA gate excluded).
    pub const CONTRIBUTORS: [Self; 4] = [
        Self::Quality,
        Self::Purchasing,
        Self::Scheduling,
        Self::Engineering,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Purchasing => "purchasing",
            Self::Scheduling => "scheduling",
            Self::Engineering => "engineering",
            Self::Qa => "qa",
        }
    }

    /// Sections this role may write.
    #[must_use]
    pub const fn owned_sections(&self) -> &'static [SectionKey] {
        match self {
            Self::Quality => &[SectionKey::QualityPlan],
            Self::Purchasing => &[SectionKey::Purchasing],
            Self::Scheduling => &[SectionKey::ReleasePlan, SectionKey::ExecutionStrategy],
            Self::Engineering => &[SectionKey::EngineeringInstructions],
            Self::Qa => &[],
        }
    }

    /// Returns true if this role may write `section`.
    #[must_use]
    pub fn owns(&self, section: SectionKey) -> bool {
        self.owned_sections().contains(&section)
    }

    /// The role that owns `section`.
    #[must_use]
    pub fn owner_of(section: SectionKey) -> Option<Self> {
        Self::CONTRIBUTORS.into_iter().find(|r| r.owns(section))
    }

    /// Owner hint used for tasks that omit one.
    #[must_use]
    pub const fn default_owner_hint(&self) -> OwnerHint {
        match self {
            Self::Quality | Self::Qa => OwnerHint::Qa,
            Self::Purchasing => OwnerHint::Buy,
            Self::Scheduling => OwnerHint::Sched,
            Self::Engineering => OwnerHint::Eng,
        }
    }
}

impl fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecialistRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "purchasing" => Ok(Self::Purchasing),
            "scheduling" => Ok(Self::Scheduling),
            "engineering" => Ok(Self::Engineering),
            "qa" => Ok(Self::Qa),
            _ => Err(ValidationError::UnknownValue {
                field: "specialist role".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Opaque reference to a knowledge-retrieval collection. Passed through
/// to specialists uninterpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnowledgeRef(String);

impl KnowledgeRef {
    /// Wraps a knowledge reference.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KnowledgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only inputs handed to one specialist call.
#[derive(Debug, Clone)]
pub struct SpecialistRequest {
    pub role: SpecialistRole,
    pub plan: Arc<Plan>,
    pub context: Arc<ContextPack>,
    pub knowledge: KnowledgeRef,

    /// 1-based attempt number.
    pub attempt: u32,
}

/// Produces a specialist's raw patch output.
///
/// Implementations wrap whatever computes the patch (typically a model call).
/// The output is untrusted JSON; the coordinator schema-checks it.
pub trait SpecialistBackend: Send + Sync {
    /// Proposes a patch for the request.
    ///
    /// # Errors
    ///
    /// Returns an [`ExternalCallError`]; retryable errors are retried with
    /// backoff by the coordinator.
    fn propose(&self, request: &SpecialistRequest) -> Result<JsonValue, ExternalCallError>;
}

impl<F> SpecialistBackend for F
where
    F: Fn(&SpecialistRequest) -> Result<JsonValue, ExternalCallError> + Send + Sync,
{
    fn propose(&self, request: &SpecialistRequest) -> Result<JsonValue, ExternalCallError> {
        self(request)
    }
}

/// Backend that always returns the same output.
#[derive(Debug, Clone)]
pub struct StaticBackend(JsonValue);

impl StaticBackend {
    /// Creates a backend returning `output`.
    #[must_use]
    pub fn new(output: JsonValue) -> Self {
        Self(output)
    }
}

impl SpecialistBackend for StaticBackend {
    fn propose(&self, _request: &SpecialistRequest) -> Result<JsonValue, ExternalCallError> {
        Ok(self.0.clone())
    }
}

/// Registered specialist backends, keyed by role.
#[derive(Clone, Default)]
pub struct SpecialistSet {
    backends: BTreeMap<SpecialistRole, Arc<dyn SpecialistBackend>>,
}

impl SpecialistSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend, replacing any previous one for the role.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for [`SpecialistRole::Qa`]; the gate is
    /// supplied separately as a [`crate::qa::QaGate`].
    pub fn register(
        &mut self,
        role: SpecialistRole,
        backend: impl SpecialistBackend + 'static,
    ) -> Result<(), ValidationError> {
        if role == SpecialistRole::Qa {
            return Err(ValidationError::InvalidConfig {
                reason: "the qa gate cannot be registered as a specialist backend".to_string(),
            });
        }
        self.backends.insert(role, Arc::new(backend));
        Ok(())
    }

    /// Builder form of [`SpecialistSet::register`].
    ///
    /// # Errors
    ///
    /// See [`SpecialistSet::register`].
    pub fn with(
        mut self,
        role: SpecialistRole,
        backend: impl SpecialistBackend + 'static,
    ) -> Result<Self, ValidationError> {
        self.register(role, backend)?;
        Ok(self)
    }

    /// Backend for a role.
    #[must_use]
    pub fn get(&self, role: SpecialistRole) -> Option<&Arc<dyn SpecialistBackend>> {
        self.backends.get(&role)
    }

    /// Registered roles in merge order.
    pub fn roles(&self) -> impl Iterator<Item = SpecialistRole> + '_ {
        self.backends.keys().copied()
    }

    /// Number of registered backends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns true if no backend is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl fmt::Debug for SpecialistSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecialistSet")
            .field("roles", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    #[test]
    fn ownership_is_disjoint_and_complete() {
        let mut seen = HashSet::new();
        for role in SpecialistRole::CONTRIBUTORS {
            for key in role.owned_sections() {
                assert!(seen.insert(*key), "{key} owned twice");
            }
        }
        assert_eq!(seen.len(), SectionKey::ALL.len());
        assert!(SpecialistRole::Qa.owned_sections().is_empty());
    }

    #[test]
    fn owner_lookup() {
        assert_eq!(
            SpecialistRole::owner_of(SectionKey::ExecutionStrategy),
            Some(SpecialistRole::Scheduling)
        );
        assert!(SpecialistRole::Quality.owns(SectionKey::QualityPlan));
        assert!(!SpecialistRole::Quality.owns(SectionKey::Purchasing));
    }

    #[test]
    fn default_hints() {
        assert_eq!(SpecialistRole::Quality.default_owner_hint(), OwnerHint::Qa);
        assert_eq!(SpecialistRole::Purchasing.default_owner_hint(), OwnerHint::Buy);
        assert_eq!(SpecialistRole::Scheduling.default_owner_hint(), OwnerHint::Sched);
        assert_eq!(SpecialistRole::Engineering.default_owner_hint(), OwnerHint::Eng);
    }

    #[test]
    fn qa_cannot_be_registered() {
        let err = SpecialistSet::new()
            .with(SpecialistRole::Qa, StaticBackend::new(json!({})))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidConfig { .. }));
    }

    #[test]
    fn roles_iterate_in_merge_order() {
        let set = SpecialistSet::new()
            .with(SpecialistRole::Engineering, StaticBackend::new(json!({})))
            .unwrap()
            .with(SpecialistRole::Quality, |_: &SpecialistRequest| -> Result<JsonValue, ExternalCallError> {
                Ok(json!({}))
            })
            .unwrap();
        let roles: Vec<_> = set.roles().collect();
        assert_eq!(roles, vec![SpecialistRole::Quality, SpecialistRole::Engineering]);
    }

    #[test]
    fn role_parsing() {
        assert_eq!(" Purchasing ".parse::<SpecialistRole>().unwrap(), SpecialistRole::Purchasing);
        assert!("legal".parse::<SpecialistRole>().is_err());
    }
}
