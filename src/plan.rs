//! The build plan document.
//!
//! A plan is a map of named sections to JSON values. Each writable section is
//! owned by exactly one specialist; every specialist may read every section.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::ValidationError;

/// Plan sections that a specialist may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKey {
    QualityPlan,
    Purchasing,
    ReleasePlan,
    ExecutionStrategy,
    EngineeringInstructions,
}

impl SectionKey {
    /// Every ownable section.
    pub const ALL: [Self; 5] = [
        Self::QualityPlan,
        Self::Purchasing,
        Self::ReleasePlan,
        Self::ExecutionStrategy,
        Self::EngineeringInstructions,
    ];

    /// Key used in the plan document.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::QualityPlan => "quality_plan",
            Self::Purchasing => "purchasing",
            Self::ReleasePlan => "release_plan",
            Self::ExecutionStrategy => "execution_strategy",
            Self::EngineeringInstructions => "engineering_instructions",
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownValue {
                field: "plan section".to_string(),
                value: s.to_string(),
            })
    }
}

/// A nested document of named sections.
///
/// Sections outside [`SectionKey`] (a drafting-stage `summary`, for example)
/// are carried along untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan(BTreeMap<String, JsonValue>);

impl Plan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Plan::set`].
    #[must_use]
    pub fn with_section(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.set(name, value);
        self
    }

    /// Reads a section by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.0.get(name)
    }

    /// Reads an owned section.
    #[must_use]
    pub fn section(&self, key: SectionKey) -> Option<&JsonValue> {
        self.get(key.as_str())
    }

    /// Replaces a section.
    pub fn set(&mut self, name: impl Into<String>, value: JsonValue) {
        self.0.insert(name.into(), value);
    }

    /// Applies a JSON merge patch to an owned section.
    ///
    /// A `null` patch removes the section.
    pub fn merge_section(&mut self, key: SectionKey, patch: &JsonValue) {
        let name = key.as_str();
        if patch.is_null() {
            self.0.remove(name);
            return;
        }
        let target = self.0.entry(name.to_string()).or_insert(JsonValue::Null);
        merge_patch(target, patch);
    }

    /// Returns true if an owned section is absent or holds an empty value.
    #[must_use]
    pub fn is_section_empty(&self, key: SectionKey) -> bool {
        self.section(key).map_or(true, is_empty_value)
    }

    /// Section names in key order.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the plan has no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The plan as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

fn is_empty_value(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
        JsonValue::Bool(_) | JsonValue::Number(_) => false,
    }
}

/// RFC 7386 JSON merge patch.
///
/// Objects merge recursively, `null` members remove keys, anything else
/// replaces the target.
pub fn merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    let JsonValue::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = JsonValue::Object(Map::new());
    }
    if let JsonValue::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(JsonValue::Null),
                    value,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_patch_follows_rfc_7386() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!(["a"]);
        merge_patch(&mut target, &json!({"b": {"c": null}}));
        assert_eq!(target, json!({"b": {}}));

        let mut target = json!({"a": 1});
        merge_patch(&mut target, &json!(["x"]));
        assert_eq!(target, json!(["x"]));
    }

    #[test]
    fn merge_section_creates_and_removes() {
        let mut plan = Plan::new().with_section("summary", json!("draft"));
        plan.merge_section(SectionKey::Purchasing, &json!({"vendors": ["Acme Steel"]}));
        plan.merge_section(SectionKey::Purchasing, &json!({"lead_time_weeks": 6}));
        assert_eq!(
            plan.section(SectionKey::Purchasing),
            Some(&json!({"vendors": ["Acme Steel"], "lead_time_weeks": 6}))
        );

        plan.merge_section(SectionKey::Purchasing, &JsonValue::Null);
        assert!(plan.section(SectionKey::Purchasing).is_none());
        assert_eq!(plan.get("summary"), Some(&json!("draft")));
    }

    #[test]
    fn empty_sections() {
        let plan = Plan::new()
            .with_section("quality_plan", json!({}))
            .with_section("purchasing", json!("  "))
            .with_section("release_plan", json!({"gates": 3}));
        assert!(plan.is_section_empty(SectionKey::QualityPlan));
        assert!(plan.is_section_empty(SectionKey::Purchasing));
        assert!(!plan.is_section_empty(SectionKey::ReleasePlan));
        assert!(plan.is_section_empty(SectionKey::EngineeringInstructions));
    }

    #[test]
    fn section_key_parsing() {
        assert_eq!("release_plan".parse::<SectionKey>().unwrap(), SectionKey::ReleasePlan);
        assert!("summary".parse::<SectionKey>().is_err());
    }

    #[test]
    fn plan_serializes_as_plain_object() {
        let plan = Plan::new().with_section("summary", json!("x"));
        assert_eq!(serde_json::to_value(&plan).unwrap(), json!({"summary": "x"}));
        assert_eq!(plan.to_json(), json!({"summary": "x"}));
    }
}
