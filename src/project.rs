//! Project metadata used for scope predicates and source classification.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Project context: a name plus free-form attributes (`customer`, `site`,
/// `material_grade`, ...). Attribute keys are stored trimmed and lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub name: String,

    #[serde(default, deserialize_with = "attribute_map")]
    attributes: BTreeMap<String, String>,
}

impl ProjectContext {
    /// Creates a project with no attributes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.attributes.insert(attribute_key(key.as_ref()), value.into());
        self
    }

    /// Looks up an attribute by (case-insensitive) key.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(&attribute_key(key)).map(String::as_str)
    }

    /// The `customer` attribute, if set.
    #[must_use]
    pub fn customer(&self) -> Option<&str> {
        self.attribute("customer")
    }

    /// All attributes in key order.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

fn attribute_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn attribute_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (attribute_key(&k), v)).collect())
}
