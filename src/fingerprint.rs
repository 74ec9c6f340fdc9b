//! Task fingerprints.
//!
//! A fingerprint is the semantic identity of a follow-up task: two specialists
//! that independently propose "Order 316L plate" for the buyer, due the same
//! day, produce the same fingerprint regardless of case, spacing or time of
//! day. Fingerprints are content hashes, stable across processes and
//! releases of the same `FINGERPRINT_VERSION`.

use std::fmt;

use blake3::Hasher;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::patch::OwnerHint;
use crate::text::normalize_key;

/// Preimage layout version.
pub const FINGERPRINT_VERSION: &str = "task-fp-v1";

/// Number of hex characters kept from the digest.
const FINGERPRINT_HEX_LEN: usize = 32;

const UNIT_SEPARATOR: u8 = 0x1f;

/// Deterministic identity hash of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a fingerprint string received from an external tracker.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    /// Returns the fingerprint as lowercase hex.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprints a task from its name, owner hint and due hint. Notes are not
/// part of a task's identity.
///
/// # Examples
///
/// ```
/// use buildplan::{fingerprint, OwnerHint};
///
/// let a = fingerprint("Order 316L plate", OwnerHint::Buy, Some("2024-06-01"));
/// let b = fingerprint("  order 316l   PLATE", OwnerHint::Buy, Some("2024-06-01T15:30:00Z"));
/// assert_eq!(a, b);
/// assert_ne!(a, fingerprint("Order 316L plate", OwnerHint::Eng, Some("2024-06-01")));
/// ```
#[must_use]
pub fn fingerprint(name: &str, owner_hint: OwnerHint, due: Option<&str>) -> Fingerprint {
    let name = normalize_key(name);
    let due = due.map(round_due).unwrap_or_default();
    let fields: [&str; 4] = [FINGERPRINT_VERSION, &name, owner_hint.as_str(), &due];

    let mut h = Hasher::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            h.update(&[UNIT_SEPARATOR]);
        }
        h.update(field.as_bytes());
    }
    let hex = h.finalize().to_hex();
    Fingerprint(hex.as_str()[..FINGERPRINT_HEX_LEN].to_string())
}

/// Rounds a due hint to its calendar day (`YYYY-MM-DD`, UTC for timestamps
/// with an offset). Unparseable hints are normalized like task names.
#[must_use]
pub fn round_due(due: &str) -> String {
    let due = due.trim();
    if due.is_empty() {
        return String::new();
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(due) {
        return ts.with_timezone(&Utc).date_naive().format("%Y-%m-%d").to_string();
    }
    for layout in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(due, layout) {
            return ts.date().format("%Y-%m-%d").to_string();
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(due, "%Y-%m-%d") {
        return day.format("%Y-%m-%d").to_string();
    }
    normalize_key(due)
}
