//! Precedence policy and source kind detection.
//!
//! The policy is a static table from [`SourceKind`] to authority and
//! precedence rank, plus an ordered keyword detector that classifies a source
//! from its file name, title or MIME type. Detection order matters: phrases
//! that contain a short keyword (`"proposal"` contains `"po"`) are checked
//! first, and keywords of three characters or fewer only match whole tokens.

use std::sync::OnceLock;

use regex::Regex;

use crate::source::{Authority, SourceKind};

/// Version of the precedence table. Embedded in every context pack.
pub const POLICY_VERSION: &str = "precedence-v1";

/// Authority and precedence rank assigned to a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: SourceKind,
    pub authority: Authority,
    pub precedence_rank: u32,
}

/// Static precedence table.
#[must_use]
pub const fn classification(kind: SourceKind) -> Classification {
    let (authority, precedence_rank) = match kind {
        SourceKind::Drawing | SourceKind::Po => (Authority::Mandatory, 1),
        SourceKind::Itp => (Authority::Mandatory, 2),
        SourceKind::Quote | SourceKind::SowSpec => (Authority::Conditional, 2),
        SourceKind::CustomerSpec => (Authority::Mandatory, 3),
        SourceKind::SupplierQm => (Authority::Conditional, 4),
        SourceKind::GenericSpec => (Authority::Reference, 5),
        SourceKind::MeetingNotes => (Authority::Mandatory, 6),
        SourceKind::Email => (Authority::Internal, 20),
        SourceKind::LessonsLearned => (Authority::Internal, 99),
        SourceKind::Other => (Authority::Reference, 10),
    };
    Classification {
        kind,
        authority,
        precedence_rank,
    }
}

#[derive(Debug, Clone, Copy)]
enum Match {
    /// Substring of the normalized text.
    Phrase,
    /// Whole token, optionally followed by digits (`po1001`).
    Token,
}

/// Ordered detection rules. First match wins.
const DETECTION_RULES: &[(&str, Match, SourceKind)] = &[
    ("lessons learned", Match::Phrase, SourceKind::LessonsLearned),
    ("lesson learned", Match::Phrase, SourceKind::LessonsLearned),
    ("meeting notes", Match::Phrase, SourceKind::MeetingNotes),
    ("meeting minutes", Match::Phrase, SourceKind::MeetingNotes),
    ("minutes of meeting", Match::Phrase, SourceKind::MeetingNotes),
    ("purchase order", Match::Phrase, SourceKind::Po),
    ("proposal", Match::Phrase, SourceKind::Quote),
    ("quotation", Match::Phrase, SourceKind::Quote),
    ("quote", Match::Phrase, SourceKind::Quote),
    ("inspection and test plan", Match::Phrase, SourceKind::Itp),
    ("inspection test plan", Match::Phrase, SourceKind::Itp),
    ("statement of work", Match::Phrase, SourceKind::SowSpec),
    ("customer specification", Match::Phrase, SourceKind::CustomerSpec),
    ("customer spec", Match::Phrase, SourceKind::CustomerSpec),
    ("supplier quality", Match::Phrase, SourceKind::SupplierQm),
    ("quality manual", Match::Phrase, SourceKind::SupplierQm),
    ("drawing", Match::Phrase, SourceKind::Drawing),
    ("specification", Match::Phrase, SourceKind::GenericSpec),
    ("email", Match::Phrase, SourceKind::Email),
    ("e mail", Match::Phrase, SourceKind::Email),
    ("meeting", Match::Phrase, SourceKind::MeetingNotes),
    ("po", Match::Token, SourceKind::Po),
    ("dwg", Match::Token, SourceKind::Drawing),
    ("itp", Match::Token, SourceKind::Itp),
    ("sow", Match::Token, SourceKind::SowSpec),
    ("qm", Match::Token, SourceKind::SupplierQm),
    ("spec", Match::Token, SourceKind::GenericSpec),
    ("specs", Match::Token, SourceKind::GenericSpec),
    ("eml", Match::Token, SourceKind::Email),
    ("msg", Match::Token, SourceKind::Email),
];

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s_\-]+").expect("separator regex is valid"))
}

/// Lowercases and replaces underscores, dashes and whitespace runs with one space.
#[must_use]
pub fn normalize(text: &str) -> String {
    separator_re()
        .replace_all(&text.to_lowercase(), " ")
        .trim()
        .to_string()
}

fn token_matches(token: &str, keyword: &str) -> bool {
    token
        .strip_prefix(keyword)
        .is_some_and(|rest| rest.bytes().all(|b| b.is_ascii_digit()))
}

fn rule_matches(normalized: &str, keyword: &str, mode: Match) -> bool {
    match mode {
        Match::Phrase => normalized.contains(keyword),
        Match::Token => normalized
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|t| token_matches(t, keyword)),
    }
}

/// Detects a kind from free text (file name or title). `None` if nothing matched.
#[must_use]
pub fn detect_kind(text: &str) -> Option<SourceKind> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    DETECTION_RULES
        .iter()
        .find(|(keyword, mode, _)| rule_matches(&normalized, keyword, *mode))
        .map(|(_, _, kind)| *kind)
}

/// Detects a kind from a MIME type.
#[must_use]
pub fn detect_mime(mime_type: &str) -> Option<SourceKind> {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "message/rfc822" | "application/vnd.ms-outlook" => Some(SourceKind::Email),
        _ => None,
    }
}

/// Inputs available to kind detection, checked in field order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionHints<'a> {
    pub file_name: Option<&'a str>,
    pub title: Option<&'a str>,
    pub mime_type: Option<&'a str>,
    /// Project customer name; a generic spec naming the customer is a customer spec.
    pub customer: Option<&'a str>,
}

/// Classifies a source from its hints, falling back to `other/reference/10`.
#[must_use]
pub fn classify(hints: &DetectionHints<'_>) -> Classification {
    let detected = hints
        .file_name
        .and_then(detect_kind)
        .or_else(|| hints.title.and_then(detect_kind))
        .or_else(|| hints.mime_type.and_then(detect_mime));

    let kind = match (detected, hints.customer) {
        (Some(SourceKind::GenericSpec), Some(customer)) if mentions_customer(hints, customer) => {
            SourceKind::CustomerSpec
        }
        (Some(kind), _) => kind,
        (None, _) => SourceKind::Other,
    };
    classification(kind)
}

fn mentions_customer(hints: &DetectionHints<'_>, customer: &str) -> bool {
    let customer = normalize(customer);
    if customer.is_empty() {
        return false;
    }
    [hints.file_name, hints.title]
        .into_iter()
        .flatten()
        .any(|t| normalize(t).contains(&customer))
}
