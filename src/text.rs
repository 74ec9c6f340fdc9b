//! Text normalization shared by topic grouping, claim comparison and task
//! fingerprints.

/// Lowercases, trims and collapses inner whitespace runs to a single space.
pub(crate) fn normalize_key(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Uppercased slug: ASCII alphanumerics kept, every other run becomes `-`.
pub(crate) fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_uppercase());
        } else {
            pending_dash = true;
        }
    }
    out
}
