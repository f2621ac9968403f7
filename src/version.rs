//! Tolerant comparison of site and library version tokens.
//!
//! Tokens look like `0.6.0`, `v0.4.2` or `0.6.0-rc1`. Only the numeric core
//! takes part in ordering; the qualifier after `-` or `+` only distinguishes
//! otherwise equivalent versions. Tokens without a numeric core (`master`, an
//! empty string) are undefined and equivalent to everything.

use std::cmp::Ordering;

/// Relation of one version token to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Strictly older numeric version.
    Less,
    /// Strictly newer numeric version.
    More,
    /// Same numeric version, different token.
    Equivalent,
    /// Identical tokens.
    Equal,
}

/// Numeric core of a version token, `None` when undefined.
fn parse_core(version: &str) -> Option<(u64, u64, u64)> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let core = trimmed.split(['-', '+']).next().unwrap_or_default();
    if core.is_empty() {
        return None;
    }

    let mut parts = [0u64; 3];
    for (i, part) in core.split('.').enumerate() {
        if i >= parts.len() {
            return None;
        }
        parts[i] = part.parse().ok()?;
    }

    Some((parts[0], parts[1], parts[2]))
}

/// Compare `a` against `b`.
pub fn compare(a: &str, b: &str) -> Relation {
    if a == b {
        return Relation::Equal;
    }
    match (parse_core(a), parse_core(b)) {
        (Some(va), Some(vb)) => match va.cmp(&vb) {
            Ordering::Less => Relation::Less,
            Ordering::Greater => Relation::More,
            Ordering::Equal => Relation::Equivalent,
        },
        _ => Relation::Equivalent,
    }
}

/// True if `a` is strictly older than `b`.
pub fn less_recent_than(a: &str, b: &str) -> bool {
    compare(a, b) == Relation::Less
}

/// True if `a` is strictly newer than `b`.
pub fn more_recent_than(a: &str, b: &str) -> bool {
    compare(a, b) == Relation::More
}

/// True if a site recorded at `site` must be realigned to `library`.
///
/// Covers both a strictly newer library and an equivalent library with a
/// different qualifier (`0.6.0` over `0.6.0-rc1`).
pub fn needs_realignment(library: &str, site: &str) -> bool {
    matches!(compare(library, site), Relation::More | Relation::Equivalent)
}
