//! Glob-style matching of dotted paths.
//!
//! Patterns are dot-separated like the paths they match:
//!
//! - `**` matches every path.
//! - A pattern without `*` is a prefix: `model` matches `model` and
//!   `model.layers.0`, but not `models`.
//! - A pattern with a `*` matches positionally and only paths of the same
//!   length. A segment that is exactly `*` accepts any one non-empty
//!   segment; `*` inside a longer segment is a literal character.

use alloc::string::String;
use alloc::vec::Vec;

use crate::path::Path;

/// True if `path` matches `pattern`.
pub fn matches(path: &str, pattern: &str) -> bool {
    if pattern == "**" {
        return true;
    }
    if !pattern.contains('*') {
        return path == pattern
            || path
                .strip_prefix(pattern)
                .is_some_and(|rest| rest.starts_with('.'));
    }
    let path_parts: Vec<&str> = path.split('.').collect();
    let pattern_parts: Vec<&str> = pattern.split('.').collect();
    path_parts.len() == pattern_parts.len()
        && pattern_parts
            .iter()
            .zip(&path_parts)
            .all(|(part, segment)| segment_matches(segment, part))
}

fn segment_matches(segment: &str, part: &str) -> bool {
    if part == "*" {
        !segment.is_empty()
    } else {
        segment == part
    }
}

/// True if recursing into `path` could still reach something `pattern`
/// matches: the path matches, lies on the way to a match, or lies below one.
pub fn could_lead_to(path: &str, pattern: &str) -> bool {
    if matches(path, pattern) {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix(".*")
        && (path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.')))
    {
        return true;
    }

    if pattern.contains('*') {
        let path_parts: Vec<&str> = path.split('.').collect();
        let pattern_parts: Vec<&str> = pattern.split('.').collect();
        if path_parts.len() <= pattern_parts.len() {
            return pattern_parts
                .iter()
                .zip(&path_parts)
                .all(|(part, segment)| *part == "*" || part == segment);
        }
        // below a match: some ancestor of the path matches
        return (pattern_parts.len()..=path_parts.len())
            .any(|len| matches(&path_parts[..len].join("."), pattern));
    }

    pattern
        .strip_prefix(path)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Decide whether a traversal should enter `path`.
///
/// The root is always entered. A path matching any `exclude` pattern is
/// not, even if an include pattern wants it. With `include` set, some
/// include pattern must be reachable from the path.
pub fn should_recurse(path: &Path, include: Option<&[String]>, exclude: &[String]) -> bool {
    if path.is_empty() {
        return true;
    }
    let dotted = path.dotted();
    if exclude.iter().any(|pattern| matches(&dotted, pattern)) {
        return false;
    }
    match include {
        None => true,
        Some(include) => include.iter().any(|pattern| could_lead_to(&dotted, pattern)),
    }
}

/// Reusable include/exclude filter, usable as a traversal predicate.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Option<Vec<String>>,
    exclude: Vec<String>,
}

impl PathFilter {
    /// A filter that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only enter paths that can lead to `pattern` (or to another include).
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include
            .get_or_insert_with(Vec::new)
            .push(pattern.into());
        self
    }

    /// Never enter paths matching `pattern`.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// See [`should_recurse`].
    pub fn accepts(&self, path: &Path) -> bool {
        should_recurse(path, self.include.as_deref(), &self.exclude)
    }
}
