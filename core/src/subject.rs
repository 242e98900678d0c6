//! Hierarchical subject paths identifying the domain entity an event belongs to.
//!
//! A [`Subject`] is a `/`-rooted path such as `/books/978-0-13-468599-1` or
//! `/books/978-0-13-468599-1/pages/42`. Subjects form a tree: every subject is
//! either the root (`/`) or has exactly one parent, reached by dropping its
//! last path segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a string is not a valid [`Subject`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid subject: {0}")]
pub struct ParseSubjectError(String);

/// A hierarchical, `/`-rooted path identifying the domain entity an event
/// belongs to.
///
/// # Validation
///
/// - Must start with `/`.
/// - Must not end with `/` unless it is the root subject `/` itself.
/// - Must not contain empty segments (`//`).
///
/// # Examples
///
/// ```
/// use cqrs_es_core::subject::Subject;
///
/// let book = Subject::new("/books/978-0-13-468599-1").unwrap();
/// let page = Subject::new("/books/978-0-13-468599-1/pages/42").unwrap();
///
/// assert!(page.is_descendant_of(&book));
/// assert!(!book.is_descendant_of(&page));
/// assert_eq!(page.parent(), Some(Subject::new("/books/978-0-13-468599-1/pages").unwrap()));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    /// The root subject, `/`.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and validate a subject path.
    ///
    /// # Errors
    ///
    /// Returns [`ParseSubjectError`] if `path` does not start with `/`, ends
    /// with a trailing `/` (other than the root), or contains an empty
    /// segment.
    pub fn new(path: impl Into<String>) -> Result<Self, ParseSubjectError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(ParseSubjectError(format!(
                "subject must start with '/': {path}"
            )));
        }
        if path.len() > 1 && path.ends_with('/') {
            return Err(ParseSubjectError(format!(
                "subject must not end with '/': {path}"
            )));
        }
        if path
            .split('/')
            .skip(1)
            .any(str::is_empty)
            .then_some(path.len() > 1)
            .unwrap_or(false)
        {
            return Err(ParseSubjectError(format!(
                "subject must not contain empty segments: {path}"
            )));
        }
        Ok(Self(path))
    }

    /// The subject as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root subject `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The path segments, root excluded. `/books/X` yields `["books", "X"]`.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        if self.is_root() {
            Vec::new()
        } else {
            self.0.split('/').skip(1).collect()
        }
    }

    /// The parent subject, or `None` if this is the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let segments = self.segments();
        let parent_segments = &segments[..segments.len() - 1];
        if parent_segments.is_empty() {
            Some(Self::root())
        } else {
            Some(Self(format!("/{}", parent_segments.join("/"))))
        }
    }

    /// Whether `self` is `other` or a descendant of it (i.e. `other` is a
    /// prefix of `self` at a segment boundary).
    ///
    /// This is the predicate behind the `Recursive` read/observe option: a
    /// stream opened on `subject` with `Recursive` includes every event whose
    /// subject satisfies `event.subject.is_descendant_of(&subject)`.
    #[must_use]
    pub fn is_descendant_of(&self, other: &Self) -> bool {
        if other.is_root() {
            return true;
        }
        if self.0 == other.0 {
            return true;
        }
        self.0.starts_with(other.0.as_str()) && self.0.as_bytes()[other.0.len()] == b'/'
    }

    /// Truncate this subject to its first `n` levels (root-relative segment
    /// count), used by the per-N-level-subject sequence resolver.
    ///
    /// Returns the whole subject unchanged if it has `n` or fewer segments.
    #[must_use]
    pub fn first_n_levels(&self, n: usize) -> Self {
        let segments = self.segments();
        if segments.len() <= n {
            return self.clone();
        }
        Self(format!("/{}", segments[..n].join("/")))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Subject {
    type Err = ParseSubjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Subject {
    type Error = ParseSubjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_valid() {
        assert!(Subject::new("/").is_ok());
        assert!(Subject::root().is_root());
    }

    #[test]
    fn rejects_missing_leading_slash() {
        assert!(Subject::new("books/X").is_err());
    }

    #[test]
    fn rejects_trailing_slash() {
        assert!(Subject::new("/books/X/").is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(Subject::new("/books//X").is_err());
    }

    #[test]
    fn descendant_matches_prefix_at_segment_boundary() {
        let book = Subject::new("/books/X").unwrap();
        let page = Subject::new("/books/X/pages/42").unwrap();
        let other_book = Subject::new("/books/XY").unwrap();

        assert!(page.is_descendant_of(&book));
        assert!(book.is_descendant_of(&book)); // self counts
        assert!(!other_book.is_descendant_of(&book)); // "XY" must not match prefix "X"
        assert!(!book.is_descendant_of(&page));
    }

    #[test]
    fn every_subject_is_descendant_of_root() {
        let page = Subject::new("/books/X/pages/42").unwrap();
        assert!(page.is_descendant_of(&Subject::root()));
    }

    #[test]
    fn parent_of_nested_subject() {
        let page = Subject::new("/books/X/pages/42").unwrap();
        assert_eq!(page.parent(), Some(Subject::new("/books/X/pages").unwrap()));
        assert_eq!(
            Subject::new("/books").unwrap().parent(),
            Some(Subject::root())
        );
        assert_eq!(Subject::root().parent(), None);
    }

    #[test]
    fn first_n_levels_truncates() {
        let page = Subject::new("/books/X/pages/42").unwrap();
        assert_eq!(page.first_n_levels(1), Subject::new("/books").unwrap());
        assert_eq!(page.first_n_levels(2), Subject::new("/books/X").unwrap());
        assert_eq!(page.first_n_levels(10), page);
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let subject = Subject::new("/books/X/pages/42").unwrap();
        let parsed: Subject = subject.to_string().parse().unwrap();
        assert_eq!(subject, parsed);
    }
}
