//! Route matching logic.
//!
//! # Responsibilities
//! - Match request path prefix (case-sensitive)
//!
//! # Design Decisions
//! - Raw string prefix, no segment boundary: `/user` also matches
//!   `/users-anything`
//! - No regex, so matching stays O(prefix length)

/// Matches the request path against a literal prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// True for "/", which matches every request path.
    pub fn is_catch_all(&self) -> bool {
        self.prefix == "/"
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
