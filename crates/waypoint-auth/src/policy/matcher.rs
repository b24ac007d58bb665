//! Request matchers for policy rules and security chains.
//!
//! Path patterns use glob syntax:
//!
//! - `*` matches within one path segment
//! - `**` matches any depth, including none (`/customers/**` matches `/customers`)
//! - `?` matches one character
//!
//! Patterns are compiled once to an anchored regex.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;

use crate::policy::PolicyError;

/// A compiled path glob.
#[derive(Clone)]
pub struct PathPattern {
    pattern: String,
    regex: Regex,
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.pattern).finish()
    }
}

impl PathPattern {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is not absolute.
    pub fn new(pattern: &str) -> Result<Self, PolicyError> {
        if !pattern.starts_with('/') {
            return Err(PolicyError::InvalidPattern {
                pattern: pattern.to_string(),
                message: "must start with '/'".to_string(),
            });
        }
        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| PolicyError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The source glob.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Returns `true` if `path` matches.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    // a trailing "/**" also matches the bare prefix
    let (body, any_suffix) = match pattern.strip_suffix("/**") {
        Some(prefix) => (prefix, true),
        None => (pattern, false),
    };

    let mut regex = String::from("^");
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                regex.push_str(".*");
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    if any_suffix {
        regex.push_str("(?:/.*)?");
    }
    regex.push('$');
    regex
}

/// HTTP methods a rule applies to. Empty means any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodMatcher {
    methods: BTreeSet<String>,
}

impl MethodMatcher {
    /// Matches the given methods, case-insensitively.
    #[must_use]
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            methods: methods
                .into_iter()
                .map(|m| m.as_ref().to_ascii_uppercase())
                .collect(),
        }
    }

    /// Matches every method.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Returns `true` if `method` matches.
    #[must_use]
    pub fn matches(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.contains(&method.to_ascii_uppercase())
    }
}
