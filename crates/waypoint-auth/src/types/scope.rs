//! Space-delimited scope strings.

use std::collections::BTreeSet;

/// Splits a space-delimited scope parameter into a sorted, de-duplicated set.
#[must_use]
pub fn parse_scope(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(ToString::to_string).collect()
}

/// Joins a scope set into the space-delimited wire form.
#[must_use]
pub fn join_scope<'a>(scopes: impl IntoIterator<Item = &'a String>) -> String {
    scopes
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}
