//! HTTP header field collection
//!
//! This module provides a type for managing header fields with
//! case-insensitive lookups and support for multiple values per name.
//! HTTP/2 field names are lowercase on the wire, but lookups accept any case.

use std::fmt;

/// Per-field overhead counted by SETTINGS_MAX_HEADER_LIST_SIZE (RFC 9113 Section 6.5.2)
pub const HEADER_FIELD_OVERHEAD: usize = 32;

/// HTTP header fields
///
/// Fields are stored in insertion order and support:
/// - Case-insensitive name lookups
/// - Multiple values for the same name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty collection
    pub fn new() -> Self {
        Headers::default()
    }

    /// Append a field
    ///
    /// An existing field with the same name is kept; this adds another value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Get the first value for a name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a name (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Count how many times a name appears
    pub fn count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }

    /// Check if a name exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a name, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    /// Get the number of fields
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no fields
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over all fields
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Size as counted against SETTINGS_MAX_HEADER_LIST_SIZE
    pub fn list_size(&self) -> usize {
        header_list_size(self.iter())
    }
}

/// Sum of `name + value + 32` over a list of fields
pub fn header_list_size<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> usize {
    fields
        .into_iter()
        .map(|(name, value)| name.len() + value.len() + HEADER_FIELD_OVERHEAD)
        .sum()
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Headers {
            headers: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
