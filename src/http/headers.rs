//! Header storage shared by requests and responses.

use std::fmt;

/// An order-preserving header list with case-insensitive lookup.
///
/// Duplicate names are kept; [`get`](Self::get) returns the first value.
///
/// # Examples
///
/// ```
/// use relaychat::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/event-stream");
/// headers.insert("X-Forwarded-For", "10.0.0.1, 10.0.0.2");
///
/// assert_eq!(headers.get("content-type"), Some("text/event-stream"));
/// assert_eq!(headers.first_token("x-forwarded-for"), Some("10.0.0.1"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns the first value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first non-empty comma-separated token of the header, trimmed.
    ///
    /// Used for list-valued headers such as `X-Forwarded-For`, whose first
    /// entry is the originating client.
    pub fn first_token(&self, name: &str) -> Option<&str> {
        self.get(name)?
            .split(',')
            .next()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the number of entries (not unique names).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.insert("Cache-Control", "no-cache");
        assert_eq!(h.get("cache-control"), Some("no-cache"));
        assert_eq!(h.get("CACHE-CONTROL"), Some("no-cache"));
        assert!(h.contains("Cache-control"));
    }

    #[test]
    fn first_value_wins() {
        let mut h = Headers::new();
        h.insert("Content-Type", "application/json");
        h.insert("content-type", "text/plain");
        assert_eq!(h.get("Content-Type"), Some("application/json"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut h = Headers::new();
        h.insert("X-Forwarded-For", " 203.0.113.9 , 10.1.1.1");
        assert_eq!(h.first_token("x-forwarded-for"), Some("203.0.113.9"));
    }

    #[test]
    fn forwarded_for_blank_is_none() {
        let mut h = Headers::new();
        h.insert("X-Forwarded-For", " , 10.1.1.1");
        assert_eq!(h.first_token("x-forwarded-for"), None);
        assert_eq!(h.first_token("x-missing"), None);
    }

    #[test]
    fn display_is_wire_format() {
        let mut h = Headers::new();
        h.insert("A", "1");
        h.insert("B", "2");
        assert_eq!(h.to_string(), "A: 1\r\nB: 2\r\n");
    }
}
