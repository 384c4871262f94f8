//! A small case-preserving, case-insensitive-lookup header map.
//!
//! `http::HeaderMap` lowercases header *names* on the way in, which would
//! lose the original casing of the HTTP adapter's inbound headers. This
//! keeps the original casing the caller sent while
//! still making `get`/`contains` case-insensitive, matching real HTTP
//! header semantics.

/// An ordered, case-preserving header/cookie map with case-insensitive
/// lookup.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, preserving the case of `name` as given. A
    /// duplicate name (case-insensitively) appends rather than replaces,
    /// matching HTTP's multi-value header semantics.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every existing value for `name` with a single new one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// First value for `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, case-insensitively, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether any entry matches `name`, case-insensitively.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every entry matching `name`, case-insensitively.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Iterate every `(name, value)` pair in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, retaining the backing allocation — used by
    /// [`crate::context::Context::reset`] so pooled contexts don't leak
    /// data across invocations without reallocating on every reuse.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_but_storage_preserves_case() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.iter().next().unwrap().0, "Content-Type");
    }

    #[test]
    fn set_replaces_all_prior_values() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Trace", "a");
        headers.insert("X-Trace", "b");
        assert_eq!(headers.get_all("x-trace"), vec!["a", "b"]);
        headers.set("X-Trace", "c");
        assert_eq!(headers.get_all("x-trace"), vec!["c"]);
    }

    #[test]
    fn clear_retains_capacity() {
        let mut headers = HeaderMap::new();
        headers.insert("A", "1");
        headers.insert("B", "2");
        let cap_before = headers.entries.capacity();
        headers.clear();
        assert!(headers.is_empty());
        assert_eq!(headers.entries.capacity(), cap_before);
    }
}
