//! Insertion-ordered string multimap with configurable key matching.
//!
//! Header maps match names case-insensitively; query parameter maps
//! match case-sensitively. Both preserve insertion order and the
//! original spelling of keys, which matters when the map is folded
//! back into an outbound envelope.

/// An ordered multimap over string keys and values.
#[derive(Debug, Clone)]
pub struct MultiMap {
    case_sensitive: bool,
    entries: Vec<(String, String)>,
}

impl MultiMap {
    /// A map whose keys match ignoring ASCII case (header semantics).
    pub fn case_insensitive() -> Self {
        Self { case_sensitive: false, entries: Vec::new() }
    }

    /// A map whose keys match exactly (query parameter semantics).
    pub fn case_sensitive() -> Self {
        Self { case_sensitive: true, entries: Vec::new() }
    }

    fn matches(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }

    /// First value stored under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| self.matches(key, name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every entry matching `name` with the single given pair.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let case_sensitive = self.case_sensitive;
        self.entries.retain(|(key, _)| {
            if case_sensitive {
                key != &name
            } else {
                !key.eq_ignore_ascii_case(&name)
            }
        });
        self.entries.push((name, value.into()));
    }

    /// Append an entry without touching existing ones.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
