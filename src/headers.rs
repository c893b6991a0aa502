//! An ordered header multimap with case-insensitive lookup.
//!
//! Header names keep the casing they were inserted with, and are written to the wire
//! exactly as given. Every lookup compares names ASCII case-insensitively. Two entries
//! whose names differ only in case coexist; they are both returned by [`Headers::get_all`]
//! and both written by the serializer.

use std::fmt;

/// Ordered list of `(name, value)` header pairs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

/// Headers whose values are replaced with `****` in `Debug` output.
const SENSITIVE: [&str; 2] = ["authorization", "proxy-authorization"];

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| {
                let sensitive = SENSITIVE.iter().any(|name| k.eq_ignore_ascii_case(name));
                (k, if sensitive { "****" } else { v.as_str() })
            }))
            .finish()
    }
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of header lines (not distinct names).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no header lines.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a header line, keeping any existing lines with the same name.
    pub fn append<K, V>(&mut self, name: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every line named `name` with a single line.
    pub fn insert<K, V>(&mut self, name: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Insert the header only if no line with this name exists.
    ///
    /// Returns `true` if the header was inserted.
    pub fn insert_if_absent<K, V>(&mut self, name: K, value: V) -> bool
    where
        K: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.entries.push((name, value.into()));
        true
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + 'n
    where
        'a: 'n,
    {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True if any line is named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Remove every line named `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// True if any value of `name`, read as a comma separated list, contains `token`.
    ///
    /// Tokens are compared case-insensitively, so `Connection: Keep-Alive, Close`
    /// contains the token `close`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    /// Merge `other` into these headers.
    ///
    /// This is a shallow keyed merge: for every name present in `other`, all existing
    /// lines with that name are dropped and replaced by the lines from `other`.
    pub fn merge(&mut self, other: &Headers) {
        for (name, _) in &other.entries {
            self.remove(name);
        }
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        headers.extend(iter);
        headers
    }
}

impl<K, V> Extend<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.append(k, v);
        }
    }
}
