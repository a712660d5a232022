//! Case-insensitive string maps used for headers, query parameters and cookies.

use std::str::FromStr;

/// An insertion-ordered map with ASCII case-insensitive keys.
///
/// Inserting a key that already exists (ignoring case) replaces the previous value in
/// place, so the last write wins while the original position is kept. Lookups never
/// fail: [`get_or`](FieldMap::get_or) and [`parse_or`](FieldMap::parse_or) fall back to a
/// caller supplied default.
///
/// The maps stay small (a request rarely carries more than a few dozen headers), so a
/// linear scan over a `Vec` is used instead of hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity) }
    }

    /// Inserts a field, returning the replaced value if the key was already present.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.0 = key;
                Some(std::mem::replace(&mut entry.1, value))
            }
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|index| self.entries[index].1.as_str())
    }

    /// Returns the value of `key`, or `fallback` when it is absent.
    pub fn get_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.get(key).unwrap_or(fallback)
    }

    /// Parses the value of `key`, or returns `fallback` when it is absent or does not parse.
    pub fn parse_or<T: FromStr>(&self, key: &str, fallback: T) -> T {
        self.get(key).and_then(|value| value.parse().ok()).unwrap_or(fallback)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|index| self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(existing, _)| existing.eq_ignore_ascii_case(key))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut map = FieldMap::new();
        map.insert("Content-Type", "text/html");

        assert_eq!(map.get("content-type"), Some("text/html"));
        assert_eq!(map.get("CONTENT-TYPE"), Some("text/html"));
        assert!(map.contains_key("Content-type"));
        assert_eq!(map.get("accept"), None);
    }

    #[test]
    fn last_write_wins_in_place() {
        let mut map: FieldMap = [("a", "1"), ("b", "2"), ("A", "3")].into_iter().collect();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some("3"));
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![("A", "3"), ("b", "2")]);

        assert_eq!(map.insert("b", "4"), Some("2".to_string()));
        assert_eq!(map.remove("B"), Some("4".to_string()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn defaults() {
        let map: FieldMap = [("width", "1920"), ("scale", "x")].into_iter().collect();

        assert_eq!(map.get_or("missing", ""), "");
        assert_eq!(map.get_or("width", "0"), "1920");
        assert_eq!(map.parse_or("width", 0u32), 1920);
        assert_eq!(map.parse_or("scale", 1.0f32), 1.0);
        assert_eq!(map.parse_or("height", 1080u32), 1080);
    }
}
