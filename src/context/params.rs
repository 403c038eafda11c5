//! Ordered request parameters with duplicate-key suffixing.

use std::collections::HashSet;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Pick a key that is not yet taken: `key`, then `key_1`, `key_2`, ...
pub(crate) fn unique_key(key: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(key) {
        return key.to_string();
    }
    (1..)
        .map(|n| format!("{key}_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| key.to_string())
}

/// Insertion-ordered string parameters.
///
/// Repeated keys never overwrite: `k=1&k=2` becomes `k=1, k_1=2`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: Vec<(String, String)>,
    keys: HashSet<String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `application/x-www-form-urlencoded` text (query strings too).
    pub fn parse(encoded: &str) -> Self {
        let mut params = Self::new();
        params.extend_encoded(encoded);
        params
    }

    pub fn extend_encoded(&mut self, encoded: &str) {
        for (k, v) in url::form_urlencoded::parse(encoded.as_bytes()) {
            self.insert(k.into_owned(), v.into_owned());
        }
    }

    /// Insert a value, suffixing the key if it is already present.
    /// Returns the key actually used.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> String {
        let key = key.into();
        let key = unique_key(&key, |k| self.keys.contains(k));
        self.keys.insert(key.clone());
        self.entries.push((key.clone(), value.into()));
        key
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

impl Serialize for Parameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}
