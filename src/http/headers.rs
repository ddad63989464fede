//! HTTP header handling
//!
//! Header names are canonicalized on insertion and lookup, so callers
//! can use any casing. Duplicate names are not preserved; the last
//! occurrence wins.

use std::collections::BTreeMap;
use std::fmt;

/// HTTP header collection with case-canonicalized names
#[derive(Debug, Clone, Default)]
pub struct Headers {
    map: BTreeMap<String, String>,
}

impl Headers {
    /// Create a new empty header collection
    pub fn new() -> Self {
        Headers {
            map: BTreeMap::new(),
        }
    }

    /// Insert a header, replacing any previous value for the same
    /// (canonicalized) name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.map.insert(canonical_key(name.as_ref()), value.into());
    }

    /// Get the value for a header (any casing)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&canonical_key(name)).map(String::as_str)
    }

    /// Check if a header is present
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&canonical_key(name))
    }

    /// Remove a header, returning its value if it was present
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.map.remove(&canonical_key(name))
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over all headers in canonical-name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.map {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Canonical MIME header form of `name`: the first letter of each
/// `-`-separated word is upper-cased, the rest lower-cased
/// (`content-type` → `Content-Type`). A name containing characters that
/// are not valid in a header field name is returned unchanged.
pub fn canonical_key(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len());
    let mut word_start = true;
    for byte in name.bytes() {
        let ch = if word_start {
            byte.to_ascii_uppercase()
        } else {
            byte.to_ascii_lowercase()
        };
        word_start = byte == b'-';
        out.push(ch as char);
    }
    out
}

/// Whether `b` may appear in an HTTP header field name
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
