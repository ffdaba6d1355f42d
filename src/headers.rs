//! An ordered, case-insensitive multimap of HTTP header fields.
//!
//! Unlike [`http::HeaderMap`], which normalizes names to lowercase, `Headers`
//! keeps the original casing a client or handler supplied while still
//! matching lookups case-insensitively — the data model calls this out
//! explicitly, since `set-cookie` (and any other repeatable header) must
//! preserve both wire order and multiplicity across the bridge round-trip.

use std::fmt;

/// One header field as stored: the name exactly as received or set, and its
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    value: String,
}

/// An ordered multimap of header fields with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Entry>,
}

impl Headers {
    /// An empty header set.
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Appends a header, preserving any existing value(s) under the same
    /// name. Use this for repeatable headers like `set-cookie`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Entry {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Removes every existing value for `name` (case-insensitively) and sets
    /// a single new value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.append(name, value);
    }

    /// The first value stored under `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    /// Every value stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    /// Whether any value is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Removes every value stored under `name`, returning how many were
    /// removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.name.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Iterates over every `(name, value)` pair in wire order, preserving
    /// multiplicity.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|e| (e.name.as_str(), e.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every hop-by-hop header (`connection`, `keep-alive`,
    /// `proxy-connection`, `transfer-encoding`, `upgrade`), case-insensitively.
    pub fn strip_hop_by_hop(&mut self) {
        const HOP_BY_HOP: &[&str] = &[
            "connection",
            "keep-alive",
            "proxy-connection",
            "transfer-encoding",
            "upgrade",
        ];
        self.entries
            .retain(|e| !HOP_BY_HOP.iter().any(|h| e.name.eq_ignore_ascii_case(h)));
    }

    /// Builds a `Headers` from an iterator of `(name, value)` pairs, as used
    /// when decoding the bridge envelope's `headers` array.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut headers = Headers::new();
        for (k, v) in pairs {
            headers.append(k, v);
        }
        headers
    }

    /// Builds a `Headers` from a decoded [`http::HeaderMap`], preserving
    /// per-name multiplicity and iteration order (casing is lowercase, as
    /// that is all `http::HeaderMap` retains).
    pub fn from_header_map(map: &http::HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map.iter() {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str().to_string(), value.to_string());
            }
        }
        headers
    }

    /// Converts into an [`http::HeaderMap`] for handing off to the wire
    /// transport. Invalid header names/values are dropped rather than
    /// failing the whole conversion.
    pub fn to_header_map(&self) -> http::HeaderMap {
        let mut map = http::HeaderMap::new();
        for (name, value) in self.iter() {
            if let (Ok(name), Ok(value)) = (
                http::HeaderName::from_bytes(name.as_bytes()),
                http::HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_but_preserves_casing() {
        let mut h = Headers::new();
        h.append("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.iter().next(), Some(("Content-Type", "text/plain")));
    }

    #[test]
    fn set_cookie_preserves_multiplicity_and_order() {
        let mut h = Headers::new();
        h.append("Set-Cookie", "a=1");
        h.append("Set-Cookie", "b=2");
        let values: Vec<_> = h.get_all("set-cookie").collect();
        assert_eq!(values, vec!["a=1", "b=2"]);
    }

    #[test]
    fn set_replaces_all_prior_values() {
        let mut h = Headers::new();
        h.append("X-A", "1");
        h.append("X-A", "2");
        h.set("x-a", "3");
        assert_eq!(h.get_all("X-A").collect::<Vec<_>>(), vec!["3"]);
    }

    #[test]
    fn strip_hop_by_hop_removes_only_listed_headers() {
        let mut h = Headers::new();
        h.append("Connection", "keep-alive");
        h.append("Transfer-Encoding", "chunked");
        h.append("Content-Type", "text/plain");
        h.strip_hop_by_hop();
        assert!(!h.contains("connection"));
        assert!(!h.contains("transfer-encoding"));
        assert!(h.contains("content-type"));
    }

    #[test]
    fn round_trips_through_header_map() {
        let mut h = Headers::new();
        h.append("X-Foo", "bar");
        h.append("Set-Cookie", "a=1");
        h.append("Set-Cookie", "b=2");
        let map = h.to_header_map();
        let back = Headers::from_header_map(&map);
        assert_eq!(back.get_all("set-cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
    }
}
