//! Header multimap.
//!
//! Lookup is case-insensitive; iteration yields names with their original
//! case in insertion order. A name may carry several values.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    name: String,
    value: String,
}

impl Header {
    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    /// Last value for `name`.
    pub fn get_last(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|h| h.is(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|h| h.is(name))
    }

    /// True if any value of `name` equals `value` (ASCII case-insensitive).
    pub fn contains_value(&self, name: &str, value: &str) -> bool {
        self.entries
            .iter()
            .any(|h| h.is(name) && h.value.eq_ignore_ascii_case(value))
    }

    /// Append a value, keeping any existing ones.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replace all values of `name` with one value. The first existing
    /// position (and its name case) is kept.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter().position(|h| h.is(&name)) {
            Some(first) => {
                self.entries[first].value = value;
                let mut i = 0;
                self.entries.retain(|h| {
                    let keep = i == first || !h.is(&name);
                    i += 1;
                    keep
                });
            }
            None => self.entries.push(Header { name, value }),
        }
    }

    /// Remove every value of `name`; returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|h| !h.is(name));
        before - self.entries.len()
    }

    /// Keep only entries for which `keep(name, value)` is true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.entries.retain(|h| keep(&h.name, &h.value));
    }

    /// Rewrite values of `name` in place; entries whose new value is `None` are dropped.
    pub fn map_values(&mut self, name: &str, mut f: impl FnMut(&str) -> Option<String>) {
        self.entries.retain_mut(|h| {
            if !h.is(name) {
                return true;
            }
            match f(&h.value) {
                Some(v) => {
                    h.value = v;
                    true
                }
                None => false,
            }
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}

impl From<&http::HeaderMap> for Headers {
    fn from(map: &http::HeaderMap) -> Self {
        map.iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }
}

impl Headers {
    /// Copy into an `http::HeaderMap`, dropping names or values `http` rejects.
    pub fn to_header_map(&self) -> http::HeaderMap {
        let mut map = http::HeaderMap::with_capacity(self.entries.len());
        for h in &self.entries {
            let (Ok(name), Ok(value)) = (
                http::HeaderName::from_bytes(h.name.as_bytes()),
                http::HeaderValue::from_str(&h.value),
            ) else {
                tracing::debug!(header = %h.name, "Dropping invalid header");
                continue;
            };
            map.append(name, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup_preserves_case() {
        let mut headers = Headers::new();
        headers.add("X-Custom-Thing", "a");
        headers.add("content-type", "text/plain");
        headers.add("x-custom-thing", "b");

        assert_eq!(headers.get("X-CUSTOM-THING"), Some("a"));
        assert_eq!(headers.get_last("x-custom-thing"), Some("b"));
        assert_eq!(headers.get_all("x-Custom-thing"), vec!["a", "b"]);

        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["X-Custom-Thing", "content-type", "x-custom-thing"]);
    }

    #[test]
    fn test_set_replaces_all_values_in_place() {
        let mut headers: Headers = [("A", "1"), ("B", "2"), ("a", "3")].into_iter().collect();
        headers.set("a", "9");
        let pairs: Vec<(&str, &str)> = headers.iter().collect();
        assert_eq!(pairs, vec![("A", "9"), ("B", "2")]);

        headers.set("C", "new");
        assert_eq!(headers.get("c"), Some("new"));
    }

    #[test]
    fn test_remove_and_map_values() {
        let mut headers: Headers = [("Cookie", "a=1; b=2"), ("cookie", "c=3"), ("Host", "h")]
            .into_iter()
            .collect();
        headers.map_values("cookie", |v| {
            if v.starts_with('c') {
                None
            } else {
                Some(v.replace("b=2", "").trim_end_matches("; ").to_string())
            }
        });
        assert_eq!(headers.get_all("cookie"), vec!["a=1"]);
        assert_eq!(headers.remove("COOKIE"), 1);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_header_map_conversion() {
        let mut headers = Headers::new();
        headers.add("X-Multi", "1");
        headers.add("x-multi", "2");
        headers.add("bad header", "x");

        let map = headers.to_header_map();
        assert_eq!(map.get_all("x-multi").iter().count(), 2);
        assert_eq!(map.len(), 2);

        let back = Headers::from(&map);
        assert_eq!(back.get_all("X-MULTI"), vec!["1", "2"]);
    }
}
