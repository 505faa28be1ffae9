//! Request fingerprinting.
//!
//! A fingerprint has the shape `{namespace}:{METHOD}:{path}[?{query}]` where
//! the query pairs are sorted by name. Pairs sharing a name keep their
//! request order, so `tag=a&tag=b` and `tag=b&tag=a` stay distinct.

use url::form_urlencoded;

use crate::error::{CacheError, CacheResult};

/// Build the cache key for a request.
pub fn fingerprint(namespace: &str, method: &str, path: &str, query: Option<&str>) -> String {
    let mut key = format!("{namespace}:{}:{path}", method.to_ascii_uppercase());

    let normalized = query.map(normalize_query).unwrap_or_default();
    if !normalized.is_empty() {
        key.push('?');
        key.push_str(&normalized);
    }

    key
}

/// Sort query pairs by name and re-encode them.
///
/// Empty pairs (`a=1&&b=2`) are dropped.
pub fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    // Stable sort keeps duplicate names in request order.
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// A fingerprint split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub namespace: String,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
}

impl ParsedKey {
    /// Path and query joined, suitable for building a request URI.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

/// Parse a fingerprint produced by [`fingerprint`].
pub fn parse_fingerprint(key: &str) -> CacheResult<ParsedKey> {
    let mut parts = key.splitn(3, ':');
    let namespace = parts.next().unwrap_or_default();
    let method = parts
        .next()
        .ok_or_else(|| CacheError::invalid_key(key, "missing method"))?;
    let target = parts
        .next()
        .ok_or_else(|| CacheError::invalid_key(key, "missing path"))?;

    if namespace.is_empty() {
        return Err(CacheError::invalid_key(key, "missing namespace"));
    }
    if method.is_empty() || !method.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(CacheError::invalid_key(key, "method must be uppercase"));
    }
    if !target.starts_with('/') {
        return Err(CacheError::invalid_key(key, "path must start with '/'"));
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) if !query.is_empty() => (path, Some(query.to_string())),
        Some((path, _)) => (path, None),
        None => (target, None),
    };

    Ok(ParsedKey {
        namespace: namespace.to_string(),
        method: method.to_string(),
        path: path.to_string(),
        query,
    })
}
