//! Glob matching for cache keys.

use regex::Regex;

use crate::error::{CacheError, CacheResult};

/// A compiled glob pattern.
///
/// `*` matches any run of characters (including none) and `?` matches a
/// single character. Everything else is literal.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    All,
    Exact,
    Regex(Regex),
}

impl KeyPattern {
    pub fn new(pattern: &str) -> CacheResult<Self> {
        if pattern.is_empty() {
            return Err(CacheError::invalid_pattern(pattern, "pattern is empty"));
        }

        let matcher = if pattern.chars().all(|c| c == '*') {
            Matcher::All
        } else if !pattern.contains(['*', '?']) {
            Matcher::Exact
        } else {
            let mut expr = String::with_capacity(pattern.len() + 8);
            expr.push('^');
            let mut literal = String::new();
            for c in pattern.chars() {
                match c {
                    '*' | '?' => {
                        expr.push_str(&regex::escape(&literal));
                        literal.clear();
                        expr.push_str(if c == '*' { ".*" } else { "." });
                    }
                    _ => literal.push(c),
                }
            }
            expr.push_str(&regex::escape(&literal));
            expr.push('$');

            let re = Regex::new(&expr)
                .map_err(|e| CacheError::invalid_pattern(pattern, e.to_string()))?;
            Matcher::Regex(re)
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    /// Whether this pattern matches every key.
    pub fn matches_all(&self) -> bool {
        matches!(self.matcher, Matcher::All)
    }

    pub fn matches(&self, key: &str) -> bool {
        match &self.matcher {
            Matcher::All => true,
            Matcher::Exact => self.source == key,
            Matcher::Regex(re) => re.is_match(key),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_glob() {
        let p = KeyPattern::new("detail:*").unwrap();
        assert!(p.matches("detail:GET:/api/detail/one-piece"));
        assert!(p.matches("detail:"));
        assert!(!p.matches("chapter:GET:/api/chapter/one-piece-1"));
        assert!(!p.matches("xdetail:GET:/"));
    }

    #[test]
    fn test_inner_wildcards() {
        let p = KeyPattern::new("*:GET:/api/*?page=?").unwrap();
        assert!(p.matches("terbaru:GET:/api/terbaru?page=1"));
        assert!(!p.matches("terbaru:GET:/api/terbaru?page=12"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = KeyPattern::new("search:GET:/api/search?q=a.b*").unwrap();
        assert!(p.matches("search:GET:/api/search?q=a.b&page=1"));
        assert!(!p.matches("search:GET:/api/search?q=axb"));
    }

    #[test]
    fn test_star_matches_all() {
        let p = KeyPattern::new("*").unwrap();
        assert!(p.matches_all());
        assert!(p.matches(""));
        assert!(KeyPattern::new("**").unwrap().matches_all());
    }

    #[test]
    fn test_exact() {
        let p = KeyPattern::new("detail:GET:/api/detail/x").unwrap();
        assert!(p.matches("detail:GET:/api/detail/x"));
        assert!(!p.matches("detail:GET:/api/detail/xy"));
    }

    #[test]
    fn test_empty_is_rejected() {
        assert!(KeyPattern::new("").is_err());
    }
}
