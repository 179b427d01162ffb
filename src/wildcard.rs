//! Shell-style `*`/`?` wildcards and SQL `LIKE` patterns, compiled to anchored
//! regular expressions.

use regex::Regex;

use crate::error::{Result, TagStormError};

/// True if `s` contains a `*` or `?` wildcard.
pub fn is_wild(s: &str) -> bool {
    s.contains(['*', '?'])
}

fn translate(pattern: &str, many: char, one: char) -> String {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    let mut literal = String::new();
    for ch in pattern.chars() {
        if ch == many || ch == one {
            re.push_str(&regex::escape(&literal));
            literal.clear();
            re.push_str(if ch == many { ".*" } else { "." });
        } else {
            literal.push(ch);
        }
    }
    re.push_str(&regex::escape(&literal));
    re.push('$');
    re
}

/// A compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct Wildcard {
    pattern: String,
    re: Regex,
}

impl Wildcard {
    /// Compile a `*`/`?` pattern. Every other character matches itself.
    pub fn new(pattern: &str) -> Result<Self> {
        Self::compile(pattern, translate(pattern, '*', '?'))
    }

    /// Compile a SQL `LIKE` pattern, where `%` matches any run and `_` one char.
    pub fn like(pattern: &str) -> Result<Self> {
        Self::compile(pattern, translate(pattern, '%', '_'))
    }

    // Literal runs are escaped, but a long enough pattern still exceeds the
    // regex size limit.
    fn compile(pattern: &str, re: String) -> Result<Self> {
        let re = Regex::new(&re).map_err(|e| TagStormError::Wildcard {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Wildcard {
            pattern: pattern.to_string(),
            re,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, s: &str) -> bool {
        self.re.is_match(s)
    }
}

impl PartialEq for Wildcard {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}
