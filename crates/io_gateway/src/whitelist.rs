//! Action-name allow-lists.
//!
//! Action names are dot-delimited (`math.add`, `users.admin.ban`). String
//! patterns are dotted-segment globs:
//!
//! * `*` matches within one segment (`math.*` matches `math.add`, not `math.sub.advanced`)
//! * `**` matches across segments (`math.**` matches both)
//! * `?` matches exactly one character
//!
//! Every other character is literal, `.` included: `users.*.get` matches
//! `users.a.get` but never `usersXaXget`. Moleculer's own glob matcher
//! leaves `.` unescaped and would accept the latter, so patterns written for
//! it can only match fewer names here, never more.
//!
//! Regex patterns are tested as-is.

use crate::error::GatewayError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A whitelist entry as it appears in configuration.
///
/// ```toml
/// whitelist = ["math.*", { regex = "^rooms\\.(join|leave)$" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WhitelistEntry {
    Glob(String),
    Regex { regex: String },
}

impl From<&str> for WhitelistEntry {
    fn from(glob: &str) -> Self {
        WhitelistEntry::Glob(glob.to_string())
    }
}

impl From<String> for WhitelistEntry {
    fn from(glob: String) -> Self {
        WhitelistEntry::Glob(glob)
    }
}

/// A compiled whitelist pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// No wildcard: plain string equality.
    Exact(String),
    /// Glob translated to an anchored regex.
    Glob { source: String, regex: Regex },
    /// User-supplied regex.
    Regex(Regex),
}

impl Pattern {
    pub fn glob(pattern: &str) -> Result<Self, GatewayError> {
        if !pattern.contains(['*', '?']) {
            return Ok(Pattern::Exact(pattern.to_string()));
        }
        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|source| {
            GatewayError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Pattern::Glob {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn regex(pattern: &str) -> Result<Self, GatewayError> {
        Regex::new(pattern)
            .map(Pattern::Regex)
            .map_err(|source| GatewayError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn compile(entry: &WhitelistEntry) -> Result<Self, GatewayError> {
        match entry {
            WhitelistEntry::Glob(glob) => Self::glob(glob),
            WhitelistEntry::Regex { regex } => Self::regex(regex),
        }
    }

    pub fn is_match(&self, action: &str) -> bool {
        match self {
            Pattern::Exact(expected) => expected == action,
            Pattern::Glob { regex, .. } | Pattern::Regex(regex) => regex.is_match(action),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Exact(source) | Pattern::Glob { source, .. } => source,
            Pattern::Regex(regex) => regex.as_str(),
        }
    }
}

/// Translate a dotted-segment glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^.]*"),
            '?' => out.push('.'),
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }
    out.push('$');
    out
}

/// True iff any pattern matches `action`.
///
/// Callers treat an empty list as "no restriction" before reaching this.
pub fn matches(action: &str, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(action))
}

/// The compiled allow-list of one event binding.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    patterns: Vec<Pattern>,
}

impl Whitelist {
    pub fn compile<'a, I>(entries: I) -> Result<Self, GatewayError>
    where
        I: IntoIterator<Item = &'a WhitelistEntry>,
    {
        let patterns = entries
            .into_iter()
            .map(Pattern::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn push(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// An empty whitelist permits everything.
    pub fn permits(&self, action: &str) -> bool {
        self.is_empty() || matches(action, &self.patterns)
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }
}
