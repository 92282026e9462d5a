//! Authorities and code parsing.
//!
//! A code is an identifier optionally scoped by an authority: `"EPSG:4326"`, `"4326"`, or a
//! URL-shaped `"http://www.example.org/codes/4326"`.
//!
//! Splitting rules:
//! - The separator is `/` when the code starts with a `scheme://` prefix, `:` otherwise.
//! - Separator positions are scanned from the rightmost to the leftmost, so the first candidate
//!   authority is the longest one and later candidates are progressively shorter.
//! - A position is a valid split only if the nearest non-whitespace character on both sides is an
//!   identifier character. This rejects splits inside `"://"` and `"::"`.
//! - Authority and local code are trimmed; authority names compare case-insensitively, local codes
//!   are case-sensitive.

use std::fmt;
use std::sync::Arc;

/// A namespace owning a set of codes, known by a title and optional aliases.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Authority {
    title: Arc<str>,
    aliases: Arc<[String]>,
}

impl Authority {
    /// Authority known only by its title.
    pub fn new(title: impl AsRef<str>) -> Self {
        Self { title: Arc::from(title.as_ref().trim()), aliases: Arc::from(Vec::new()) }
    }

    /// Add an alias (e.g. a citation or URL form) under which the authority is also known.
    pub fn with_alias(self, alias: impl AsRef<str>) -> Self {
        let mut aliases = self.aliases.to_vec();
        aliases.push(alias.as_ref().trim().to_owned());
        Self { title: self.title, aliases: Arc::from(aliases) }
    }

    /// Primary name, used to scope codes in listings and identifiers.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub(crate) fn shared_title(&self) -> Arc<str> {
        Arc::clone(&self.title)
    }

    /// Alternative names.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Title followed by every alias.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Case-insensitive match of `name` against the title and every alias.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        self.identifiers().any(|id| id.eq_ignore_ascii_case(name))
    }

    /// Two authorities are equivalent when any identifier of one matches the other.
    pub fn equivalent(&self, other: &Authority) -> bool {
        other.identifiers().any(|id| self.matches(id))
    }

    /// This authority, also known by every identifier of `other` it does not match yet.
    pub fn merge(&self, other: &Authority) -> Authority {
        let mut aliases = self.aliases.to_vec();
        for id in other.identifiers() {
            if !self.matches(id) && !aliases.iter().any(|alias| alias.eq_ignore_ascii_case(id)) {
                aliases.push(id.to_owned());
            }
        }
        Self { title: Arc::clone(&self.title), aliases: Arc::from(aliases) }
    }

    /// Strip a leading scope naming this authority; codes scoped by anything else are returned
    /// trimmed but otherwise untouched.
    pub fn trim_code<'a>(&self, code: &'a str) -> &'a str {
        split_candidates(code)
            .find(|split| self.matches(split.authority))
            .map(|split| split.local)
            .unwrap_or_else(|| code.trim())
    }

    /// Scope `code` with this authority's title unless it already carries a scope.
    pub fn scoped(&self, code: &str) -> String {
        let code = code.trim();
        if split_candidates(code).next().is_some() {
            code.to_owned()
        } else {
            format!("{}:{}", self.title, code)
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// One way of reading a code as `authority` + separator + `local`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Split<'a> {
    /// Candidate authority name (trimmed).
    pub authority: &'a str,
    /// Remaining local code (trimmed).
    pub local: &'a str,
}

/// Separator used by `code`: `/` for URL-shaped codes, `:` otherwise.
pub fn separator(code: &str) -> char {
    let code = code.trim_start();
    match code.find("://") {
        Some(end) if end > 0 && code[..end].chars().all(is_scheme_char) => '/',
        _ => ':',
    }
}

/// Candidate splits, rightmost separator first.
pub fn split_candidates(code: &str) -> SplitCandidates<'_> {
    let code = code.trim();
    SplitCandidates { code, separator: separator(code), end: code.len() }
}

/// Iterator returned by [`split_candidates`].
#[derive(Clone, Debug)]
pub struct SplitCandidates<'a> {
    code: &'a str,
    separator: char,
    end: usize,
}

impl<'a> Iterator for SplitCandidates<'a> {
    type Item = Split<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(position) = self.code[..self.end].rfind(self.separator) {
            self.end = position;
            let (left, right) = (&self.code[..position], &self.code[position + 1..]);
            let before = left.trim_end().chars().next_back();
            let after = right.trim_start().chars().next();
            if before.is_some_and(is_identifier_char) && after.is_some_and(is_identifier_char) {
                return Some(Split { authority: left.trim(), local: right.trim() });
            }
        }
        None
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '#')
}

fn is_scheme_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')
}
