//! Scope algebra over space-separated feature tokens.
//!
//! The `scope` claim carries feature names joined by single spaces. Policies
//! reason about them as sets: a license with scopes `S` may be issued by a
//! caller holding scopes `C` iff `S ⊆ C`, equivalently `S \ C = ∅`.

use std::collections::BTreeSet;
use std::fmt;

/// An unordered set of scope tokens.
///
/// Parsing splits on any whitespace and drops empty tokens, so
/// `parse(serialize(s)) == s` for every set; serialization is deterministic
/// (lexicographic).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet {
    tokens: BTreeSet<String>,
}

impl ScopeSet {
    /// Empty scope set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-separated scope string.
    pub fn parse(scope: &str) -> Self {
        Self {
            tokens: scope
                .split_whitespace()
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Number of distinct tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True when no tokens are present.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Membership test for a single token.
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// True when every token of `self` is present in `other`.
    pub fn subset_of(&self, other: &ScopeSet) -> bool {
        self.tokens.is_subset(&other.tokens)
    }

    /// Tokens of `self` that are absent from `other`.
    pub fn difference(&self, other: &ScopeSet) -> ScopeSet {
        ScopeSet {
            tokens: self.tokens.difference(&other.tokens).cloned().collect(),
        }
    }

    /// Insert a token. Returns false when it was already present.
    pub fn insert(&mut self, token: impl Into<String>) -> bool {
        self.tokens.insert(token.into())
    }

    /// Iterate tokens in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in &self.tokens {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(token)?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<String> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_and_dedupes() {
        let s = ScopeSet::parse("simulator  regulate ui settings regulate");
        assert_eq!(s.len(), 4);
        assert!(s.contains("simulator"));
        assert!(s.contains("settings"));
        assert!(!s.contains("master-of-puppets"));
    }

    #[test]
    fn empty_and_whitespace_only_scopes() {
        assert!(ScopeSet::parse("").is_empty());
        assert!(ScopeSet::parse("   \t ").is_empty());
    }

    #[test]
    fn subset_iff_empty_difference() {
        let license = ScopeSet::parse("simulator regulate ui settings");
        let caller = ScopeSet::parse("simulator regulate ui settings master-of-puppets");
        assert!(license.subset_of(&caller));
        assert!(license.difference(&caller).is_empty());

        let narrow_caller = ScopeSet::parse("simulator regulate settings master-of-puppets");
        assert!(!license.subset_of(&narrow_caller));
        let missing = license.difference(&narrow_caller);
        assert_eq!(missing.len(), 1);
        assert!(missing.contains("ui"));
    }

    #[test]
    fn serialize_parse_round_trip() {
        let s = ScopeSet::parse("ui settings regulate simulator");
        let round = ScopeSet::parse(&s.to_string());
        assert_eq!(s, round);
    }
}
