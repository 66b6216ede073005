use std::collections::BTreeMap;

use aho_corasick::{AhoCorasick, BuildError, MatchKind};

/// Single automaton over every dictionary key, replacing all of them in one
/// left-to-right scan.
///
/// Keys are literal and case-sensitive. When several keys start at the same
/// position the longest one wins, so the outcome does not depend on key order.
#[derive(Debug)]
pub(super) struct Replacer {
    aho_corasick: AhoCorasick,
    to: Vec<String>,
}

impl Replacer {
    pub(super) fn new(mapping: &BTreeMap<String, String>) -> Result<Self, BuildError> {
        let aho_corasick = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(mapping.keys())?;
        let to = mapping.values().cloned().collect();
        Ok(Self { aho_corasick, to })
    }

    /// Returns the rewritten haystack and whether at least one key was found.
    pub(super) fn replace_all(&self, haystack: &str) -> (String, bool) {
        let mut matched = false;
        let mut dst = String::with_capacity(haystack.len());
        self.aho_corasick
            .replace_all_with(haystack, &mut dst, |mat, _, dst| {
                matched = true;
                dst.push_str(&self.to[mat.pattern().as_usize()]);
                true
            });
        (dst, matched)
    }
}
