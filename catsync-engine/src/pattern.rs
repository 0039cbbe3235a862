//! Key-namespace pattern derivation.
//!
//! Given the natural keys a run knows about, derive a matcher for the wider
//! key family they belong to, so leftovers of earlier interrupted runs can be
//! found remotely even when nothing local records them. Pure: no I/O.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;

use catsync_core::NaturalKey;

const SEPARATORS: [char; 5] = ['-', '_', ':', '.', '/'];
const MIN_ALPHA_PREFIX: usize = 2;

/// Anchored matcher over prefix families and exact keys.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    prefixes: Vec<String>,
    exact: Vec<String>,
    regex: Regex,
}

impl KeyPattern {
    pub fn matches(&self, key: &NaturalKey) -> bool {
        self.regex.is_match(key.as_str())
    }

    /// Prefix families, sorted. Remotes may push these down as scan filters.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Keys with no recognizable family, matched verbatim.
    pub fn exact_keys(&self) -> &[String] {
        &self.exact
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.regex.as_str())
    }
}

enum Family {
    Prefix(String),
    Exact(String),
}

fn family_of(key: &str) -> Family {
    if let Some(idx) = key.find(SEPARATORS) {
        if idx > 0 {
            let end = idx + 1; // separators are single-byte
            return Family::Prefix(key[..end].to_string());
        }
    }
    let alpha: String = key.chars().take_while(char::is_ascii_alphabetic).collect();
    if alpha.len() >= MIN_ALPHA_PREFIX && alpha.len() < key.len() {
        Family::Prefix(alpha)
    } else {
        Family::Exact(key.to_string())
    }
}

/// Derive a matcher from `keys`. Returns `None` for an empty key set.
pub fn derive_pattern(keys: &[NaturalKey]) -> Option<KeyPattern> {
    let mut prefixes = BTreeSet::new();
    let mut exact = BTreeSet::new();
    for key in keys {
        if key.as_str().is_empty() {
            continue;
        }
        match family_of(key.as_str()) {
            Family::Prefix(p) => {
                prefixes.insert(p);
            }
            Family::Exact(k) => {
                exact.insert(k);
            }
        }
    }
    // Exact keys already covered by a family add nothing.
    exact.retain(|k: &String| !prefixes.iter().any(|p: &String| k.starts_with(p.as_str())));

    if prefixes.is_empty() && exact.is_empty() {
        return None;
    }

    let alternatives: Vec<String> = prefixes
        .iter()
        .map(|p| format!("{}.*", regex::escape(p)))
        .chain(exact.iter().map(|k| regex::escape(k)))
        .collect();
    let source = format!("^(?:{})$", alternatives.join("|"));
    // Every alternative is escaped, so compilation can only fail on size limits.
    let regex = match Regex::new(&source) {
        Ok(regex) => regex,
        Err(err) => {
            tracing::warn!(error = %err, "derived key pattern failed to compile");
            return None;
        }
    };

    Some(KeyPattern {
        prefixes: prefixes.into_iter().collect(),
        exact: exact.into_iter().collect(),
        regex,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn keys(raw: &[&str]) -> Vec<NaturalKey> {
        raw.iter().map(|k| NaturalKey::from(*k)).collect()
    }

    #[test]
    fn empty_input_has_no_pattern() {
        assert!(derive_pattern(&[]).is_none());
        assert!(derive_pattern(&keys(&[""])).is_none());
    }

    #[test]
    fn separator_prefixes_form_families() {
        let pattern = derive_pattern(&keys(&["SKU-001", "SKU-002", "CAT_9", "ns:item"])).unwrap();
        assert_eq!(pattern.prefixes(), ["CAT_", "SKU-", "ns:"]);
        assert!(pattern.exact_keys().is_empty());
    }

    #[rstest]
    #[case("SKU-999", true)]
    #[case("SKU-", true)]
    #[case("CAT_x", true)]
    #[case("XSKU-1", false)]
    #[case("SKU1", false)]
    #[case("sku-1", false)]
    fn matching_is_anchored(#[case] candidate: &str, #[case] expected: bool) {
        let pattern = derive_pattern(&keys(&["SKU-001", "CAT_9"])).unwrap();
        assert_eq!(pattern.matches(&NaturalKey::from(candidate)), expected);
    }

    #[test]
    fn regex_metacharacters_are_escaped() {
        let pattern = derive_pattern(&keys(&["v1.2", "a+b/c"])).unwrap();
        assert_eq!(pattern.prefixes(), ["a+b/", "v1."]);
        assert!(pattern.matches(&"v1.9".into()));
        assert!(!pattern.matches(&"v1x9".into()));
        assert!(pattern.matches(&"a+b/z".into()));
        assert!(!pattern.matches(&"aab/z".into()));
    }

    #[test]
    fn alphabetic_run_is_used_without_separator() {
        let pattern = derive_pattern(&keys(&["shoes42", "shoes7"])).unwrap();
        assert_eq!(pattern.prefixes(), ["shoes"]);
        assert!(pattern.matches(&"shoes9000".into()));
    }

    #[test]
    fn short_or_bare_keys_match_exactly() {
        let pattern = derive_pattern(&keys(&["A", "B", "x1", "root"])).unwrap();
        assert!(pattern.prefixes().is_empty());
        assert_eq!(pattern.exact_keys(), ["A", "B", "root", "x1"]);
        assert!(pattern.matches(&"A".into()));
        assert!(!pattern.matches(&"AB".into()));
        assert!(!pattern.matches(&"x12".into()));
    }

    #[test]
    fn exact_keys_covered_by_a_family_are_dropped() {
        let pattern = derive_pattern(&keys(&["SKU-1", "SKU"])).unwrap();
        // "SKU" is a bare alphabetic key, so it stays exact; "SKU-" does not cover it.
        assert_eq!(pattern.exact_keys(), ["SKU"]);

        let pattern = derive_pattern(&keys(&["ab-1", "ab-"])).unwrap();
        assert!(pattern.exact_keys().is_empty());
    }

    #[test]
    fn leading_separator_falls_back_to_exact() {
        let pattern = derive_pattern(&keys(&["-x"])).unwrap();
        assert_eq!(pattern.exact_keys(), ["-x"]);
        assert!(!pattern.matches(&"-y".into()));
    }
}
