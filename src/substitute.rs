//! Text substitution and restoration.
//!
//! Sanitizing (real → placeholder) and restoring (placeholder → real) are the
//! same operation with the table inverted. Keys are matched in one
//! left-to-right pass with leftmost-longest semantics: where two keys overlap,
//! the longer one always wins, so `10.0.0.1` can never eat the prefix of
//! `10.0.0.10`. Replacement output is never re-scanned.

use aho_corasick::{AhoCorasick, MatchKind};
use std::borrow::Cow;

use crate::error::Result;
use crate::ip;
use crate::mapping::Mapping;
use crate::placeholder::{ValueKind, deterministic};

/// A mapping table compiled for repeated application.
#[derive(Debug, Clone)]
pub struct Substitution {
    matcher: Option<AhoCorasick>,
    replacements: Vec<String>,
}

impl Substitution {
    /// Compile `mapping`. Empty keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the automaton cannot be built (e.g. the table is
    /// too large for the configured limits).
    pub fn new(mapping: &Mapping) -> Result<Self> {
        let (keys, replacements): (Vec<&str>, Vec<String>) = mapping
            .iter()
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.as_str(), value.clone()))
            .unzip();

        if keys.is_empty() {
            return Ok(Self {
                matcher: None,
                replacements,
            });
        }

        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&keys)?;
        Ok(Self {
            matcher: Some(matcher),
            replacements,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matcher.is_none()
    }

    /// Replace every key occurrence in `text`. Borrows when nothing matched.
    #[must_use]
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let Some(matcher) = &self.matcher else {
            return Cow::Borrowed(text);
        };
        if !matcher.is_match(text) {
            return Cow::Borrowed(text);
        }
        Cow::Owned(matcher.replace_all(text, &self.replacements))
    }

    /// [`Self::apply`] followed by the IPv4 fallback.
    #[must_use]
    pub fn apply_with_fallback<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self.apply(text) {
            Cow::Borrowed(text) => scrub_ips(text),
            Cow::Owned(text) => Cow::Owned(scrub_ips(&text).into_owned()),
        }
    }
}

/// Sanitize `text` with a real → placeholder table.
///
/// # Errors
///
/// See [`Substitution::new`].
pub fn apply(text: &str, mapping: &Mapping) -> Result<String> {
    Ok(Substitution::new(mapping)?.apply(text).into_owned())
}

/// Restore `text` with a placeholder → real table.
///
/// # Errors
///
/// See [`Substitution::new`].
pub fn reverse_apply(text: &str, reverse: &Mapping) -> Result<String> {
    apply(text, reverse)
}

/// Sanitize with `mapping`, then replace any discoverable IPv4 address still
/// present with its deterministic placeholder.
///
/// Catches values that appeared after the table was computed, such as
/// subprocess output.
///
/// # Errors
///
/// See [`Substitution::new`].
pub fn apply_with_fallback(text: &str, mapping: &Mapping) -> Result<String> {
    Ok(Substitution::new(mapping)?
        .apply_with_fallback(text)
        .into_owned())
}

/// Replace every discoverable IPv4 address with its deterministic placeholder.
#[must_use]
pub fn scrub_ips(text: &str) -> Cow<'_, str> {
    ip::ipv4_regex().replace_all(text, |caps: &regex::Captures<'_>| {
        let found = &caps[0];
        if ip::is_excluded(found) {
            found.to_string()
        } else {
            deterministic(ValueKind::Ip, found, 0)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table(pairs: &[(&str, &str)]) -> Mapping {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn invert(mapping: &Mapping) -> Mapping {
        mapping.iter().map(|(k, v)| (v.clone(), k.clone())).collect()
    }

    #[test]
    fn longest_key_wins() {
        let mapping = table(&[("10.0.0.10", "A"), ("10.0.0.1", "B")]);
        assert_eq!(apply("reach 10.0.0.10 now", &mapping).unwrap(), "reach A now");
        assert_eq!(apply("reach 10.0.0.1 now", &mapping).unwrap(), "reach B now");
    }

    #[test]
    fn empty_mapping_is_identity() {
        let text = "nothing 10.0.0.1 changes";
        assert_eq!(apply(text, &Mapping::new()).unwrap(), text);
        let compiled = Substitution::new(&Mapping::new()).unwrap();
        assert!(compiled.is_empty());
        assert!(matches!(compiled.apply(text), Cow::Borrowed(_)));
    }

    #[test]
    fn replaces_every_occurrence() {
        let mapping = table(&[("db.corp.local", "host-abcdefgh.example.test")]);
        let out = apply("db.corp.local,db.corp.local", &mapping).unwrap();
        assert_eq!(out, "host-abcdefgh.example.test,host-abcdefgh.example.test");
    }

    #[test]
    fn replacement_output_is_not_rescanned() {
        // B's placeholder is A's key; a sequential replace would chain them.
        let mapping = table(&[("alpha", "beta"), ("beta", "gamma")]);
        assert_eq!(apply("alpha beta", &mapping).unwrap(), "beta gamma");
    }

    #[test]
    fn restore_round_trip() {
        let mapping = table(&[
            ("10.0.0.1", "111.5.5.5"),
            ("10.0.0.10", "111.6.6.6"),
            ("db.corp.local", "host-aaaaaaaa.example.test"),
        ]);
        let original = "hosts: 10.0.0.1 10.0.0.10 db.corp.local";
        let sanitized = apply(original, &mapping).unwrap();
        assert!(!sanitized.contains("10.0.0"));
        assert_eq!(reverse_apply(&sanitized, &invert(&mapping)).unwrap(), original);
    }

    #[test]
    fn fallback_scrubs_unmapped_addresses() {
        let mapping = table(&[("10.0.0.1", "111.5.5.5")]);
        let out = apply_with_fallback("a=10.0.0.1 b=10.0.0.2 lo=127.0.0.1", &mapping).unwrap();
        assert!(out.contains("a=111.5.5.5"));
        assert!(!out.contains("10.0.0.2"));
        assert!(out.contains("lo=127.0.0.1"));
        let expected = deterministic(ValueKind::Ip, "10.0.0.2", 0);
        assert!(out.contains(&expected));
    }

    #[test]
    fn scrub_is_stable() {
        let once = scrub_ips("ping 203.0.113.5").into_owned();
        let twice = scrub_ips(&once).into_owned();
        assert_eq!(once, twice);
    }

    proptest! {
        #[test]
        fn empty_table_identity(text in ".*") {
            prop_assert_eq!(apply(&text, &Mapping::new()).unwrap(), text);
        }

        #[test]
        fn sanitize_then_restore_is_lossless(
            words in proptest::collection::vec("[a-z]{1,6}", 0..20),
            a in 1u8..=254, b in 1u8..=254,
        ) {
            let real_a = format!("10.0.{a}.{b}");
            let real_b = format!("10.0.{a}.{b}0");
            let mapping = table(&[
                (real_a.as_str(), "PLACEHOLDER_A"),
                (real_b.as_str(), "PLACEHOLDER_B"),
            ]);
            let mut text = String::new();
            for (i, word) in words.iter().enumerate() {
                text.push_str(word);
                text.push(' ');
                match i % 3 {
                    0 => text.push_str(&real_a),
                    1 => text.push_str(&real_b),
                    _ => {}
                }
                text.push(' ');
            }
            let sanitized = apply(&text, &mapping).unwrap();
            prop_assert_eq!(reverse_apply(&sanitized, &invert(&mapping)).unwrap(), text);
        }
    }
}
