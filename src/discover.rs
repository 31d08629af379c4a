//! Discovery of unmapped sensitive values.
//!
//! Scans text for IPv4 addresses and configured hostname suffixes that do
//! not yet have a placeholder and allocates one for each. The result is a
//! fresh table; callers merge and persist it through the store.

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::ip;
use crate::mapping::{Mapping, MappingSet};
use crate::placeholder::{PlaceholderGenerator, ValueKind};

/// Compiled discovery patterns.
#[derive(Debug, Clone)]
pub struct Discoverer {
    ipv4: bool,
    hostnames: Vec<Regex>,
    generator: PlaceholderGenerator,
}

impl Discoverer {
    /// Build a discoverer for the given hostname suffixes.
    ///
    /// Each suffix is taken literally (e.g. `.corp.local`); a match extends
    /// greedily to the left over host-label characters, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] if a suffix produces an invalid regex.
    pub fn new<S: AsRef<str>>(
        ipv4: bool,
        hostname_suffixes: &[S],
        generator: PlaceholderGenerator,
    ) -> Result<Self> {
        let hostnames = hostname_suffixes
            .iter()
            .map(AsRef::as_ref)
            .filter(|suffix| !suffix.trim().is_empty())
            .map(compile_suffix)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ipv4,
            hostnames,
            generator,
        })
    }

    #[must_use]
    pub const fn generator(&self) -> &PlaceholderGenerator {
        &self.generator
    }

    /// Find values in `text` with no placeholder yet and allocate one each.
    ///
    /// Values already present in `mappings`, or that are themselves a
    /// placeholder in use, are skipped. Every allocated placeholder is unique
    /// against both tables and against the rest of the result.
    ///
    /// # Errors
    ///
    /// Propagates placeholder exhaustion from the generator.
    pub fn discover(&self, text: &str, mappings: &MappingSet) -> Result<Mapping> {
        let mut used = mappings.used_placeholders();
        let mut found = Mapping::new();

        if self.ipv4 {
            for candidate in ip::find_discoverable(text) {
                self.allocate(ValueKind::Ip, candidate, mappings, &mut used, &mut found)?;
            }
        }

        for pattern in &self.hostnames {
            for m in pattern.find_iter(text) {
                self.allocate(ValueKind::Hostname, m.as_str(), mappings, &mut used, &mut found)?;
            }
        }

        Ok(found)
    }

    fn allocate(
        &self,
        kind: ValueKind,
        real: &str,
        mappings: &MappingSet,
        used: &mut HashSet<String>,
        found: &mut Mapping,
    ) -> Result<()> {
        if mappings.contains(real) || found.contains_key(real) || used.contains(real) {
            return Ok(());
        }
        let placeholder = self.generator.generate(kind, real, used)?;
        used.insert(placeholder.clone());
        found.insert(real.to_string(), placeholder);
        Ok(())
    }
}

fn compile_suffix(suffix: &str) -> Result<Regex> {
    let pattern = format!(r"[a-z0-9][-a-z0-9.]*{}", regex::escape(suffix.trim()));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| Error::Pattern { pattern, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholder::PlaceholderPolicy;

    fn discoverer(suffixes: &[&str]) -> Discoverer {
        Discoverer::new(true, suffixes, PlaceholderGenerator::default()).unwrap()
    }

    #[test]
    fn reserved_ranges_are_not_discovered() {
        let text = "lo 127.0.0.1 bcast 255.255.255.255 real 203.0.113.5";
        let found = discoverer(&[]).discover(text, &MappingSet::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("203.0.113.5"));
    }

    #[test]
    fn second_pass_with_first_result_is_empty() {
        let text = "a 10.1.1.1 b 10.1.1.2 host app01.corp.local";
        let d = discoverer(&[".corp.local"]);
        let first = d.discover(text, &MappingSet::default()).unwrap();
        assert_eq!(first.len(), 3);

        let seeded = MappingSet::new(Mapping::new(), first);
        let second = d.discover(text, &seeded).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn hostname_match_is_greedy_and_case_insensitive() {
        let text = "connect to DB-01.Prod.Corp.Local:5432";
        let found = discoverer(&[".corp.local"])
            .discover(text, &MappingSet::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        let (real, placeholder) = found.iter().next().unwrap();
        assert_eq!(real, "DB-01.Prod.Corp.Local");
        assert!(placeholder.starts_with("host-"));
    }

    #[test]
    fn suffix_is_literal_not_regex() {
        let found = discoverer(&[".corp.local"])
            .discover("appXcorpYlocal", &MappingSet::default())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn manual_entries_are_respected() {
        let manual: Mapping = [("10.2.2.2".to_string(), "111.50.100.1".to_string())]
            .into_iter()
            .collect();
        let set = MappingSet::new(manual, Mapping::new());
        let found = discoverer(&[]).discover("x 10.2.2.2 y", &set).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn placeholders_in_use_are_not_rediscovered() {
        let auto: Mapping = [(
            "web.corp.local".to_string(),
            "host-abcdefgh.corp.local".to_string(),
        )]
        .into_iter()
        .collect();
        let set = MappingSet::new(Mapping::new(), auto);
        let found = discoverer(&[".corp.local"])
            .discover("see host-abcdefgh.corp.local", &set)
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn allocations_are_unique_within_one_pass() {
        let text: String = (1..=60).map(|i| format!("10.0.3.{i} ")).collect();
        let d = Discoverer::new(
            true,
            &[] as &[&str],
            PlaceholderGenerator::new(PlaceholderPolicy::Random),
        )
        .unwrap();
        let found = d.discover(&text, &MappingSet::default()).unwrap();
        assert_eq!(found.len(), 60);
        let distinct: HashSet<_> = found.values().collect();
        assert_eq!(distinct.len(), 60);
    }

    #[test]
    fn ipv4_discovery_can_be_disabled() {
        let d = Discoverer::new(false, &[] as &[&str], PlaceholderGenerator::default()).unwrap();
        assert!(d.discover("10.0.0.1", &MappingSet::default()).unwrap().is_empty());
    }
}
