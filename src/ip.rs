//! IPv4 detection.
//!
//! Finds dotted-quad addresses in free text and decides which of them are
//! real, discoverable values. Infrastructure-reserved ranges and our own
//! placeholder range are never treated as sensitive.

use memchr::memchr;
use regex::Regex;
use std::sync::LazyLock;

/// First octet shared by every IPv4 placeholder.
pub const PLACEHOLDER_IP_PREFIX: u8 = 111;

/// Dotted quad with each octet in 0..=255, bounded by word boundaries so
/// that `1.2.3.4` is not found inside `11.2.3.45`.
static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
    )
    .expect("ipv4 regex compiles")
});

/// The compiled IPv4 matcher.
#[must_use]
pub fn ipv4_regex() -> &'static Regex {
    &IPV4
}

fn octets(ip: &str) -> Option<[u8; 4]> {
    let mut out = [0u8; 4];
    let mut parts = ip.split('.');
    for slot in &mut out {
        *slot = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// Whether `ip` must never be replaced.
///
/// Excluded: loopback `127.*`, unspecified `0.0.0.0`, `255.*` (broadcast and
/// subnet masks), link-local `169.254.*`, multicast `224.*`-`239.*`, and the
/// placeholder range. Strings that are not dotted quads are excluded too.
#[must_use]
pub fn is_excluded(ip: &str) -> bool {
    let Some([a, b, c, d]) = octets(ip) else {
        return true;
    };
    matches!(a, 127 | 255 | 224..=239 | PLACEHOLDER_IP_PREFIX)
        || (a, b) == (169, 254)
        || [a, b, c, d] == [0, 0, 0, 0]
}

/// Iterate over every discoverable IPv4 address in `text`, in order,
/// duplicates included.
pub fn find_discoverable(text: &str) -> impl Iterator<Item = &str> {
    // Every dotted quad contains a '.', so skip the regex for dot-free text.
    let candidates = memchr(b'.', text.as_bytes()).map(|_| IPV4.find_iter(text));
    candidates
        .into_iter()
        .flatten()
        .map(|m| m.as_str())
        .filter(|ip| !is_excluded(ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_reserved_ranges() {
        for ip in [
            "127.0.0.1",
            "127.255.0.3",
            "0.0.0.0",
            "255.255.255.255",
            "255.255.255.0",
            "169.254.10.20",
            "224.0.0.1",
            "239.255.255.250",
            "111.22.33.44",
        ] {
            assert!(is_excluded(ip), "{ip} should be excluded");
        }
    }

    #[test]
    fn keeps_routable_addresses() {
        for ip in ["10.0.0.1", "192.168.1.20", "203.0.113.5", "8.8.8.8", "0.0.0.1"] {
            assert!(!is_excluded(ip), "{ip} should be discoverable");
        }
    }

    #[test]
    fn finds_addresses_in_text_order() {
        let text = "web=10.0.0.5 db=10.0.0.6 lo=127.0.0.1 web2=10.0.0.5";
        let found: Vec<_> = find_discoverable(text).collect();
        assert_eq!(found, vec!["10.0.0.5", "10.0.0.6", "10.0.0.5"]);
    }

    #[test]
    fn does_not_match_inside_longer_numbers() {
        let found: Vec<_> = find_discoverable("version 1.2.3.4.5 and 10.0.0.256").collect();
        assert!(!found.contains(&"10.0.0.25"));
    }

    #[test]
    fn text_without_dots_yields_nothing() {
        assert_eq!(find_discoverable("no addresses here").count(), 0);
    }
}
