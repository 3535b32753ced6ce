//! 64-bit URI fingerprints.
//!
//! The top 24 bits hash the scheme and authority, the low 40 bits hash the
//! whole URI. Sorting by fingerprint therefore groups URIs of the same
//! host, which keeps the on-disk seen store's pages host-local.

use crate::url_utils::split_authority;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

const HOST_BITS: u32 = 24;
const HOST_MASK: u64 = !0u64 << (64 - HOST_BITS);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint of an already canonicalized URI.
    pub fn of(canonical: &str) -> Self {
        let (authority, _) = split_authority(canonical);
        let high = xxh3_64(authority.as_bytes()) & HOST_MASK;
        let low = xxh3_64(canonical.as_bytes()) >> HOST_BITS;
        Fingerprint(high | low)
    }

    pub fn from_u64(value: u64) -> Self {
        Fingerprint(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The scheme+authority component. Equal for every URI of one host.
    pub fn host_bits(self) -> u64 {
        self.0 >> (64 - HOST_BITS)
    }

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(Fingerprint::of("http://example.com/a"), Fingerprint::of("http://example.com/a"));
        assert_ne!(Fingerprint::of("http://example.com/a"), Fingerprint::of("http://example.com/b"));
    }

    #[test]
    fn test_same_host_shares_high_bits() {
        let a = Fingerprint::of("http://example.com/a");
        let b = Fingerprint::of("http://example.com/some/other/path?q=1");
        let c = Fingerprint::of("http://other.org/a");
        assert_eq!(a.host_bits(), b.host_bits());
        assert_ne!(a.host_bits(), c.host_bits());
    }

    #[test]
    fn test_scheme_is_part_of_host_bits() {
        let http = Fingerprint::of("http://example.com/");
        let https = Fingerprint::of("https://example.com/");
        assert_ne!(http, https);
    }

    #[test]
    fn test_dns_uris_do_not_collide() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..20_000 {
            let fp = Fingerprint::of(&format!("dns:host{}.example.org", i));
            assert!(seen.insert(fp), "collision at host{}", i);
        }
    }

    #[test]
    fn test_display_is_fixed_width_hex() {
        assert_eq!(Fingerprint::from_u64(0xab).to_string(), "00000000000000ab");
    }
}
