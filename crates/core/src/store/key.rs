//! Storage key derivation.
//!
//! Keys are 63-bit so they fit SQLite's signed `INTEGER PRIMARY KEY`:
//!
//! - bit 63: always zero
//! - bits 62..56: 7-bit checksum of the hostname bytes
//! - bits 55..0: 64-bit FNV-1a of the full URL, folded to 56 bits
//!
//! Collisions are possible and accepted.

use std::fmt;

use url::Url;

const MASK_56: u64 = 0x00ff_ffff_ffff_ffff;
const CHECKSUM_MASK: u64 = 127 << 56;

/// Identifier for a URL in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(u64);

impl StorageKey {
    pub fn from_url(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default();
        let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
        Self::derive(host, url.as_str())
    }

    /// Key for a raw URL string without parsing it.
    ///
    /// The hostname is the authority after `http://` or `https://` without
    /// userinfo, port or IPv6 brackets, so a serialized [`Url`] gets the same
    /// key as [`StorageKey::from_url`]. Any other string has an empty hostname.
    pub fn from_url_str(url: &str) -> Self {
        Self::derive(raw_hostname(url), url)
    }

    fn derive(hostname: &str, url: &str) -> Self {
        let sum = hostname.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
        let checksum = (u64::from(sum) << 56) & CHECKSUM_MASK;

        let hash = fnv1a64(url.as_bytes());
        let folded = (hash >> 56) ^ (hash & MASK_56);
        Self(checksum | folded)
    }

    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Lossless: the top bit is always clear.
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }
}

impl From<StorageKey> for i64 {
    fn from(key: StorageKey) -> Self {
        key.as_i64()
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn raw_hostname(url: &str) -> &str {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://")).unwrap_or_default();
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    match host.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or_default(),
        None => host.split(':').next().unwrap_or_default(),
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    bytes.iter().fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}
