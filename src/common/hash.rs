//! Hashing utilities for kvecs
//!
//! Ring positions are the first 128 bits of BLAKE3, rendered as 32 uppercase
//! hex characters so that lexicographic order on the string equals numeric
//! order on the digest.

/// Number of digest bytes kept for a ring position.
pub const HASH_BYTES: usize = 16;

/// Smallest possible ring position.
pub const MIN_HASH: &str = "00000000000000000000000000000000";

/// Largest possible ring position.
pub const MAX_HASH: &str = "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF";

/// Hash arbitrary bytes to a ring position.
pub fn ring_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hex::encode_upper(&hash.as_bytes()[..HASH_BYTES])
}

/// Ring position of a node, derived from `"<host>:<port>"`.
pub fn node_hash(host: &str, port: u16) -> String {
    ring_hash(format!("{}:{}", host, port).as_bytes())
}

/// Ring position of a key.
pub fn key_hash(key: &str) -> String {
    ring_hash(key.as_bytes())
}

/// Is `point` inside the half-open range `[start, end)`, wrapping at the
/// maximum back to the minimum?
///
/// `start == end` denotes the full ring (a single owner).
pub fn in_range(point: &str, start: &str, end: &str) -> bool {
    match start.cmp(end) {
        std::cmp::Ordering::Less => start <= point && point < end,
        std::cmp::Ordering::Greater => point >= start || point < end,
        std::cmp::Ordering::Equal => true,
    }
}
