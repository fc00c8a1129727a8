//! Slot Hasher (spec §4.1, component C1).
//!
//! Maps a key to a slot in `[0, 16383]` via CRC16/XMODEM mod 16384, honoring
//! the `{tag}` hash-tag convention so that multiple keys can be forced onto
//! the same slot.

use crc16::{State, XMODEM};

/// Number of slots in a Redis Cluster key space.
pub const SLOT_COUNT: u16 = 16384;

/// Compute the cluster slot for `key`.
///
/// If `key` contains a `{` followed later by a non-empty `}` substring, only
/// the bytes between them are hashed (the hash tag); otherwise the whole key
/// is hashed. An empty key hashes to slot 0.
pub fn slot_for_key(key: &[u8]) -> u16 {
    let hashed = hash_tag(key).unwrap_or(key);
    if hashed.is_empty() {
        return 0;
    }
    State::<XMODEM>::calculate(hashed) % SLOT_COUNT
}

/// Extract the `{...}` hash-tag substring from `key`, if one exists and is
/// non-empty.
fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|&b| b == b'{')?;
    let rest = &key[open + 1..];
    let close = rest.iter().position(|&b| b == b'}')?;
    if close == 0 {
        None
    } else {
        Some(&rest[..close])
    }
}
