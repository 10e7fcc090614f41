//! Util Module - Shared Utilities
//!
//! Utilities and helper functions used throughout zreloc.

pub mod alignment;
pub mod atomic;
pub mod attached;

pub use alignment::Alignment;
pub use atomic::AtomicUtils;
pub use attached::AttachedArray;

/// Integer mix used to spread clustered object indices over a hash table
///
/// Thomas Wang's 32-bit integer hash.
#[inline]
pub fn hash_u32(key: u32) -> u32 {
    let mut key = key;
    key = (!key).wrapping_add(key << 15);
    key ^= key >> 12;
    key = key.wrapping_add(key << 2);
    key ^= key >> 4;
    key = key.wrapping_mul(2057);
    key ^= key >> 16;
    key
}
