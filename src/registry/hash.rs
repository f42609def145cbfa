//! Label-set hashing.
//!
//! Two 64-bit hashes: a *names* hash (keys a vector — one per distinct label-name set under a
//! metric name) and a *values* hash (keys a concrete series within that vector).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hashes a sorted list of label names.
pub fn names_hash(sorted_names: &[String]) -> u64 {
    let mut h = DefaultHasher::new();
    for n in sorted_names {
        n.hash(&mut h);
        0u8.hash(&mut h); // separator
    }
    h.finish()
}

/// Hashes a sorted list of label names together with their values, in the same order.
///
/// Names are already guaranteed equal within a vector, so this alone is sufficient to dedupe a
/// series.
pub fn values_hash(sorted_names: &[String], values: &[String]) -> u64 {
    let mut h = DefaultHasher::new();
    for (n, v) in sorted_names.iter().zip(values) {
        n.hash(&mut h);
        0u8.hash(&mut h);
        v.hash(&mut h);
        0u8.hash(&mut h);
    }
    h.finish()
}
