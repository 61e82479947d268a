use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic string hash shared by ring placement and key lookup.
/// Both sides must agree on the function or routing falls apart, so it
/// lives here rather than inline at the call sites.
pub fn hash64(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
