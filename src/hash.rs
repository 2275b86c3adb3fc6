use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::data::RecordingKey;

pub fn stable_hash_with(f: impl FnOnce(&mut DefaultHasher)) -> u64 {
    let mut hasher = DefaultHasher::new();
    f(&mut hasher);
    hasher.finish()
}

pub fn stable_hash_key(seed: u64, key: &RecordingKey) -> u64 {
    stable_hash_with(|hasher| {
        seed.hash(hasher);
        key.subject.hash(hasher);
        key.session.hash(hasher);
        key.site.hash(hasher);
    })
}

/// Map `(seed, key)` to a reproducible value in `[0, 1)`.
pub fn unit_interval(seed: u64, key: &RecordingKey) -> f64 {
    (stable_hash_key(seed, key) >> 11) as f64 / (1u64 << 53) as f64
}
