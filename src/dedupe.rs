use std::collections::HashSet;
use std::hash::Hash;

/// Keep the first record per key, drop later ones, preserve order.
pub fn dedupe<T, K, F>(records: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::with_capacity(records.len());
    records.into_iter().filter(|r| seen.insert(key(r))).collect()
}
