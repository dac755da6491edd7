//! Named merge strategies for reconciling pushed data into widget stores.
//! Both are pure and idempotent: replaying the same batch changes nothing.

/// Items with a stable identity the strategies can key on.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Prepend incoming items whose key is not already present, newest first,
/// then truncate to `cap` dropping from the tail. Duplicate keys inside one
/// batch keep the first occurrence. A batch longer than `cap` is cut to its
/// first `cap` entries up front, so a replay drops the same overflow items
/// instead of rotating them in.
pub fn append_dedup_cap<T: Keyed + Clone>(current: &[T], incoming: &[T], cap: usize) -> Vec<T> {
    let mut merged: Vec<T> = Vec::with_capacity(current.len() + incoming.len().min(cap));
    for item in incoming.iter().take(cap) {
        if current.iter().any(|c| c.key() == item.key()) {
            continue;
        }
        if merged.iter().any(|m| m.key() == item.key()) {
            continue;
        }
        merged.push(item.clone());
    }
    merged.extend(current.iter().cloned());
    merged.truncate(cap);
    merged
}

/// Apply each update to the existing item sharing its key, leaving item
/// order untouched. Updates without a matching item are ignored, never
/// inserted; `apply` decides which fields an update replaces.
pub fn patch_by_key<T, U, F>(current: &[T], updates: &[U], apply: F) -> Vec<T>
where
    T: Keyed + Clone,
    U: Keyed,
    F: Fn(&mut T, &U),
{
    let mut next: Vec<T> = current.to_vec();
    for update in updates {
        if let Some(item) = next.iter_mut().find(|i| i.key() == update.key()) {
            apply(item, update);
        }
    }
    next
}
