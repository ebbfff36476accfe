//! The in-memory keydir: `key -> latest (segment_id, offset, size, timestamp)`.

use std::collections::HashMap;

/// Location of a record's latest version within the segment log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub segment_id: u64,
    pub offset: u64,
    pub size: u32,
    pub timestamp: u64,
}

/// Total order used to resolve conflicting observations of the same key:
/// newest timestamp wins, ties broken by larger segment id, then by larger
/// offset. Independent of file-system traversal order.
fn rank(loc: &Location) -> (u64, u64, u64) {
    (loc.timestamp, loc.segment_id, loc.offset)
}

#[derive(Debug, Default)]
pub struct Keydir {
    map: HashMap<String, Location>,
}

impl Keydir {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Inserts or overwrites an entry. If an existing entry outranks the
    /// candidate (see `rank`), the update is silently dropped — this only
    /// matters during recovery, when records may be visited out of order.
    pub fn put(&mut self, key: String, loc: Location) {
        match self.map.get(&key) {
            Some(existing) if rank(existing) > rank(&loc) => {}
            _ => {
                self.map.insert(key, loc);
            }
        }
    }

    /// Removes the entry for `key`, applying the same conflict-resolution
    /// rule: a tombstone observed at a given location only removes the
    /// entry if nothing newer has already removed or overwritten it.
    pub fn delete(&mut self, key: &str, at: Location) {
        if let Some(existing) = self.map.get(key) {
            if rank(existing) > rank(&at) {
                return;
            }
        }
        self.map.remove(key);
    }

    pub fn get(&self, key: &str) -> Option<Location> {
        self.map.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(segment_id: u64, offset: u64, timestamp: u64) -> Location {
        Location { segment_id, offset, size: 10, timestamp }
    }

    #[test]
    fn put_then_get() {
        let mut kd = Keydir::new();
        kd.put("a".into(), loc(0, 0, 1));
        assert_eq!(kd.get("a"), Some(loc(0, 0, 1)));
    }

    #[test]
    fn delete_is_idempotent_on_missing_key() {
        let mut kd = Keydir::new();
        kd.delete("missing", loc(0, 0, 1));
        assert_eq!(kd.get("missing"), None);
    }

    #[test]
    fn newer_timestamp_wins_regardless_of_visit_order() {
        let mut kd = Keydir::new();
        kd.put("a".into(), loc(0, 0, 10));
        kd.put("a".into(), loc(1, 0, 5)); // older, visited second
        assert_eq!(kd.get("a"), Some(loc(0, 0, 10)));
    }

    #[test]
    fn tie_broken_by_larger_segment_id() {
        let mut kd = Keydir::new();
        kd.put("a".into(), loc(0, 0, 10));
        kd.put("a".into(), loc(1, 0, 10));
        assert_eq!(kd.get("a"), Some(loc(1, 0, 10)));
    }

    #[test]
    fn tie_broken_by_larger_offset_when_segment_equal() {
        let mut kd = Keydir::new();
        kd.put("a".into(), loc(0, 5, 10));
        kd.put("a".into(), loc(0, 20, 10));
        assert_eq!(kd.get("a"), Some(loc(0, 20, 10)));
    }

    #[test]
    fn stale_delete_does_not_remove_newer_put() {
        let mut kd = Keydir::new();
        kd.put("a".into(), loc(2, 0, 100));
        kd.delete("a", loc(1, 0, 50)); // older tombstone observed later during recovery
        assert_eq!(kd.get("a"), Some(loc(2, 0, 100)));
    }

    #[test]
    fn keys_snapshot_is_unordered_but_complete() {
        let mut kd = Keydir::new();
        kd.put("a".into(), loc(0, 0, 1));
        kd.put("b".into(), loc(0, 1, 2));
        let mut keys: Vec<_> = kd.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
