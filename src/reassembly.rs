//! Bounded, TTL-evicting store for in-progress concatenated SMS.
//!
//! Grounded on the teacher's `state.rs` `TunnelStats` bounded-ring pattern,
//! adapted from a `VecDeque` ring to a `HashMap` keyed by `(sender,
//! reference)` with TTL-first-then-LRU eviction (spec §9).

use std::collections::HashMap;
use std::time::{Duration, Instant};

const MAX_RECORDS: usize = 100;
const TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub sender: String,
    pub reference: u16,
}

#[derive(Debug, Clone)]
struct ReassemblyRecord {
    total: u8,
    parts: HashMap<u8, String>,
    received_at: Instant,
}

/// Single-writer store (owned by `NewSmsHandler`); not `Sync`-shared.
pub struct ReassemblyStore {
    records: HashMap<ReassemblyKey, ReassemblyRecord>,
}

impl Default for ReassemblyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReassemblyStore {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Insert one chunk. Returns the concatenated content (ascending
    /// `part_number`) if this chunk completed the message, removing the
    /// record. Enforces the 100-record cap and 3600s TTL before insertion.
    pub fn insert(
        &mut self,
        sender: &str,
        reference: u16,
        total: u8,
        part_number: u8,
        content: String,
    ) -> Option<String> {
        self.evict_expired();

        let key = ReassemblyKey {
            sender: sender.to_string(),
            reference,
        };

        if !self.records.contains_key(&key) && self.records.len() >= MAX_RECORDS {
            self.evict_oldest();
        }

        let record = self.records.entry(key.clone()).or_insert_with(|| ReassemblyRecord {
            total,
            parts: HashMap::new(),
            received_at: Instant::now(),
        });
        record.parts.insert(part_number, content);

        if record.parts.len() >= record.total as usize {
            let record = self.records.remove(&key).expect("just inserted");
            let mut combined = String::new();
            for n in 1..=record.total {
                if let Some(chunk) = record.parts.get(&n) {
                    combined.push_str(chunk);
                }
            }
            Some(combined)
        } else {
            None
        }
    }

    fn evict_expired(&mut self) {
        let now = Instant::now();
        self.records
            .retain(|_, record| now.duration_since(record.received_at) < TTL);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self
            .records
            .iter()
            .min_by_key(|(_, r)| r.received_at)
            .map(|(k, _)| k.clone())
        {
            self.records.remove(&oldest_key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_in_any_insertion_order() {
        let mut store = ReassemblyStore::new();
        assert!(store
            .insert("sender", 42, 3, 1, "part1".to_string())
            .is_none());
        assert!(store
            .insert("sender", 42, 3, 3, "part3".to_string())
            .is_none());
        let combined = store.insert("sender", 42, 3, 2, "part2".to_string());
        assert_eq!(combined, Some("part1part2part3".to_string()));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn caps_at_100_records() {
        let mut store = ReassemblyStore::new();
        for reference in 0..101u16 {
            store.insert("sender", reference, 2, 1, "part1".to_string());
        }
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn distinct_senders_do_not_collide() {
        let mut store = ReassemblyStore::new();
        store.insert("alice", 1, 2, 1, "a1".to_string());
        store.insert("bob", 1, 2, 1, "b1".to_string());
        assert_eq!(store.len(), 2);
    }
}
