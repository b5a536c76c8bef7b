use super::clock::CausalClock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A single write event. Immutable once appended except for its clock,
/// whose replicated set grows and whose context rises via take_max.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Column {
    pub key: String,
    pub value: String,
    pub clock: CausalClock,
    /// Wall-clock instant, used only to break ties between concurrent
    /// writes on the same key.
    pub timestamp: u64,
}

/// Append-only per-replica event log with O(1) lookup by key and by
/// event id. Indices are stable: columns are never removed or reordered.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Column>,
    latest: HashMap<String, usize>,
    by_id: HashMap<Uuid, usize>,
}

impl EventLog {
    /// Verify all invariants hold for this log.
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        // Invariant 1: latest[k] points at a column for k.
        for (key, &idx) in &self.latest {
            debug_assert!(idx < self.events.len());
            debug_assert_eq!(
                &self.events[idx].key, key,
                "Invariant violated: latest[{:?}] points at a column for another key",
                key
            );
        }
        // Invariant 2: by_id agrees with the column at its index.
        for (id, &idx) in &self.by_id {
            debug_assert!(idx < self.events.len());
            debug_assert_eq!(
                &self.events[idx].clock.id, id,
                "Invariant violated: by_id[{}] points at a column for another event",
                id
            );
        }
        // Invariant 3: every column is indexed by id.
        debug_assert_eq!(self.by_id.len(), self.events.len());
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub fn verify_invariants(&self) {}

    pub fn new() -> Self {
        EventLog::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append a column, making it the visible value for its key.
    /// Returns the new column's index.
    pub fn append(&mut self, column: Column) -> usize {
        self.append_with_visibility(column, true)
    }

    /// Append a column. When `visible` is false the column enters the log
    /// and the id index but does not become the latest value for its key
    /// (it lost a concurrent-write tie-break).
    pub fn append_with_visibility(&mut self, column: Column, visible: bool) -> usize {
        let idx = self.events.len();
        if visible {
            self.latest.insert(column.key.clone(), idx);
        }
        let previous = self.by_id.insert(column.clock.id, idx);
        debug_assert!(previous.is_none(), "event id collision: {}", column.clock.id);
        self.events.push(column);
        self.verify_invariants();
        idx
    }

    /// Latest visible column for a key.
    pub fn lookup(&self, key: &str) -> Option<&Column> {
        self.latest.get(key).map(|&idx| &self.events[idx])
    }

    pub fn lookup_id(&self, id: &Uuid) -> Option<&Column> {
        self.by_id.get(id).map(|&idx| &self.events[idx])
    }

    pub fn index_of(&self, id: &Uuid) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn get(&self, idx: usize) -> Option<&Column> {
        self.events.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Column> {
        self.events.get_mut(idx)
    }

    /// All columns from index `i` onward, in append order.
    pub fn tail_from(&self, i: usize) -> &[Column] {
        &self.events[i.min(self.events.len())..]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.events.iter()
    }

    /// Snapshot of the visible key-value map.
    pub fn visible_map(&self) -> HashMap<String, String> {
        self.latest
            .iter()
            .map(|(key, &idx)| (key.clone(), self.events[idx].value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::clock::{CausalClock, VectorClock};
    use super::*;

    fn column(node: &str, key: &str, value: &str, timestamp: u64) -> Column {
        let mut context = VectorClock::new();
        context.mark(node);
        Column {
            key: key.to_string(),
            value: value.to_string(),
            clock: CausalClock::mint(node, context),
            timestamp,
        }
    }

    #[test]
    fn test_append_and_lookup() {
        let mut log = EventLog::new();
        let col = column("a", "x", "1", 10);
        let id = col.clock.id;
        let idx = log.append(col);
        assert_eq!(idx, 0);
        assert_eq!(log.lookup("x").unwrap().value, "1");
        assert_eq!(log.lookup_id(&id).unwrap().value, "1");
        assert!(log.lookup("y").is_none());
    }

    #[test]
    fn test_latest_follows_appends() {
        let mut log = EventLog::new();
        log.append(column("a", "x", "1", 10));
        log.append(column("a", "x", "2", 11));
        assert_eq!(log.lookup("x").unwrap().value, "2");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_hidden_append_keeps_latest() {
        let mut log = EventLog::new();
        log.append(column("a", "x", "9", 20));
        let loser = column("b", "x", "1", 10);
        let loser_id = loser.clock.id;
        log.append_with_visibility(loser, false);
        // The losing column is in the log but not visible.
        assert_eq!(log.lookup("x").unwrap().value, "9");
        assert_eq!(log.lookup_id(&loser_id).unwrap().value, "1");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_tail_from() {
        let mut log = EventLog::new();
        log.append(column("a", "x", "1", 1));
        log.append(column("a", "y", "2", 2));
        log.append(column("a", "z", "3", 3));
        let tail = log.tail_from(1);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].key, "y");
        assert!(log.tail_from(10).is_empty());
    }

    #[test]
    fn test_indices_are_stable() {
        let mut log = EventLog::new();
        let first = column("a", "x", "1", 1);
        let first_id = first.clock.id;
        log.append(first);
        for i in 0..10 {
            log.append(column("a", "x", &i.to_string(), 2 + i));
        }
        assert_eq!(log.index_of(&first_id), Some(0));
        assert_eq!(log.get(0).unwrap().value, "1");
    }

    #[test]
    fn test_column_wire_encoding() {
        let col = column("a", "x", "1", 42);
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["Key"], "x");
        assert_eq!(json["Value"], "1");
        assert_eq!(json["Timestamp"], 42);
        assert!(json["Clock"]["ID"].is_string());
    }
}
