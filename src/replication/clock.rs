use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Vector clock: a pointwise mapping from node name to counter. Absent
/// entries read as zero, and zero entries are never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: HashMap<String, u64>,
}

impl VectorClock {
    /// Verify all invariants hold for this clock.
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        // Invariant 1: no zero entries are stored (absent means zero).
        for (node, &count) in &self.counters {
            debug_assert!(
                count > 0,
                "Invariant violated: node {:?} has zero count (should be absent)",
                node
            );
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub fn verify_invariants(&self) {}

    pub fn new() -> Self {
        VectorClock {
            counters: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn get(&self, node: &str) -> u64 {
        self.counters.get(node).copied().unwrap_or(0)
    }

    /// Advance this node's counter by one.
    pub fn mark(&mut self, node: &str) {
        let counter = self.counters.entry(node.to_string()).or_insert(0);
        *counter += 1;
    }

    /// Pointwise maximum of the two clocks.
    pub fn take_max(&self, other: &Self) -> Self {
        let mut merged = self.counters.clone();
        for (node, &count) in &other.counters {
            let entry = merged.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
        merged.retain(|_, count| *count > 0);
        VectorClock { counters: merged }
    }

    /// True if every entry of self is at most the matching entry of other.
    pub fn at_most(&self, other: &Self) -> bool {
        self.counters
            .iter()
            .all(|(node, &count)| count <= other.get(node))
    }

    /// True if self is behind other in any entry. Carries no ordering by
    /// itself: unrelated clocks can each be behind the other.
    pub fn behind(&self, other: &Self) -> bool {
        other
            .counters
            .iter()
            .any(|(node, &count)| self.get(node) < count)
    }

    /// Strict happens-before: self <= other pointwise with at least one
    /// strict entry. Not reflexive.
    pub fn before(&self, other: &Self) -> bool {
        self.at_most(other) && self.behind(other)
    }

    /// Strict happens-after.
    pub fn after(&self, other: &Self) -> bool {
        other.before(self)
    }

    /// No causal relationship in either direction. Equal clocks count as
    /// concurrent: compatible, not new.
    pub fn concurrent(&self, other: &Self) -> bool {
        !self.before(other) && !self.after(other)
    }

    /// True if other dominates self pointwise and differs in exactly `n`
    /// entries, each by one. A gossip shipment of an event held by `n`
    /// nodes advances the receiver's frontier by exactly this shape.
    pub fn ahead_one_n(&self, other: &Self, n: usize) -> bool {
        let mut bumped = 0;
        for (node, &theirs) in &other.counters {
            let ours = self.get(node);
            if theirs < ours || theirs > ours + 1 {
                return false;
            }
            if theirs == ours + 1 {
                bumped += 1;
            }
        }
        // Entries present only on our side must not exceed the other
        // clock, which reads them as zero.
        for (node, &ours) in &self.counters {
            if ours > other.get(node) {
                return false;
            }
        }
        bumped == n
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.counters
            .iter()
            .all(|(node, &count)| other.get(node) == count)
            && other
                .counters
                .iter()
                .all(|(node, &count)| self.get(node) == count)
    }
}

impl Eq for VectorClock {}

/// Empty-struct placeholder for wire maps whose values are ignored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Nothing {}

/// The replicated set travels as a JSON object whose values are ignored.
mod replicated_set {
    use super::Nothing;
    use serde::de::IgnoredAny;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::{HashMap, HashSet};

    pub fn serialize<S: Serializer>(set: &HashSet<String>, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(set.len()))?;
        for node in set {
            map.serialize_entry(node, &Nothing {})?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HashSet<String>, D::Error> {
        let entries: HashMap<String, IgnoredAny> = HashMap::deserialize(d)?;
        Ok(entries.into_keys().collect())
    }
}

/// Causal metadata minted with every event.
///
/// `id` is globally unique; `context` is the minting replica's frontier at
/// write time and only ever rises via `take_max`; `replicated` is the set
/// of node names known to hold the event and only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CausalClock {
    #[serde(rename = "ID")]
    pub id: Uuid,
    pub context: VectorClock,
    #[serde(with = "replicated_set")]
    pub replicated: HashSet<String>,
}

impl CausalClock {
    /// Mint a fresh clock for an event created on `node`.
    pub fn mint(node: &str, context: VectorClock) -> Self {
        let mut replicated = HashSet::new();
        replicated.insert(node.to_string());
        CausalClock {
            id: Uuid::new_v4(),
            context,
            replicated,
        }
    }

    /// Merge another clock for the same event: pointwise max of contexts,
    /// union of replicated sets. Returns true if anything changed.
    pub fn merge_from(&mut self, other: &CausalClock) -> bool {
        debug_assert_eq!(self.id, other.id, "merge of clocks for distinct events");
        let mut changed = false;
        if self.context != other.context {
            let merged = self.context.take_max(&other.context);
            if merged != self.context {
                self.context = merged;
                changed = true;
            }
        }
        for node in &other.replicated {
            if self.replicated.insert(node.clone()) {
                changed = true;
            }
        }
        changed
    }
}
