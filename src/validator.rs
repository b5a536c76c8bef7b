//! Offline causal-history validator.
//!
//! Consumes an ordered trace of client-visible operations and decides
//! whether a causally consistent store could have produced it. Each
//! client's observations are tracked as cursors into a happens-before
//! forest; a read is explainable if some causally compatible node holds
//! the observed value.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

/// A client-visible write. Failed writes stay in the trace for context
/// but are ignored by validation.
#[derive(Debug, Clone)]
pub struct TraceWrite {
    pub client: String,
    pub node: String,
    pub key: String,
    pub value: String,
    pub failed: bool,
}

/// A client-visible read result. `unavailable` marks a refused read
/// (the store is always allowed to be unavailable).
#[derive(Debug, Clone)]
pub struct TraceRead {
    pub client: String,
    pub node: String,
    pub key: String,
    pub value: Option<String>,
    pub not_found: bool,
    pub unavailable: bool,
}

#[derive(Debug, Clone)]
pub enum TraceAction {
    Write(TraceWrite),
    Read(TraceRead),
}

/// A read that no causal history can explain.
#[derive(Debug, Clone)]
pub struct CausalError {
    pub client: String,
    pub key: String,
    pub value: Option<String>,
    pub index: usize,
}

impl fmt::Display for CausalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cannot read {}={} at index {}",
            self.client,
            self.key,
            self.value.as_deref().unwrap_or("notfound"),
            self.index
        )
    }
}

impl std::error::Error for CausalError {}

/// Handle into the arena.
type NodeId = usize;

#[derive(Debug)]
struct HbNode {
    key: String,
    value: String,
    before: Vec<NodeId>,
    after: Vec<NodeId>,
}

#[derive(Debug, Default)]
struct Forest {
    nodes: Vec<HbNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Before,
    After,
}

impl Forest {
    fn push(&mut self, key: &str, value: &str) -> NodeId {
        self.nodes.push(HbNode {
            key: key.to_string(),
            value: value.to_string(),
            before: Vec::new(),
            after: Vec::new(),
        });
        self.nodes.len() - 1
    }

    fn link(&mut self, earlier: NodeId, later: NodeId) {
        self.nodes[later].before.push(earlier);
        self.nodes[earlier].after.push(later);
    }

    fn neighbors(&self, id: NodeId, direction: Direction) -> &[NodeId] {
        match direction {
            Direction::Before => &self.nodes[id].before,
            Direction::After => &self.nodes[id].after,
        }
    }

    /// All nodes for `key` reachable from `start` in `direction`.
    /// Searching backward never traverses past a match: a match at one
    /// depth must not be covered by an older write behind it. Forward
    /// searches continue past matches.
    fn search_key(&self, key: &str, start: NodeId, direction: Direction) -> Vec<NodeId> {
        let mut matches = Vec::new();
        let mut queue = VecDeque::from([start]);
        let mut queued: HashSet<NodeId> = HashSet::from([start]);
        while let Some(current) = queue.pop_front() {
            let is_match = self.nodes[current].key == key;
            if is_match {
                matches.push(current);
                if direction == Direction::Before {
                    continue;
                }
            }
            for &next in self.neighbors(current, direction) {
                if queued.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        matches
    }

    /// Everything reachable from `start` in `direction`, including start.
    fn closure(&self, start: NodeId, direction: Direction) -> HashSet<NodeId> {
        let mut queue = VecDeque::from([start]);
        let mut seen: HashSet<NodeId> = HashSet::from([start]);
        while let Some(current) = queue.pop_front() {
            for &next in self.neighbors(current, direction) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Causally related: one is an ancestor of the other.
    fn related(&self, a: NodeId, b: NodeId) -> bool {
        self.closure(a, Direction::Before).contains(&b)
            || self.closure(a, Direction::After).contains(&b)
    }

    /// Find a `(key, value)` node under `root` causally unrelated to
    /// every node in `unrelated` — an observation the client could have
    /// picked up independently of its history so far.
    fn search_unrelated(
        &self,
        key: &str,
        value: &str,
        root: NodeId,
        unrelated: &[NodeId],
    ) -> Option<NodeId> {
        let mut queue = VecDeque::from([root]);
        let mut queued: HashSet<NodeId> = HashSet::from([root]);
        while let Some(current) = queue.pop_front() {
            let node = &self.nodes[current];
            if node.key == key
                && node.value == value
                && unrelated.iter().all(|&other| !self.related(current, other))
            {
                return Some(current);
            }
            for &next in self.neighbors(current, Direction::After) {
                if queued.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        None
    }
}

/// Validate an ordered trace of writes and read results.
pub fn validate_causality(actions: &[TraceAction]) -> Result<(), CausalError> {
    let mut forest = Forest::default();
    // First write of a client with no history roots its tree.
    let mut roots: BTreeMap<String, NodeId> = BTreeMap::new();
    let mut cursors: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();

    for (index, action) in actions.iter().enumerate() {
        match action {
            TraceAction::Write(write) => {
                if write.failed {
                    continue;
                }
                let node = forest.push(&write.key, &write.value);
                match cursors.get(&write.client) {
                    None => {
                        roots.insert(write.client.clone(), node);
                    }
                    Some(current) => {
                        for &cursor in current {
                            forest.link(cursor, node);
                        }
                    }
                }
                // Prior cursors are all causal precursors of the write.
                cursors.insert(write.client.clone(), vec![node]);
            }
            TraceAction::Read(read) => {
                if read.unavailable {
                    continue;
                }
                explain_read(&forest, &roots, &mut cursors, read).map_err(|_| CausalError {
                    client: read.client.clone(),
                    key: read.key.clone(),
                    value: read.value.clone(),
                    index,
                })?;
                // Forward progress may have added a cursor; the forest
                // itself never changes on reads.
            }
        }
    }
    Ok(())
}

struct Unexplained;

fn explain_read(
    forest: &Forest,
    roots: &BTreeMap<String, NodeId>,
    cursors: &mut BTreeMap<String, Vec<NodeId>>,
    read: &TraceRead,
) -> Result<(), Unexplained> {
    // Work on a snapshot: a client with no history must not gain an
    // entry unless this read actually establishes a cursor, since its
    // first write only roots a tree while the cursor map has no entry.
    let snapshot: Vec<NodeId> = cursors.get(&read.client).cloned().unwrap_or_default();
    let mut considered = 0;

    for &cursor in &snapshot {
        // A match in the cursor's past explains the read outright.
        let past = forest.search_key(&read.key, cursor, Direction::Before);
        if let Some(value) = &read.value {
            if past
                .iter()
                .any(|&candidate| &forest.nodes[candidate].value == value)
            {
                return Ok(());
            }
        }
        considered += past.len();

        // A match in the future fast-forwards the cursor.
        let future = forest.search_key(&read.key, cursor, Direction::After);
        if let Some(value) = &read.value {
            if let Some(&found) = future
                .iter()
                .find(|&&candidate| &forest.nodes[candidate].value == value)
            {
                add_cursor(forest, cursors.entry(read.client.clone()).or_default(), found);
                return Ok(());
            }
        }
        considered += future.len();
    }

    // A miss is fine as long as no write to the key precedes the client.
    if read.not_found && considered == 0 {
        return Ok(());
    }

    // Look for an independent observation in other clients' histories.
    if let Some(value) = &read.value {
        for &root in roots.values() {
            if let Some(found) = forest.search_unrelated(&read.key, value, root, &snapshot) {
                add_cursor(forest, cursors.entry(read.client.clone()).or_default(), found);
                return Ok(());
            }
        }
    }

    Err(Unexplained)
}

/// Add a cursor, then prune every cursor that happens-before it.
fn add_cursor(forest: &Forest, cursors: &mut Vec<NodeId>, node: NodeId) {
    if !cursors.contains(&node) {
        cursors.push(node);
    }
    let ancestors = forest.closure(node, Direction::Before);
    cursors.retain(|&cursor| cursor == node || !ancestors.contains(&cursor));
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse "alice to a: x=1" into a write. The value "error" marks a
    /// write that did not take effect.
    fn w(s: &str) -> TraceAction {
        let (client, rest) = s.split_once(" to ").expect("write syntax");
        let (node, kv) = rest.split_once(": ").expect("write syntax");
        let (key, value) = kv.split_once('=').expect("write syntax");
        TraceAction::Write(TraceWrite {
            client: client.to_string(),
            node: node.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            failed: value == "error",
        })
    }

    /// Parse "alice from a: x=1" into a read result; "notfound" and
    /// "error" take their special meanings.
    fn r(s: &str) -> TraceAction {
        let (client, rest) = s.split_once(" from ").expect("read syntax");
        let (node, kv) = rest.split_once(": ").expect("read syntax");
        let (key, value) = kv.split_once('=').expect("read syntax");
        TraceAction::Read(TraceRead {
            client: client.to_string(),
            node: node.to_string(),
            key: key.to_string(),
            value: match value {
                "notfound" | "error" => None,
                v => Some(v.to_string()),
            },
            not_found: value == "notfound",
            unavailable: value == "error",
        })
    }

    fn check(name: &str, actions: &[TraceAction], want_valid: bool) {
        let result = validate_causality(actions);
        assert_eq!(
            result.is_ok(),
            want_valid,
            "{}: got {:?}, wanted valid={}",
            name,
            result,
            want_valid
        );
    }

    #[test]
    fn test_one_replica_one_read() {
        check(
            "one replica, one read",
            &[w("alice to a: x=1"), r("alice from a: x=1")],
            true,
        );
    }

    #[test]
    fn test_invalid_read() {
        check(
            "one replica, invalid read",
            &[w("alice to a: x=1"), r("alice from a: x=2")],
            false,
        );
    }

    #[test]
    fn test_unordered_read() {
        check(
            "unordered read",
            &[
                w("alice to a: x=true"),
                w("bob to b: x=false"),
                r("alice from a: x=false"),
            ],
            true,
        );
    }

    #[test]
    fn test_time_reversal() {
        check(
            "time reversal",
            &[
                w("alice to a: x=1"),
                w("alice to a: x=2"),
                r("alice from a: x=2"),
                r("alice from a: x=1"),
            ],
            false,
        );
    }

    #[test]
    fn test_two_nodes_one_writer() {
        check(
            "two nodes, one writer",
            &[
                w("alice to a: X=x"),
                w("alice to b: Y=y"),
                r("bob from b: Y=y"),
                w("bob to a: Z=z"),
            ],
            true,
        );
    }

    #[test]
    fn test_collaboration() {
        check(
            "collab",
            &[
                w("alice to a: X=x"),
                w("bob to b: Y=y"),
                r("alice from a: Y=y"),
                w("alice to a: Z=z"),
                r("bob from b: Z=z"),
                r("bob from a: X=x"),
            ],
            true,
        );
    }

    #[test]
    fn test_collaboration_invalid() {
        check(
            "collab invalid",
            &[
                w("alice to a: X=x"),
                w("bob to b: Y=y"),
                r("alice from a: Y=y"),
                w("alice to a: Z=z"),
                r("bob from b: Z=z"),
                r("bob from a: X=notfound"),
            ],
            false,
        );
    }

    #[test]
    fn test_unavailable_read_is_always_valid() {
        check(
            "valid error",
            &[w("alice to a: X=x"), r("bob from a: X=error")],
            true,
        );
    }

    #[test]
    fn test_notfound_without_history() {
        check("valid notfound", &[r("bob from a: X=notfound")], true);
    }

    #[test]
    fn test_notfound_after_own_write() {
        check(
            "invalid notfound",
            &[w("bob to a: X=1"), r("bob from a: X=notfound")],
            false,
        );
    }

    #[test]
    fn test_failed_write_allows_notfound() {
        check(
            "write failure, ok to 404",
            &[w("bob to a: X=error"), r("bob from a: X=notfound")],
            true,
        );
    }

    #[test]
    fn test_lagging_reader_misses_both() {
        check(
            "lagging reader misses both",
            &[
                w("c1 to n1: x=1"),
                r("c2 from n2: x=notfound"),
                w("c1 to n1: y=2"),
                r("c2 from n2: y=notfound"),
            ],
            true,
        );
    }

    #[test]
    fn test_lagging_reader_sees_only_later_write() {
        check(
            "lagging reader sees only the later write",
            &[
                w("c1 to n1: x=1"),
                r("c2 from n2: x=notfound"),
                w("c1 to n1: y=2"),
                r("c2 from n2: y=2"),
            ],
            true,
        );
    }

    #[test]
    fn test_reader_cannot_unsee_prefix() {
        check(
            "seeing the later write pins the earlier one",
            &[
                w("c1 to n1: x=1"),
                w("c1 to n1: y=2"),
                r("c2 from n2: y=2"),
                r("c2 from n2: x=notfound"),
            ],
            false,
        );
    }

    #[test]
    fn test_sequential_overwrite_visible() {
        check(
            "sequential overwrite",
            &[
                w("c1 to n1: x=1"),
                r("c2 from n1: x=1"),
                w("c1 to n1: x=2"),
                r("c2 from n1: x=2"),
            ],
            true,
        );
    }

    #[test]
    fn test_divergent_writes() {
        check(
            "divergent writes",
            &[
                w("c1 to n1: x=1"),
                r("c2 from n1: x=1"),
                w("c1 to n1: x=2"),
                w("c2 to n1: y=3"),
                r("c2 from n1: x=2"),
            ],
            true,
        );
    }

    #[test]
    fn test_divergent_writes_plus_concurrent_write() {
        check(
            "divergent writes plus concurrent write",
            &[
                w("c1 to n1: x=1"),
                r("c2 from n1: x=1"),
                w("c1 to n1: x=2"),
                w("c2 to n1: y=3"),
                w("c3 to n2: x=4"),
                r("c2 from n1: x=4"),
            ],
            true,
        );
    }
}
