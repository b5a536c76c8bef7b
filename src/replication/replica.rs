use super::clock::VectorClock;
use super::log::{Column, EventLog};
use crate::error::KvError;
use crate::time::WallClock;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Mutable per-replica state, guarded by one read/write lock.
struct ReplicaState {
    peers: Vec<String>,
    log: EventLog,
    /// Running pointwise maximum over the contexts of every event in the
    /// log plus every client context ever accepted.
    maxcc: VectorClock,
    /// Per-peer cursor: events[0..acked[p]] are known to be held by p.
    acked: HashMap<String, usize>,
}

impl ReplicaState {
    #[cfg(debug_assertions)]
    fn verify_invariants(&self, name: &str) {
        // Invariant 1: this replica holds every column in its own log.
        for col in self.log.iter() {
            debug_assert!(
                col.clock.replicated.contains(name),
                "Invariant violated: column {} not replicated to its own holder",
                col.clock.id
            );
            // Invariant 2: maxcc dominates every event context.
            debug_assert!(
                col.clock.context.at_most(&self.maxcc),
                "Invariant violated: maxcc is behind column {}",
                col.clock.id
            );
        }
        // Invariant 3: cursors never pass the end of the log.
        for (peer, &cursor) in &self.acked {
            debug_assert!(
                cursor <= self.log.len(),
                "Invariant violated: acked[{:?}] beyond the log",
                peer
            );
        }
        self.log.verify_invariants();
        self.maxcc.verify_invariants();
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn verify_invariants(&self, _name: &str) {}

    /// Advance the acknowledgement cursor for a peer by scanning forward
    /// while the peer appears in each event's replicated set.
    fn advance_acked(&mut self, peer: &str) -> usize {
        let cursor = self.acked.entry(peer.to_string()).or_insert(0);
        while *cursor < self.log.len() {
            let col = self.log.get(*cursor).expect("cursor within log");
            if !col.clock.replicated.contains(peer) {
                break;
            }
            *cursor += 1;
        }
        *cursor
    }
}

/// The replica engine: causally gated reads and writes over an
/// append-only event log, plus log playback for gossip.
pub struct Replica {
    name: String,
    clock: Arc<dyn WallClock>,
    state: RwLock<ReplicaState>,
}

impl Replica {
    pub fn new(name: impl Into<String>, clock: Arc<dyn WallClock>) -> Self {
        Replica {
            name: name.into(),
            clock,
            state: RwLock::new(ReplicaState {
                peers: Vec::new(),
                log: EventLog::new(),
                maxcc: VectorClock::new(),
                acked: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read a key on behalf of a client carrying `ctx`. Refused when this
    /// replica has not seen everything the client has witnessed.
    pub fn read(&self, key: &str, ctx: &VectorClock) -> Result<(String, VectorClock), KvError> {
        let state = self.state.read();
        if state.maxcc.behind(ctx) {
            return Err(KvError::ContextUnsatisfied);
        }
        match state.log.lookup(key) {
            Some(col) => Ok((col.value.clone(), col.clock.context.take_max(ctx))),
            None => Err(KvError::NotFound {
                key: key.to_string(),
                context: ctx.clone(),
            }),
        }
    }

    /// Write a key, minting a new event. Rewrites are allowed.
    pub fn write(&self, key: &str, value: &str, ctx: &VectorClock) -> Result<VectorClock, KvError> {
        self.update(key, value, ctx, true)
    }

    /// Write a key, refusing to overwrite an existing one.
    pub fn create(
        &self,
        key: &str,
        value: &str,
        ctx: &VectorClock,
    ) -> Result<VectorClock, KvError> {
        self.update(key, value, ctx, false)
    }

    fn update(
        &self,
        key: &str,
        value: &str,
        ctx: &VectorClock,
        allow_rewrite: bool,
    ) -> Result<VectorClock, KvError> {
        let mut state = self.state.write();
        if state.maxcc.behind(ctx) {
            return Err(KvError::ContextUnsatisfied);
        }

        if let Some(existing) = state.log.lookup(key) {
            if !allow_rewrite {
                return Err(KvError::AlreadyExists {
                    key: existing.key.clone(),
                    value: existing.value.clone(),
                    context: existing.clock.context.clone(),
                });
            }
            if existing.value == value {
                // Identical payload: acknowledge without minting an event.
                return Ok(ctx.take_max(&existing.clock.context));
            }
        }

        state.maxcc = state.maxcc.take_max(ctx);
        state.maxcc.mark(&self.name);
        let column = Column {
            key: key.to_string(),
            value: value.to_string(),
            clock: super::clock::CausalClock::mint(&self.name, state.maxcc.clone()),
            timestamp: self.clock.now_millis(),
        };
        state.log.append(column);
        state.verify_invariants(&self.name);
        Ok(state.maxcc.clone())
    }

    /// Play a batch of columns received from `from` into the log,
    /// returning the accepted and merged columns for the sender's ack.
    pub fn play_log(&self, from: &str, columns: Vec<Column>) -> Vec<Column> {
        let mut state = self.state.write();
        self.play_log_locked(&mut state, from, columns)
    }

    /// One round of a gossip exchange on the receiving side: play the
    /// incoming columns, then form the echo push of our own events not
    /// yet acknowledged by the sender plus the playback replies.
    ///
    /// Our own events go first. They are in log order, so the sender sees
    /// each column's dependencies before the column; a merged reply can
    /// reference events the sender does not hold yet, and must not raise
    /// the sender's frontier before those events arrive.
    pub fn exchange(&self, from: &str, columns: Vec<Column>) -> Vec<Column> {
        let mut state = self.state.write();
        let replies = self.play_log_locked(&mut state, from, columns);
        let cursor = state.advance_acked(from);
        let mut echo: Vec<Column> = state.log.tail_from(cursor).to_vec();
        let shipped: Vec<Uuid> = echo.iter().map(|col| col.clock.id).collect();
        echo.extend(
            replies
                .into_iter()
                .filter(|col| !shipped.contains(&col.clock.id)),
        );
        echo
    }

    fn play_log_locked(
        &self,
        state: &mut ReplicaState,
        from: &str,
        columns: Vec<Column>,
    ) -> Vec<Column> {
        let mut replies = Vec::new();
        for mut col in columns {
            // Already known: merge replication info and echo it back so
            // the sender learns the broader replication.
            if let Some(idx) = state.log.index_of(&col.clock.id) {
                let merged = {
                    let stored = state.log.get_mut(idx).expect("indexed column");
                    stored.clock.merge_from(&col.clock).then(|| stored.clone())
                };
                if let Some(stored) = merged {
                    state.maxcc = state.maxcc.take_max(&stored.clock.context);
                    replies.push(stored);
                }
                continue;
            }

            let concurrent = state.maxcc.concurrent(&col.clock.context);
            let happens_after = state
                .maxcc
                .ahead_one_n(&col.clock.context, col.clock.replicated.len());
            // A column the frontier already dominates is old news whose
            // payload we lack; taking it adds no coverage. Only a column
            // strictly ahead with a non-unit gap has dependencies we have
            // not observed.
            let dominated = state.maxcc.after(&col.clock.context);
            if !concurrent && !happens_after && !dominated {
                debug!(
                    replica = %self.name,
                    from = %from,
                    event = %col.clock.id,
                    "gossip column out of causal order, stopping playback"
                );
                break;
            }

            // Writes racing on one key fall to the wall clock; the losing
            // column still enters the log (the event counts) but its
            // payload stays invisible. Local wins ties.
            let visible = match state.log.lookup(&col.key) {
                None => true,
                Some(existing) => happens_after || existing.timestamp < col.timestamp,
            };

            col.clock.replicated.insert(self.name.clone());
            state.maxcc = state.maxcc.take_max(&col.clock.context);
            state.maxcc.mark(&self.name);
            col.clock.context = state.maxcc.clone();
            state.log.append_with_visibility(col.clone(), visible);
            replies.push(col);
        }
        state.verify_invariants(&self.name);
        replies
    }

    /// Advance the peer's cursor, then collect every event past it.
    /// Returns None when there is nothing to push.
    pub fn collect_push(&self, peer: &str) -> Option<Vec<Column>> {
        let mut state = self.state.write();
        let cursor = state.advance_acked(peer);
        let payload: Vec<Column> = state.log.tail_from(cursor).to_vec();
        if payload.is_empty() {
            None
        } else {
            Some(payload)
        }
    }

    pub fn set_peers(&self, peers: Vec<String>) {
        let mut state = self.state.write();
        state.peers = peers;
    }

    /// Snapshot of the peer list, taken under the lock so a concurrent
    /// view change cannot tear it.
    pub fn peers_snapshot(&self) -> Vec<String> {
        self.state.read().peers.clone()
    }

    /// Snapshot of this replica's causal frontier.
    pub fn maxcc_snapshot(&self) -> VectorClock {
        self.state.read().maxcc.clone()
    }

    /// Snapshot of the visible key-value map.
    pub fn visible_map(&self) -> HashMap<String, String> {
        self.state.read().log.visible_map()
    }

    /// Number of events in the log.
    pub fn log_len(&self) -> usize {
        self.state.read().log.len()
    }

    /// Clone of the whole event log, in append order.
    pub fn events_snapshot(&self) -> Vec<Column> {
        self.state.read().log.iter().cloned().collect()
    }
}
