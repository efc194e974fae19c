//! Dicts and transactional tracking
//!
//! [`InMemState`] is the in-memory implementation of the [`TxState`]
//! contract: base maps per dict, plus an operation log that doubles as the
//! read overlay while a transaction is open. [`Dict`] handles route every
//! access through the owning state so the overlay is always consulted.

use crate::error::{Result, StateError};
use crate::ops::Op;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use waggle_types::DictName;

/// Transactional status of the state layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxStatus {
    /// No transaction open; writes apply immediately.
    #[default]
    Closed,
    /// Writes accumulate in the op log until commit or abort.
    Open,
}

/// The transactional contract the per-bee transaction machine drives.
///
/// Implementations provide named partitioned key-value access with
/// begin/commit/abort hooks and yield the ordered log of minimal writes
/// since `begin_tx`, suitable for replication and replay.
pub trait TxState: Send + Sync {
    /// Start buffering writes. Fails if a transaction is already open.
    fn begin_tx(&self) -> Result<()>;

    /// Apply all buffered writes to the base maps and close the transaction.
    fn commit_tx(&self) -> Result<()>;

    /// Discard all buffered writes and close the transaction.
    fn abort_tx(&self) -> Result<()>;

    /// Current tracking status.
    fn tx_status(&self) -> TxStatus;

    /// The ordered minimal write log since `begin_tx`.
    fn tx_ops(&self) -> Vec<Op>;

    /// Replay a committed op log directly against the base maps; the replica
    /// reconciliation hook.
    fn apply_ops(&self, ops: &[Op]);

    /// Handle to the named dict, created on first use.
    fn dict(&self, name: &str) -> Dict;
}

#[derive(Default)]
struct StateInner {
    dicts: HashMap<DictName, HashMap<String, Vec<u8>>>,
    status: TxStatus,
    /// Ordered write log; doubles as the read overlay while open.
    ops: Vec<Op>,
    /// (dict, key) -> position in `ops`, keeping the log minimal.
    op_index: HashMap<(DictName, String), usize>,
}

impl StateInner {
    fn record(&mut self, dict: &str, key: &str, value: Option<Vec<u8>>) {
        let slot = (dict.to_string(), key.to_string());
        match self.op_index.get(&slot) {
            Some(&pos) => self.ops[pos].value = value,
            None => {
                self.op_index.insert(slot, self.ops.len());
                self.ops.push(Op {
                    dict: dict.to_string(),
                    key: key.to_string(),
                    value,
                });
            }
        }
    }

    fn apply(&mut self, op: &Op) {
        let map = self.dicts.entry(op.dict.clone()).or_default();
        match &op.value {
            Some(v) => {
                map.insert(op.key.clone(), v.clone());
            }
            None => {
                map.remove(&op.key);
            }
        }
    }

    fn clear_tx(&mut self) {
        self.status = TxStatus::Closed;
        self.ops.clear();
        self.op_index.clear();
    }
}

/// In-memory partitioned key-value state with transactional tracking.
///
/// Cheap to clone; all clones share the same underlying maps.
#[derive(Clone, Default)]
pub struct InMemState {
    inner: Arc<RwLock<StateInner>>,
}

impl InMemState {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, dict: &str, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read();
        if inner.status == TxStatus::Open {
            if let Some(&pos) = inner.op_index.get(&(dict.to_string(), key.to_string())) {
                return inner.ops[pos].value.clone();
            }
        }
        inner.dicts.get(dict).and_then(|m| m.get(key).cloned())
    }

    fn put(&self, dict: &str, key: &str, value: Vec<u8>) {
        let mut inner = self.inner.write();
        match inner.status {
            TxStatus::Open => inner.record(dict, key, Some(value)),
            TxStatus::Closed => {
                let op = Op::put(dict, key, value);
                inner.apply(&op);
            }
        }
    }

    fn del(&self, dict: &str, key: &str) -> Option<Vec<u8>> {
        let previous = self.get(dict, key);
        let mut inner = self.inner.write();
        match inner.status {
            TxStatus::Open => inner.record(dict, key, None),
            TxStatus::Closed => {
                let op = Op::del(dict, key);
                inner.apply(&op);
            }
        }
        previous
    }
}

impl TxState for InMemState {
    fn begin_tx(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.status == TxStatus::Open {
            return Err(StateError::TxAlreadyOpen);
        }
        inner.status = TxStatus::Open;
        Ok(())
    }

    fn commit_tx(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.status != TxStatus::Open {
            return Err(StateError::TxNotOpen);
        }
        let ops = std::mem::take(&mut inner.ops);
        for op in &ops {
            inner.apply(op);
        }
        debug!(ops = ops.len(), "committed state transaction");
        inner.clear_tx();
        Ok(())
    }

    fn abort_tx(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.status != TxStatus::Open {
            return Err(StateError::TxNotOpen);
        }
        debug!(discarded = inner.ops.len(), "aborted state transaction");
        inner.clear_tx();
        Ok(())
    }

    fn tx_status(&self) -> TxStatus {
        self.inner.read().status
    }

    fn tx_ops(&self) -> Vec<Op> {
        self.inner.read().ops.clone()
    }

    fn apply_ops(&self, ops: &[Op]) {
        let mut inner = self.inner.write();
        for op in ops {
            inner.apply(op);
        }
    }

    fn dict(&self, name: &str) -> Dict {
        Dict {
            name: name.to_string(),
            state: self.clone(),
        }
    }
}

/// Handle to one named partitioned key-value mapping.
#[derive(Clone)]
pub struct Dict {
    name: DictName,
    state: InMemState,
}

impl Dict {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value under `key`, seen through the open transaction if any.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state.get(&self.name, key)
    }

    /// Write `value` under `key`; buffered while a transaction is open.
    pub fn put(&self, key: &str, value: Vec<u8>) {
        self.state.put(&self.name, key, value);
    }

    /// Remove `key`, returning the previously visible value.
    pub fn del(&self, key: &str) -> Option<Vec<u8>> {
        self.state.del(&self.name, key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_outside_a_transaction_apply_immediately() {
        let state = InMemState::new();
        let dict = state.dict("counts");

        dict.put("a", vec![1]);
        assert_eq!(dict.get("a"), Some(vec![1]));
        assert_eq!(dict.del("a"), Some(vec![1]));
        assert!(!dict.contains("a"));
    }

    #[test]
    fn begin_twice_fails() {
        let state = InMemState::new();
        state.begin_tx().unwrap();
        assert_eq!(state.begin_tx(), Err(StateError::TxAlreadyOpen));
    }

    #[test]
    fn open_transaction_reads_see_buffered_writes() {
        let state = InMemState::new();
        let dict = state.dict("counts");
        dict.put("a", vec![1]);

        state.begin_tx().unwrap();
        dict.put("a", vec![2]);
        dict.put("b", vec![3]);
        dict.del("a");

        assert_eq!(dict.get("a"), None);
        assert_eq!(dict.get("b"), Some(vec![3]));

        // Base map untouched until commit.
        state.abort_tx().unwrap();
        assert_eq!(dict.get("a"), Some(vec![1]));
        assert_eq!(dict.get("b"), None);
    }

    #[test]
    fn commit_applies_ops_in_one_step() {
        let state = InMemState::new();
        let dict = state.dict("counts");

        state.begin_tx().unwrap();
        dict.put("x", vec![9]);
        dict.put("y", vec![8]);
        state.commit_tx().unwrap();

        assert_eq!(state.tx_status(), TxStatus::Closed);
        assert_eq!(dict.get("x"), Some(vec![9]));
        assert_eq!(dict.get("y"), Some(vec![8]));
        assert!(state.tx_ops().is_empty());
    }

    #[test]
    fn op_log_is_minimal_one_entry_per_key() {
        let state = InMemState::new();
        let dict = state.dict("counts");

        state.begin_tx().unwrap();
        dict.put("k", vec![1]);
        dict.put("k", vec![2]);
        dict.put("other", vec![7]);
        dict.put("k", vec![3]);

        let ops = state.tx_ops();
        assert_eq!(ops.len(), 2);
        // First-touch order, last value.
        assert_eq!(ops[0], Op::put("counts", "k", vec![3]));
        assert_eq!(ops[1], Op::put("counts", "other", vec![7]));
        state.abort_tx().unwrap();
    }

    #[test]
    fn apply_ops_replays_a_committed_log() {
        let leader = InMemState::new();
        let replica = InMemState::new();
        let dict = leader.dict("counts");

        leader.begin_tx().unwrap();
        dict.put("a", vec![1]);
        dict.del("missing");
        let ops = leader.tx_ops();
        leader.commit_tx().unwrap();

        replica.apply_ops(&ops);
        assert_eq!(replica.dict("counts").get("a"), Some(vec![1]));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashMap;

        #[derive(Debug, Clone)]
        enum Step {
            Put(u8, Vec<u8>),
            Del(u8),
        }

        fn step_strategy() -> impl Strategy<Value = Step> {
            prop_oneof![
                (0u8..8, proptest::collection::vec(any::<u8>(), 0..4))
                    .prop_map(|(k, v)| Step::Put(k, v)),
                (0u8..8).prop_map(Step::Del),
            ]
        }

        proptest! {
            /// Open-transaction reads always reflect the last write per key,
            /// the op log stays minimal, and abort leaves the base untouched.
            #[test]
            fn overlay_tracks_last_write_and_abort_restores(
                steps in proptest::collection::vec(step_strategy(), 0..32)
            ) {
                let state = InMemState::new();
                let dict = state.dict("d");
                dict.put("0", vec![42]);

                state.begin_tx().unwrap();
                let mut model: HashMap<String, Option<Vec<u8>>> = HashMap::new();
                for step in &steps {
                    match step {
                        Step::Put(k, v) => {
                            dict.put(&k.to_string(), v.clone());
                            model.insert(k.to_string(), Some(v.clone()));
                        }
                        Step::Del(k) => {
                            dict.del(&k.to_string());
                            model.insert(k.to_string(), None);
                        }
                    }
                }

                for (key, expected) in &model {
                    prop_assert_eq!(&dict.get(key), expected);
                }

                let ops = state.tx_ops();
                prop_assert_eq!(ops.len(), model.len());

                state.abort_tx().unwrap();
                prop_assert_eq!(dict.get("0"), Some(vec![42]));
                for key in model.keys().filter(|k| *k != "0") {
                    prop_assert_eq!(dict.get(key), None);
                }
            }
        }
    }
}
