//! Per-bee transaction machine
//!
//! Closed → Open → (committed | aborted) → Closed. While a transaction is
//! open, emitted messages buffer in the record and dict writes accumulate in
//! the state layer. Commit orders the effects: replicate first (when the
//! colony is replicated), then flush the buffered messages in emission
//! order, then apply the write log locally. A crash between state mutation
//! and message emission can therefore lose at most work that replicas
//! already hold, and a replication failure rolls back before anything is
//! observable.

use crate::bee::RcvContext;
use crate::error::{HiveError, Result};
use crate::replication::TxRecord;
use tracing::{debug, error, warn};
use waggle_state::{Op, TxState, TxStatus};
use waggle_types::Msg;

/// The mutable transaction record of one bee.
#[derive(Default)]
pub struct Transaction {
    status: TxStatus,
    /// Colony epoch the transaction was begun under.
    pub generation: u64,
    /// Strictly increasing per bee across Begin→(Commit|Abort) cycles.
    pub seq: u64,
    msgs: Vec<Msg>,
    ops: Vec<Op>,
}

impl Transaction {
    pub fn is_open(&self) -> bool {
        self.status == TxStatus::Open
    }

    pub(crate) fn open(&mut self, generation: u64) {
        self.status = TxStatus::Open;
        self.generation = generation;
        self.seq += 1;
    }

    pub(crate) fn add_msg(&mut self, msg: Msg) {
        self.msgs.push(msg);
    }

    /// Buffered outbound messages, in emission order.
    pub fn msgs(&self) -> &[Msg] {
        &self.msgs
    }

    /// Snapshot for the replication collaborator.
    pub(crate) fn record(&self) -> TxRecord {
        TxRecord {
            generation: self.generation,
            seq: self.seq,
            msgs: self.msgs.clone(),
            ops: self.ops.clone(),
        }
    }

    /// Clear everything except `seq`, which survives cycles.
    pub(crate) fn reset(&mut self) {
        self.status = TxStatus::Closed;
        self.generation = 0;
        self.msgs.clear();
        self.ops.clear();
    }
}

impl RcvContext {
    /// Start a transaction. Fails with `TxConflict` if one is already open;
    /// the open transaction is untouched.
    pub fn begin_tx(&mut self) -> Result<()> {
        if self.tx.is_open() {
            return Err(HiveError::tx_conflict("a transaction is already open"));
        }

        self.state.begin_tx()?;
        self.tx.open(self.colony.generation);
        debug!(bee = %self.bee_id, seq = self.tx.seq, "transaction opened");
        Ok(())
    }

    /// Commit the open transaction; a no-op when none is open.
    ///
    /// With a replicated colony this blocks until quorum acknowledgment. On
    /// replication failure the transaction aborts with no observable effect.
    /// A local failure *after* replicas accepted is unrecoverable: the
    /// returned error is fatal and the node escalates.
    pub async fn commit_tx(&mut self) -> Result<()> {
        if !self.tx.is_open() {
            return Ok(());
        }

        // A migration since begin_tx invalidates the transaction.
        if self.tx.generation != self.colony.generation {
            let err = HiveError::GenerationMismatch {
                tx_generation: self.tx.generation,
                colony_generation: self.colony.generation,
            };
            warn!(bee = %self.bee_id, error = %err, "aborting stale transaction");
            self.abort_tx()?;
            return Err(err);
        }

        // Unreplicated fast path: local effects apply immediately.
        if self.replication_factor < 2 {
            return self.apply_commit().await;
        }

        self.tx.ops = self.state.tx_ops();
        let record = self.tx.record();
        let replicator = self.hive.replicator();
        if let Err(e) = replicator.replicate(&record, &self.colony).await {
            error!(bee = %self.bee_id, seq = record.seq, error = %e, "replication failed; aborting");
            self.abort_tx()?;
            return Err(match e {
                replication @ HiveError::Replication { .. } => replication,
                other => HiveError::replication(other.to_string()),
            });
        }

        // Replicas have accepted: a local failure past this point risks
        // divergence and must escalate rather than retry.
        if let Err(e) = self.apply_commit().await {
            return Err(HiveError::local_commit(e.to_string()));
        }

        if let Err(e) = replicator.notify_commit(&self.bee_id, record.seq).await {
            warn!(bee = %self.bee_id, seq = record.seq, error = %e, "commit notification failed");
        }

        Ok(())
    }

    /// Abort the open transaction; a no-op when none is open. Buffered
    /// messages and ops are discarded and pending state writes roll back.
    pub fn abort_tx(&mut self) -> Result<()> {
        if !self.tx.is_open() {
            return Ok(());
        }

        debug!(bee = %self.bee_id, seq = self.tx.seq, discarded = self.tx.msgs().len(), "transaction aborted");
        self.tx.reset();
        self.state.abort_tx()?;
        Ok(())
    }

    /// Flush buffered messages in emission order, then apply the write log
    /// to the local partition. Resets the record unconditionally.
    async fn apply_commit(&mut self) -> Result<()> {
        let msgs = std::mem::take(&mut self.tx.msgs);
        let flushed = msgs.len();
        for msg in msgs {
            self.hive.dispatch(msg).await;
        }

        let applied = self.state.commit_tx();
        self.tx.reset();
        debug!(bee = %self.bee_id, msgs = flushed, "transaction committed");
        applied.map_err(HiveError::from)
    }
}
