//! Replication contract
//!
//! The transaction machine hands a complete [`TxRecord`] to the replication
//! collaborator and blocks until quorum acknowledgment or failure. The
//! concrete transport and membership protocol live outside the core; this
//! module only fixes the contract and ships the unreplicated default.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use waggle_state::Op;
use waggle_types::{BeeId, Colony, Msg};

/// The serialisable record of one transaction, submitted for replication
/// before any local effect becomes observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Colony epoch the transaction was committed under.
    pub generation: u64,
    /// Per-bee commit sequence number.
    pub seq: u64,
    /// Buffered outbound messages, in emission order.
    pub msgs: Vec<Msg>,
    /// Ordered minimal write log.
    pub ops: Vec<Op>,
}

/// Replication collaborator for a bee's colony.
#[async_trait]
pub trait Replicator: Send + Sync + 'static {
    /// Submit the record to the colony and block until a quorum of replicas
    /// acknowledges, or fail. On failure nothing has been applied locally
    /// and the transaction rolls back cleanly.
    async fn replicate(&self, record: &TxRecord, colony: &Colony) -> Result<()>;

    /// Tell replicas that `seq` is committed. Best-effort: failures are
    /// logged by the caller and replicas reconcile lazily.
    async fn notify_commit(&self, bee: &BeeId, seq: u64) -> Result<()>;
}

/// Default collaborator for unreplicated hives. Commits with replication
/// factor < 2 never reach it; it accepts everything so a misconfigured app
/// fails no louder than its configuration.
pub struct NoReplication;

#[async_trait]
impl Replicator for NoReplication {
    async fn replicate(&self, _record: &TxRecord, _colony: &Colony) -> Result<()> {
        Ok(())
    }

    async fn notify_commit(&self, _bee: &BeeId, _seq: u64) -> Result<()> {
        Ok(())
    }
}
