//! Bee execution
//!
//! A bee owns one input queue, one transaction record, one state handle,
//! and private bee-local storage. Its task processes exactly one work item
//! at a time, so handlers for the same bee never execute concurrently and
//! nothing the context holds needs extra locking.
//!
//! Handler code talks to the rest of the node only through [`RcvContext`]:
//! message emission (buffered while a transaction is open), shard locking
//! and detached spawning (blocking round trips to the control loop), and
//! dict access through the bee's state.

use crate::error::{HiveError, Result};
use crate::handler::{DetachedHandler, Handler};
use crate::hive::Hive;
use crate::qee::QeeHandle;
use crate::txn::Transaction;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use waggle_state::{Dict, InMemState, TxState};
use waggle_types::{BeeId, Colony, MappedCells, Msg, MsgType};

/// One unit of work on a bee's queue: a message paired with the handler
/// that must see it.
pub struct MsgAndHandler {
    pub msg: Msg,
    pub handler: Arc<dyn Handler>,
}

/// Cloneable handle to a bee's input queue. Obtained only through the
/// control loop, never constructed around a bee directly.
#[derive(Clone)]
pub struct BeeHandle {
    id: BeeId,
    queue: mpsc::Sender<MsgAndHandler>,
    /// Detached bees take every message through their own handler instead
    /// of the app's per-type registry.
    fixed: Option<Arc<dyn Handler>>,
}

impl std::fmt::Debug for BeeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeeHandle")
            .field("id", &self.id)
            .field("fixed", &self.fixed.is_some())
            .finish_non_exhaustive()
    }
}

impl BeeHandle {
    pub(crate) fn new(
        id: BeeId,
        queue: mpsc::Sender<MsgAndHandler>,
        fixed: Option<Arc<dyn Handler>>,
    ) -> Self {
        Self { id, queue, fixed }
    }

    pub fn id(&self) -> &BeeId {
        &self.id
    }

    pub(crate) fn fixed_handler(&self) -> Option<Arc<dyn Handler>> {
        self.fixed.clone()
    }

    /// Enqueue one work item, waiting for queue capacity.
    pub async fn enqueue(&self, msg: Msg, handler: Arc<dyn Handler>) -> Result<()> {
        self.queue
            .send(MsgAndHandler { msg, handler })
            .await
            .map_err(|_| HiveError::network(format!("receiver {} is gone", self.id)))
    }
}

/// What drives a bee's lifecycle.
pub(crate) enum BeeKind {
    /// Driven by message delivery through the app's handler registry.
    Receiver,
    /// Background unit with an explicit start/stop bracket.
    Detached(Arc<dyn DetachedHandler>),
}

/// Routes a detached bee's messages to its own handler.
pub(crate) struct DetachedRcv(pub(crate) Arc<dyn DetachedHandler>);

#[async_trait]
impl Handler for DetachedRcv {
    async fn rcv(&self, ctx: &mut RcvContext, msg: &Msg) -> Result<()> {
        self.0.rcv(ctx, msg).await
    }
}

/// The platform surface handler code runs against.
pub struct RcvContext {
    pub(crate) bee_id: BeeId,
    pub(crate) colony: Colony,
    pub(crate) state: InMemState,
    pub(crate) tx: Transaction,
    pub(crate) qee: QeeHandle,
    pub(crate) hive: Hive,
    pub(crate) replication_factor: usize,
    local: Option<Box<dyn Any + Send>>,
}

impl RcvContext {
    pub(crate) fn new(
        bee_id: BeeId,
        colony: Colony,
        state: InMemState,
        qee: QeeHandle,
        hive: Hive,
        replication_factor: usize,
    ) -> Self {
        Self {
            bee_id,
            colony,
            state,
            tx: Transaction::default(),
            qee,
            hive,
            replication_factor,
            local: None,
        }
    }

    /// This bee's identity.
    pub fn bee_id(&self) -> &BeeId {
        &self.bee_id
    }

    /// This bee's current colony view.
    pub fn colony(&self) -> &Colony {
        &self.colony
    }

    /// Handle to the named dict within this bee's state.
    pub fn dict(&self, name: &str) -> Dict {
        self.state.dict(name)
    }

    /// Emit a message with no explicit recipient. Buffered while a
    /// transaction is open, dispatched immediately otherwise.
    pub async fn emit(&mut self, msg_type: impl Into<MsgType>, data: Vec<u8>) {
        let msg = Msg::new(msg_type, self.bee_id.clone(), BeeId::nil(), data);
        self.buffer_or_dispatch(msg).await;
    }

    /// Send a message to a specific bee. Buffered while a transaction is
    /// open, dispatched immediately otherwise.
    pub async fn send_to_bee(&mut self, msg_type: impl Into<MsgType>, data: Vec<u8>, to: BeeId) {
        let msg = Msg::new(msg_type, self.bee_id.clone(), to, data);
        self.buffer_or_dispatch(msg).await;
    }

    /// Reply to `msg`'s sender. Fails without sending when the original was
    /// flagged no-reply.
    pub async fn reply_to(
        &mut self,
        msg: &Msg,
        reply_type: impl Into<MsgType>,
        data: Vec<u8>,
    ) -> Result<()> {
        if msg.no_reply() {
            return Err(HiveError::NoReply);
        }
        self.send_to_bee(reply_type, data, msg.from.clone()).await;
        Ok(())
    }

    /// Claim ownership of shard cells for this bee's colony. Blocks until
    /// the control loop answers; a cell owned by another colony is a
    /// conflict and nothing is claimed.
    pub async fn lock(&self, cells: MappedCells) -> Result<()> {
        self.qee.lock_cells(self.colony.clone(), cells).await
    }

    /// Spawn a detached handler through the control loop; blocks until the
    /// new bee's identity is assigned.
    pub async fn start_detached(&self, handler: Arc<dyn DetachedHandler>) -> Result<BeeId> {
        self.qee.start_detached(handler).await
    }

    /// Bee-local storage: ephemeral, unreplicated, dropped with the bee.
    pub fn bee_local<T: Send + 'static>(&self) -> Option<&T> {
        self.local.as_ref().and_then(|v| v.downcast_ref())
    }

    /// Replace the bee-local storage.
    pub fn set_bee_local<T: Send + 'static>(&mut self, value: T) {
        self.local = Some(Box::new(value));
    }

    pub(crate) async fn buffer_or_dispatch(&mut self, msg: Msg) {
        if self.tx.is_open() {
            debug!(seq = self.tx.seq, msg = %msg, "buffering message in open transaction");
            self.tx.add_msg(msg);
        } else {
            self.hive.dispatch(msg).await;
        }
    }
}

/// The task side of one bee.
pub(crate) struct Bee {
    ctx: RcvContext,
    queue: mpsc::Receiver<MsgAndHandler>,
    kind: BeeKind,
}

impl Bee {
    pub(crate) fn new(ctx: RcvContext, queue: mpsc::Receiver<MsgAndHandler>, kind: BeeKind) -> Self {
        Self { ctx, queue, kind }
    }

    pub(crate) async fn run(mut self) {
        let detached = match &self.kind {
            BeeKind::Detached(h) => Some(h.clone()),
            BeeKind::Receiver => None,
        };

        info!(bee = %self.ctx.bee_id, detached = detached.is_some(), "bee started");
        if let Some(handler) = &detached {
            handler.start(&mut self.ctx).await;
        }

        while let Some(work) = self.queue.recv().await {
            if let Err(e) = work.handler.rcv(&mut self.ctx, &work.msg).await {
                if e.is_fatal() {
                    error!(
                        bee = %self.ctx.bee_id,
                        error = %e,
                        category = e.category(),
                        "fatal fault in handler"
                    );
                    self.ctx.hive.escalate_fatal(&e);
                    break;
                }

                warn!(
                    bee = %self.ctx.bee_id,
                    msg = %work.msg,
                    error = %e,
                    category = e.category(),
                    "handler failed; aborting any open transaction"
                );
                if let Err(abort_err) = self.ctx.abort_tx() {
                    warn!(bee = %self.ctx.bee_id, error = %abort_err, "abort after handler failure failed");
                }
            }
        }

        if let Some(handler) = &detached {
            handler.stop(&mut self.ctx).await;
        }
        debug!(bee = %self.ctx.bee_id, "bee stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HiveConfig;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;
    use waggle_types::BeeId;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_hive() -> Hive {
        Hive::new(HiveConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        })
        .unwrap()
    }

    fn probe_msg(to: &BeeId) -> Msg {
        Msg::new("Probe", BeeId::nil(), to.clone(), vec![])
    }

    /// Fails fatally on every message.
    struct Exploder;

    #[async_trait]
    impl Handler for Exploder {
        async fn rcv(&self, _ctx: &mut RcvContext, _msg: &Msg) -> Result<()> {
            Err(HiveError::local_commit("simulated apply fault"))
        }
    }

    #[tokio::test]
    async fn fatal_handler_error_escalates_to_node_shutdown() {
        let hive = test_hive();
        hive.new_app("Fragile");
        let bee = hive
            .qee("Fragile")
            .unwrap()
            .spawn_bee(Some(1))
            .await
            .unwrap();

        let mut signal = hive.shutdown_signal();
        bee.enqueue(probe_msg(bee.id()), Arc::new(Exploder))
            .await
            .unwrap();

        timeout(WAIT, async {
            while !*signal.borrow() {
                signal.changed().await.unwrap();
            }
        })
        .await
        .expect("fatal fault never escalated");
    }

    /// Opens a transaction and fails; the bee must abort it so the next
    /// message starts clean.
    struct LeavesTxOpen {
        calls: AtomicU64,
        second_begin_ok: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Handler for LeavesTxOpen {
        async fn rcv(&self, ctx: &mut RcvContext, _msg: &Msg) -> Result<()> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => {
                    ctx.begin_tx()?;
                    ctx.dict("scratch").put("k", vec![1]);
                    Err(HiveError::network("simulated failure mid-transaction"))
                }
                _ => {
                    ctx.begin_tx()?;
                    self.second_begin_ok.store(true, Ordering::SeqCst);
                    ctx.abort_tx()
                }
            }
        }
    }

    #[tokio::test]
    async fn handler_failure_aborts_the_open_transaction() {
        let hive = test_hive();
        hive.new_app("Flaky");
        let bee = hive.qee("Flaky").unwrap().spawn_bee(Some(1)).await.unwrap();

        let second_begin_ok = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(LeavesTxOpen {
            calls: AtomicU64::new(0),
            second_begin_ok: second_begin_ok.clone(),
        });

        bee.enqueue(probe_msg(bee.id()), handler.clone())
            .await
            .unwrap();
        bee.enqueue(probe_msg(bee.id()), handler).await.unwrap();

        timeout(WAIT, async {
            while !second_begin_ok.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("second begin_tx never succeeded; transaction leaked");
    }

    /// Counts messages in bee-local storage.
    struct LocalCounter {
        seen: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Handler for LocalCounter {
        async fn rcv(&self, ctx: &mut RcvContext, _msg: &Msg) -> Result<()> {
            let next = ctx.bee_local::<u64>().copied().unwrap_or(0) + 1;
            ctx.set_bee_local(next);
            self.seen.store(next, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn bee_local_storage_persists_across_messages() {
        let hive = test_hive();
        hive.new_app("Sticky");
        let bee = hive.qee("Sticky").unwrap().spawn_bee(Some(1)).await.unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let handler = Arc::new(LocalCounter { seen: seen.clone() });
        for _ in 0..3 {
            bee.enqueue(probe_msg(bee.id()), handler.clone())
                .await
                .unwrap();
        }

        timeout(WAIT, async {
            while seen.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bee-local counter never reached 3");
    }
}
