//! Per-app control loop
//!
//! One qee per (app, node): the single authoritative serializer for the
//! local receiver registry and the shard lock table. Commands arrive on an
//! mpsc queue and each carries its own oneshot result slot, so a caller
//! blocks on exactly its command while the loop processes one command at a
//! time. Serial processing is what prevents races between concurrent bee
//! creation, lock acquisition, and detached spawning.

use crate::app::App;
use crate::bee::{Bee, BeeHandle, BeeKind, DetachedRcv, MsgAndHandler, RcvContext};
use crate::error::{HiveError, Result};
use crate::handler::{DetachedHandler, Handler};
use crate::hive::Hive;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use waggle_types::{AppName, BeeId, CellKey, Colony, MappedCells};

enum QeeCommand {
    FindReceiver {
        id: u64,
        reply: oneshot::Sender<Option<BeeHandle>>,
    },
    LockCells {
        colony: Colony,
        cells: MappedCells,
        reply: oneshot::Sender<Result<()>>,
    },
    StartDetached {
        handler: Arc<dyn DetachedHandler>,
        reply: oneshot::Sender<Result<BeeId>>,
    },
    SpawnBee {
        id: Option<u64>,
        reply: oneshot::Sender<Result<BeeHandle>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable sender side of one app's control loop.
#[derive(Clone)]
pub struct QeeHandle {
    app: AppName,
    commands: mpsc::Sender<QeeCommand>,
}

impl QeeHandle {
    /// Resolve a local receiver; `None` when this node hosts no such bee.
    pub async fn find_receiver(&self, id: u64) -> Result<Option<BeeHandle>> {
        let (reply, slot) = oneshot::channel();
        self.send(QeeCommand::FindReceiver { id, reply }).await?;
        self.recv(slot).await
    }

    /// Claim ownership of shard cells for a colony. All-or-nothing: on
    /// conflict no cell changes owner.
    pub async fn lock_cells(&self, colony: Colony, cells: MappedCells) -> Result<()> {
        let (reply, slot) = oneshot::channel();
        self.send(QeeCommand::LockCells {
            colony,
            cells,
            reply,
        })
        .await?;
        self.recv(slot).await?
    }

    /// Spawn a detached handler; returns its identity once registered.
    pub async fn start_detached(&self, handler: Arc<dyn DetachedHandler>) -> Result<BeeId> {
        let (reply, slot) = oneshot::channel();
        self.send(QeeCommand::StartDetached { handler, reply }).await?;
        self.recv(slot).await?
    }

    /// Create the bee for an instance id (or the next free id), returning
    /// its handle. Idempotent for an id that already exists.
    pub async fn spawn_bee(&self, id: Option<u64>) -> Result<BeeHandle> {
        let (reply, slot) = oneshot::channel();
        self.send(QeeCommand::SpawnBee { id, reply }).await?;
        self.recv(slot).await?
    }

    /// Stop the loop and every bee it owns.
    pub(crate) async fn stop(&self) {
        let (reply, slot) = oneshot::channel();
        if self.send(QeeCommand::Stop { reply }).await.is_ok() {
            let _ = slot.await;
        }
    }

    async fn send(&self, cmd: QeeCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| HiveError::control_loop(format!("qee for app {} stopped", self.app)))
    }

    async fn recv<T>(&self, slot: oneshot::Receiver<T>) -> Result<T> {
        slot.await
            .map_err(|_| HiveError::control_loop(format!("qee for app {} dropped a result", self.app)))
    }
}

/// The control-loop task for one app on one node.
pub(crate) struct Qee {
    app: Arc<App>,
    hive: Hive,
    handle: QeeHandle,
    commands: mpsc::Receiver<QeeCommand>,
    bees: HashMap<u64, BeeHandle>,
    tasks: HashMap<u64, JoinHandle<()>>,
    lock_table: HashMap<CellKey, Colony>,
    next_id: u64,
}

impl Qee {
    /// Start the loop for an app, returning the command handle.
    pub(crate) fn spawn(app: Arc<App>, hive: Hive) -> QeeHandle {
        let (tx, rx) = mpsc::channel(hive.config().cmd_queue_size);
        let handle = QeeHandle {
            app: app.name().clone(),
            commands: tx,
        };

        let qee = Qee {
            app,
            hive,
            handle: handle.clone(),
            commands: rx,
            bees: HashMap::new(),
            tasks: HashMap::new(),
            lock_table: HashMap::new(),
            next_id: 1,
        };
        tokio::spawn(qee.run());
        handle
    }

    async fn run(mut self) {
        info!(app = %self.app.name(), "control loop started");
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                QeeCommand::FindReceiver { id, reply } => {
                    let _ = reply.send(self.bees.get(&id).cloned());
                }
                QeeCommand::LockCells {
                    colony,
                    cells,
                    reply,
                } => {
                    let _ = reply.send(self.lock_cells(colony, cells));
                }
                QeeCommand::StartDetached { handler, reply } => {
                    let result = self
                        .spawn_bee(None, BeeKind::Detached(handler))
                        .map(|handle| handle.id().clone());
                    let _ = reply.send(result);
                }
                QeeCommand::SpawnBee { id, reply } => {
                    let _ = reply.send(self.spawn_bee(id, BeeKind::Receiver));
                }
                QeeCommand::Stop { reply } => {
                    self.stop();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!(app = %self.app.name(), "control loop stopped");
    }

    /// Claim every cell for the colony, or nothing on the first conflict.
    fn lock_cells(&mut self, colony: Colony, cells: MappedCells) -> Result<()> {
        for cell in &cells {
            if let Some(owner) = self.lock_table.get(cell) {
                if !owner.same_group(&colony) {
                    debug!(app = %self.app.name(), cell = %cell, "lock conflict");
                    return Err(HiveError::LockConflict { cell: cell.clone() });
                }
            }
        }
        for cell in cells {
            self.lock_table.insert(cell, colony.clone());
        }
        Ok(())
    }

    fn spawn_bee(&mut self, id: Option<u64>, kind: BeeKind) -> Result<BeeHandle> {
        let id = match id {
            Some(id) => {
                if let Some(existing) = self.bees.get(&id) {
                    return Ok(existing.clone());
                }
                self.next_id = self.next_id.max(id + 1);
                id
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };

        let bee_id = BeeId::new(self.hive.id().clone(), self.app.name().clone(), id);
        let colony = Colony::solo(bee_id.clone());
        let (queue_tx, queue_rx) = mpsc::channel::<MsgAndHandler>(self.hive.config().bee_queue_size);

        let fixed: Option<Arc<dyn Handler>> = match &kind {
            BeeKind::Detached(handler) => Some(Arc::new(DetachedRcv(handler.clone()))),
            BeeKind::Receiver => None,
        };
        let handle = BeeHandle::new(bee_id.clone(), queue_tx, fixed);

        let ctx = RcvContext::new(
            bee_id.clone(),
            colony,
            waggle_state::InMemState::new(),
            self.handle.clone(),
            self.hive.clone(),
            self.app.replication_factor(),
        );
        let task = tokio::spawn(Bee::new(ctx, queue_rx, kind).run());

        self.bees.insert(id, handle.clone());
        self.tasks.insert(id, task);
        info!(bee = %bee_id, "spawned bee");
        Ok(handle)
    }

    fn stop(&mut self) {
        info!(app = %self.app.name(), bees = self.bees.len(), "stopping control loop");
        // Handles cached by live sessions keep queues open, so teardown
        // aborts rather than waiting for drains.
        self.bees.clear();
        for (id, task) in self.tasks.drain() {
            task.abort();
            debug!(app = %self.app.name(), bee = id, "aborted bee task");
        }
        if !self.lock_table.is_empty() {
            warn!(
                app = %self.app.name(),
                cells = self.lock_table.len(),
                "dropping lock table on stop"
            );
            self.lock_table.clear();
        }
    }
}
