//! Hive: node assembly
//!
//! A hive owns the app registry, one control loop per app, the stage
//! listener, the replication collaborator, and the node's outbound channel.
//! Cloning a `Hive` is cheap and shares the same node.
//!
//! Messages addressed to a local bee of a known app are delivered through
//! that app's control loop; everything else leaves the node on the outbound
//! channel in dispatch order. What consumes the outbound side (peer-hive
//! connections, a router, a test) is the membership layer's concern.

use crate::app::App;
use crate::bee::BeeHandle;
use crate::config::HiveConfig;
use crate::error::{HiveError, Result};
use crate::qee::{Qee, QeeHandle};
use crate::replication::{NoReplication, Replicator};
use crate::stage::Stage;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use waggle_types::{AppName, HiveId, Msg};

struct HiveInner {
    config: HiveConfig,
    hive_id: HiveId,
    apps: DashMap<AppName, Arc<App>>,
    qees: DashMap<AppName, QeeHandle>,
    replicator: Arc<dyn Replicator>,
    outbound: broadcast::Sender<Msg>,
    shutdown: watch::Sender<bool>,
}

/// One node of the runtime.
#[derive(Clone)]
pub struct Hive {
    inner: Arc<HiveInner>,
}

impl Hive {
    /// Create an unreplicated hive.
    pub fn new(config: HiveConfig) -> Result<Self> {
        Self::with_replicator(config, Arc::new(NoReplication))
    }

    /// Create a hive with a replication collaborator.
    pub fn with_replicator(config: HiveConfig, replicator: Arc<dyn Replicator>) -> Result<Self> {
        config.validate()?;
        let hive_id = config
            .hive_id
            .clone()
            .unwrap_or_else(|| format!("hive-{}", Uuid::new_v4().simple()));
        let (outbound, _) = broadcast::channel(config.outbound_queue_size);
        let (shutdown, _) = watch::channel(false);

        info!(hive = %hive_id, "creating hive");
        Ok(Self {
            inner: Arc::new(HiveInner {
                config,
                hive_id,
                apps: DashMap::new(),
                qees: DashMap::new(),
                replicator,
                outbound,
                shutdown,
            }),
        })
    }

    /// This node's identity.
    pub fn id(&self) -> &HiveId {
        &self.inner.hive_id
    }

    pub fn config(&self) -> &HiveConfig {
        &self.inner.config
    }

    /// Register an app and start its control loop. Idempotent per name.
    pub fn new_app(&self, name: impl Into<AppName>) -> Arc<App> {
        let name = name.into();
        if let Some(existing) = self.inner.apps.get(&name) {
            warn!(app = %name, "app already registered");
            return existing.value().clone();
        }

        let app = Arc::new(App::new(name.clone(), self.inner.config.replication_factor));
        let qee = Qee::spawn(app.clone(), self.clone());
        self.inner.apps.insert(name.clone(), app.clone());
        self.inner.qees.insert(name, qee);
        app
    }

    /// The registered app, if any.
    pub fn app(&self, name: &str) -> Option<Arc<App>> {
        self.inner.apps.get(name).map(|entry| entry.value().clone())
    }

    /// The app's control loop handle, if the app is registered.
    pub fn qee(&self, name: &str) -> Option<QeeHandle> {
        self.inner.qees.get(name).map(|entry| entry.value().clone())
    }

    /// Resolve a local receiver through its app's control loop, the one
    /// authoritative lookup path.
    pub async fn receiver(&self, app: &str, id: u64) -> Result<BeeHandle> {
        let unknown = || HiveError::UnknownReceiver {
            app: app.to_string(),
            id,
        };
        let qee = self.qee(app).ok_or_else(unknown)?;
        qee.find_receiver(id).await?.ok_or_else(unknown)
    }

    /// Bind the stage and start serving connections. Returns the bound
    /// address (useful when the configuration asked for port 0).
    pub async fn start(&self) -> Result<SocketAddr> {
        let stage = Stage::bind(
            self.inner.config.listen_addr,
            self.inner.config.max_frame_size,
        )
        .await?;
        let addr = stage.local_addr()?;

        let hive = self.clone();
        tokio::spawn(stage.serve(hive));
        info!(hive = %self.inner.hive_id, addr = %addr, "hive started");
        Ok(addr)
    }

    /// Stop the stage and every control loop (and with them every bee).
    pub async fn stop(&self) {
        let _ = self.inner.shutdown.send(true);
        let qees: Vec<QeeHandle> = self
            .inner
            .qees
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        futures::future::join_all(qees.iter().map(|qee| qee.stop())).await;
        info!(hive = %self.inner.hive_id, "hive stopped");
    }

    /// Observe messages leaving this node, in dispatch order.
    pub fn subscribe_outbound(&self) -> broadcast::Receiver<Msg> {
        self.inner.outbound.subscribe()
    }

    /// Observe the shutdown signal (flips to `true` once).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub(crate) fn replicator(&self) -> Arc<dyn Replicator> {
        self.inner.replicator.clone()
    }

    /// A fault after replicas accepted a transaction risks divergence; stop
    /// the whole node rather than retry.
    pub(crate) fn escalate_fatal(&self, error: &HiveError) {
        error!(
            hive = %self.inner.hive_id,
            error = %error,
            category = error.category(),
            "unrecoverable local fault; stopping hive"
        );
        let hive = self.clone();
        tokio::spawn(async move { hive.stop().await });
    }

    /// Route one message: local bees get it through their control loop,
    /// everything else leaves on the outbound channel.
    pub(crate) async fn dispatch(&self, msg: Msg) {
        if !msg.to.is_nil() && msg.to.hive == self.inner.hive_id {
            self.deliver_local(msg).await;
            return;
        }
        if self.inner.outbound.send(msg).is_err() {
            // No subscribers yet; the membership layer is not attached.
            debug!(hive = %self.inner.hive_id, "outbound message dropped (no subscribers)");
        }
    }

    async fn deliver_local(&self, msg: Msg) {
        let (Some(app), Some(qee)) = (self.app(&msg.to.app), self.qee(&msg.to.app)) else {
            warn!(to = %msg.to, "message for unknown local app; dropping");
            return;
        };

        let bee = match qee.find_receiver(msg.to.id).await {
            Ok(Some(bee)) => bee,
            Ok(None) => {
                warn!(to = %msg.to, "message for unknown local bee; dropping");
                return;
            }
            Err(e) => {
                warn!(to = %msg.to, error = %e, "receiver resolution failed; dropping");
                return;
            }
        };

        if let Some(fixed) = bee.fixed_handler() {
            if let Err(e) = bee.enqueue(msg, fixed).await {
                warn!(error = %e, "local delivery failed");
            }
            return;
        }

        let handlers = app.handlers_for(&msg.msg_type);
        if handlers.is_empty() {
            debug!(to = %msg.to, msg_type = %msg.msg_type, "no handler registered; message dropped");
            return;
        }
        for handler in handlers {
            if let Err(e) = bee.enqueue(msg.clone(), handler).await {
                warn!(error = %e, "local delivery failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waggle_types::BeeId;

    fn test_config() -> HiveConfig {
        HiveConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn hive_id_is_generated_when_not_configured() {
        let hive = Hive::new(test_config()).unwrap();
        assert!(hive.id().starts_with("hive-"));

        let named = Hive::new(HiveConfig {
            hive_id: Some("hive-a".to_string()),
            ..test_config()
        })
        .unwrap();
        assert_eq!(named.id(), "hive-a");
    }

    #[tokio::test]
    async fn new_app_is_idempotent() {
        let hive = Hive::new(test_config()).unwrap();
        let first = hive.new_app("Counter");
        let again = hive.new_app("Counter");
        assert!(Arc::ptr_eq(&first, &again));
        assert!(hive.qee("Counter").is_some());
        assert!(hive.app("Unknown").is_none());
    }

    #[tokio::test]
    async fn receiver_resolution_reports_unknown_bees() {
        let hive = Hive::new(test_config()).unwrap();
        hive.new_app("Counter");

        let err = hive.receiver("Counter", 7).await.unwrap_err();
        assert_eq!(err.category(), "unknown_receiver");
        let err = hive.receiver("NoSuchApp", 1).await.unwrap_err();
        assert_eq!(err.category(), "unknown_receiver");

        hive.qee("Counter").unwrap().spawn_bee(Some(7)).await.unwrap();
        let handle = hive.receiver("Counter", 7).await.unwrap();
        assert_eq!(handle.id().id, 7);
    }

    #[tokio::test]
    async fn dispatch_routes_non_local_messages_outbound() {
        let hive = Hive::new(test_config()).unwrap();
        let mut outbound = hive.subscribe_outbound();

        let msg = Msg::new(
            "Ping",
            BeeId::nil(),
            BeeId::new("some-other-hive", "Counter", 1),
            vec![],
        );
        hive.dispatch(msg.clone()).await;
        assert_eq!(outbound.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn stop_flips_the_shutdown_signal() {
        let hive = Hive::new(test_config()).unwrap();
        let signal = hive.shutdown_signal();
        assert!(!*signal.borrow());

        hive.stop().await;
        assert!(*signal.borrow());
    }
}
