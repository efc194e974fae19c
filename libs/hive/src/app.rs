//! Apps
//!
//! An app is a named application: its handler registry and replication
//! policy. Handler lists are ordered by registration and read per message
//! type by the stage (cached per session) and the local dispatch path.

use crate::handler::Handler;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use waggle_types::{AppName, MsgType};

/// One named application registered on a hive.
pub struct App {
    name: AppName,
    replication_factor: AtomicUsize,
    handlers: RwLock<HashMap<MsgType, Vec<Arc<dyn Handler>>>>,
}

impl App {
    pub(crate) fn new(name: AppName, replication_factor: usize) -> Self {
        Self {
            name,
            replication_factor: AtomicUsize::new(replication_factor),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &AppName {
        &self.name
    }

    /// Register a handler for a message type. Registration order is
    /// dispatch order.
    pub fn handle(&self, msg_type: impl Into<MsgType>, handler: Arc<dyn Handler>) {
        let msg_type = msg_type.into();
        debug!(app = %self.name, msg_type = %msg_type, "registering handler");
        self.handlers
            .write()
            .entry(msg_type)
            .or_default()
            .push(handler);
    }

    /// The ordered handler list for a message type; empty when none are
    /// registered.
    pub fn handlers_for(&self, msg_type: &str) -> Vec<Arc<dyn Handler>> {
        self.handlers
            .read()
            .get(msg_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Replicas each of this app's bees keeps. Below 2, commits take the
    /// unreplicated fast path.
    pub fn replication_factor(&self) -> usize {
        self.replication_factor.load(Ordering::Relaxed)
    }

    pub fn set_replication_factor(&self, factor: usize) {
        self.replication_factor.store(factor, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bee::RcvContext;
    use crate::error::Result;
    use async_trait::async_trait;
    use waggle_types::Msg;

    struct Nop;

    #[async_trait]
    impl Handler for Nop {
        async fn rcv(&self, _ctx: &mut RcvContext, _msg: &Msg) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn handlers_are_returned_in_registration_order() {
        let app = App::new("Counter".to_string(), 1);
        let first: Arc<dyn Handler> = Arc::new(Nop);
        let second: Arc<dyn Handler> = Arc::new(Nop);
        app.handle("Incr", first.clone());
        app.handle("Incr", second.clone());

        let handlers = app.handlers_for("Incr");
        assert_eq!(handlers.len(), 2);
        assert!(Arc::ptr_eq(&handlers[0], &first));
        assert!(Arc::ptr_eq(&handlers[1], &second));
        assert!(app.handlers_for("Decr").is_empty());
    }

    #[test]
    fn replication_factor_can_be_overridden() {
        let app = App::new("Counter".to_string(), 1);
        assert_eq!(app.replication_factor(), 1);
        app.set_replication_factor(3);
        assert_eq!(app.replication_factor(), 3);
    }
}
