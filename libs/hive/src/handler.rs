//! Handler traits
//!
//! Handlers are the polymorphic units applications register per
//! (app, message type); several handlers may share a type and every one of
//! them sees each matching message. Detached handlers are background units
//! not driven by message delivery: they get an explicit start/stop bracket
//! around their message loop.

use crate::bee::RcvContext;
use crate::error::Result;
use async_trait::async_trait;
use waggle_types::Msg;

/// A message handler. `rcv` runs on the receiving bee's task, one message at
/// a time; it never executes concurrently with another handler of the same
/// bee, so bee-local state and the transaction record need no extra locking.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn rcv(&self, ctx: &mut RcvContext, msg: &Msg) -> Result<()>;
}

/// A background handler spawned through `start_detached` rather than
/// triggered by message delivery.
#[async_trait]
pub trait DetachedHandler: Send + Sync + 'static {
    /// Runs once when the detached bee starts, before any message.
    async fn start(&self, ctx: &mut RcvContext);

    /// Runs once when the detached bee stops.
    async fn stop(&self, ctx: &mut RcvContext);

    /// Handles messages addressed directly to the detached bee.
    async fn rcv(&self, ctx: &mut RcvContext, msg: &Msg) -> Result<()>;
}
