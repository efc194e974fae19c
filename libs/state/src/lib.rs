//! Waggle State Layer
//!
//! Named partitioned key-value mappings ("dicts") with transactional
//! tracking. The transaction machine in `waggle-hive` drives this layer
//! through the [`TxState`] contract: begin buffers subsequent writes, commit
//! applies them to the base maps, abort discards them. While a transaction
//! is open the layer accumulates an ordered, minimal operation log (one op
//! per touched key, last value wins) suitable for replication and replay.
//!
//! A bee processes one message at a time, so its state is never mutated
//! concurrently; the interior lock only makes the handles shareable across
//! the bee task and its context.

pub mod dict;
pub mod error;
pub mod ops;

pub use dict::{Dict, InMemState, TxState, TxStatus};
pub use error::{Result, StateError};
pub use ops::Op;
