//! Waggle Core Types
//!
//! Shared type definitions for the waggle actor runtime: bee and hive
//! identities, the wire-visible handshake and message records, shard keys
//! for ownership locking, and colony (replica set) descriptions.
//!
//! These types are deliberately dependency-light so every other crate in the
//! workspace can use them. Wire-visible records derive serde traits; the
//! encoding itself lives in `waggle-codec`.

pub mod colony;
pub mod identity;
pub mod message;

pub use colony::Colony;
pub use identity::{AppName, BeeId, DictName, HiveId, MsgType, RcvrId};
pub use message::Msg;
pub use message::{CellKey, MappedCells};
