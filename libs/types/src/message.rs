//! Messages and shard keys
//!
//! `Msg` is the unit of communication between bees. It is immutable after
//! creation; one record is produced per emission. The payload is opaque
//! bytes; how applications encode their data is not this runtime's concern.

use crate::identity::{BeeId, DictName, MsgType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed message between bees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    /// Type tag used for handler dispatch.
    pub msg_type: MsgType,
    /// Sending bee, `BeeId::nil()` for messages injected from outside.
    pub from: BeeId,
    /// Receiving bee, `BeeId::nil()` for emitted (unrouted) messages.
    pub to: BeeId,
    /// Opaque application payload.
    pub data: Vec<u8>,
    no_reply: bool,
}

impl Msg {
    /// Create a routable message.
    pub fn new(msg_type: impl Into<MsgType>, from: BeeId, to: BeeId, data: Vec<u8>) -> Self {
        Self {
            msg_type: msg_type.into(),
            from,
            to,
            data,
            no_reply: false,
        }
    }

    /// Create a message that must not be replied to. `ReplyTo` on such a
    /// message fails without sending.
    pub fn no_reply_of(msg_type: impl Into<MsgType>, from: BeeId, to: BeeId, data: Vec<u8>) -> Self {
        Self {
            no_reply: true,
            ..Self::new(msg_type, from, to, data)
        }
    }

    /// Whether replies to this message are forbidden.
    pub fn no_reply(&self) -> bool {
        self.no_reply
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} -> {}, {}B)",
            self.msg_type,
            self.from,
            self.to,
            self.data.len()
        )
    }
}

/// Shard key identifying one state partition owned through the lock table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellKey {
    /// Dict the cell belongs to.
    pub dict: DictName,
    /// Key within the dict.
    pub key: String,
}

impl CellKey {
    pub fn new(dict: impl Into<DictName>, key: impl Into<String>) -> Self {
        Self {
            dict: dict.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.dict, self.key)
    }
}

/// The set of state partitions one operation touches.
pub type MappedCells = Vec<CellKey>;
