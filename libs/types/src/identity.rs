//! Bee and hive identities
//!
//! A bee is one actor instance of an app hosted on a hive. Instance ids are
//! assigned by the app's control loop and are plain `u64`s; the wire
//! handshake addresses a bee with the `RcvrId` record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One node/process hosting bees.
pub type HiveId = String;

/// A named application (its handlers and placement policy).
pub type AppName = String;

/// Message type tag resolved against the per-app handler registry.
pub type MsgType = String;

/// Name of one partitioned key-value dict.
pub type DictName = String;

/// Identity of one actor instance. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeeId {
    /// Hosting node.
    pub hive: HiveId,
    /// Owning app.
    pub app: AppName,
    /// Instance id within the app, assigned by the control loop.
    pub id: u64,
}

impl BeeId {
    /// Create a bee identity.
    pub fn new(hive: impl Into<HiveId>, app: impl Into<AppName>, id: u64) -> Self {
        Self {
            hive: hive.into(),
            app: app.into(),
            id,
        }
    }

    /// The "no bee" value used as the sender of system messages and the
    /// recipient of emitted (unrouted) messages.
    pub fn nil() -> Self {
        Self {
            hive: HiveId::new(),
            app: AppName::new(),
            id: 0,
        }
    }

    /// True for the `nil()` value.
    pub fn is_nil(&self) -> bool {
        self.hive.is_empty() && self.app.is_empty()
    }
}

impl fmt::Display for BeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "bee-nil")
        } else {
            write!(f, "{}/{}/{}", self.hive, self.app, self.id)
        }
    }
}

/// Wire record sent at connection start to address a bee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcvrId {
    /// Target app.
    pub app_name: AppName,
    /// Instance id within the app.
    pub id: u64,
}

impl RcvrId {
    pub fn new(app_name: impl Into<AppName>, id: u64) -> Self {
        Self {
            app_name: app_name.into(),
            id,
        }
    }
}

impl fmt::Display for RcvrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_bee_id_is_recognized() {
        assert!(BeeId::nil().is_nil());
        assert!(!BeeId::new("hive-1", "Counter", 7).is_nil());
    }

    #[test]
    fn bee_id_display() {
        let id = BeeId::new("hive-1", "Counter", 7);
        assert_eq!(id.to_string(), "hive-1/Counter/7");
        assert_eq!(BeeId::nil().to_string(), "bee-nil");
    }

    #[test]
    fn rcvr_id_roundtrips_through_serde() {
        let id = RcvrId::new("Counter", 7);
        let json = serde_json::to_string(&id).unwrap();
        let back: RcvrId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
