//! Operation log entries

use serde::{Deserialize, Serialize};
use std::fmt;
use waggle_types::DictName;

/// One entry of the ordered write log collected since `begin_tx`.
///
/// `value: None` records a delete. The log is minimal: a second write to the
/// same key replaces the earlier entry's value in place, so replaying the
/// log on a replica is idempotent and per-key order-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Op {
    pub dict: DictName,
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl Op {
    /// A put of `value` under `dict[key]`.
    pub fn put(dict: impl Into<DictName>, key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            dict: dict.into(),
            key: key.into(),
            value: Some(value),
        }
    }

    /// A delete of `dict[key]`.
    pub fn del(dict: impl Into<DictName>, key: impl Into<String>) -> Self {
        Self {
            dict: dict.into(),
            key: key.into(),
            value: None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "put {}[{}] ({}B)", self.dict, self.key, v.len()),
            None => write!(f, "del {}[{}]", self.dict, self.key),
        }
    }
}
