//! State layer error types

use thiserror::Error;

/// Errors from the transactional state layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// `begin_tx` while the layer is already tracking a transaction.
    #[error("a transaction is already open")]
    TxAlreadyOpen,

    /// `commit_tx`/`abort_tx` without an open transaction.
    #[error("no transaction is open")]
    TxNotOpen,
}

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
