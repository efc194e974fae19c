//! Runtime Error Types
//!
//! Error handling for the stage server, control loops, and the per-bee
//! transaction machine. Session-level faults stay on one connection,
//! control-loop faults return synchronously to a single caller, and only
//! post-replication local faults (`LocalCommit`) escalate beyond one bee;
//! [`HiveError::is_fatal`] marks them.

use thiserror::Error;
use waggle_types::{AppName, CellKey};

/// Main runtime error type.
#[derive(Error, Debug)]
pub enum HiveError {
    /// Network connectivity errors.
    #[error("network error: {message}")]
    Network { message: String },

    /// Wire protocol violations beyond what the codec reports.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A control-loop round trip could not complete (loop stopped or its
    /// queue closed).
    #[error("control loop unavailable: {message}")]
    ControlLoop { message: String },

    /// The handshake named a bee this node does not host. Never reported to
    /// the peer; the connection is closed silently.
    #[error("unknown receiver: {app}/{id}")]
    UnknownReceiver { app: AppName, id: u64 },

    /// `begin_tx` while a transaction is already open.
    #[error("transaction conflict: {message}")]
    TxConflict { message: String },

    /// The transaction was begun under an epoch the colony has since left.
    #[error("generation mismatch: transaction began at {tx_generation}, colony is at {colony_generation}")]
    GenerationMismatch {
        tx_generation: u64,
        colony_generation: u64,
    },

    /// Quorum was not reached; the transaction rolls back cleanly.
    #[error("replication failed: {message}")]
    Replication { message: String },

    /// Local apply failed after replicas accepted the transaction. State may
    /// diverge from the replicas; this is a whole-node condition.
    #[error("local commit fault after replication: {message}")]
    LocalCommit { message: String },

    /// A shard cell is owned by another colony.
    #[error("lock conflict on cell {cell}")]
    LockConflict { cell: CellKey },

    /// `reply_to` on a message flagged no-reply.
    #[error("cannot reply to a no-reply message")]
    NoReply,

    /// State layer errors.
    #[error("state error: {0}")]
    State(#[from] waggle_state::StateError),

    /// Frame encoding/decoding errors.
    #[error("codec error: {0}")]
    Codec(#[from] waggle_codec::CodecError),

    /// Generic I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, HiveError>;

impl HiveError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a control-loop error.
    pub fn control_loop(message: impl Into<String>) -> Self {
        Self::ControlLoop {
            message: message.into(),
        }
    }

    /// Create a transaction conflict error.
    pub fn tx_conflict(message: impl Into<String>) -> Self {
        Self::TxConflict {
            message: message.into(),
        }
    }

    /// Create a replication failure.
    pub fn replication(message: impl Into<String>) -> Self {
        Self::Replication {
            message: message.into(),
        }
    }

    /// Create a post-replication local commit fault.
    pub fn local_commit(message: impl Into<String>) -> Self {
        Self::LocalCommit {
            message: message.into(),
        }
    }

    /// True for faults that must escalate beyond the failing bee: the node
    /// risks diverging from replicas that already accepted the transaction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HiveError::LocalCommit { .. })
    }

    /// Error category for log labels.
    pub fn category(&self) -> &'static str {
        match self {
            HiveError::Network { .. } => "network",
            HiveError::Protocol { .. } => "protocol",
            HiveError::Configuration { .. } => "configuration",
            HiveError::ControlLoop { .. } => "control_loop",
            HiveError::UnknownReceiver { .. } => "unknown_receiver",
            HiveError::TxConflict { .. } => "tx_conflict",
            HiveError::GenerationMismatch { .. } => "generation_mismatch",
            HiveError::Replication { .. } => "replication",
            HiveError::LocalCommit { .. } => "local_commit",
            HiveError::LockConflict { .. } => "lock_conflict",
            HiveError::NoReply => "no_reply",
            HiveError::State(_) => "state",
            HiveError::Codec(_) => "codec",
            HiveError::Io(_) => "io",
        }
    }
}
