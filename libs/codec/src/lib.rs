//! Waggle Wire Codec
//!
//! Frame encoding for the bee-addressing wire protocol: every record on the
//! stream is a u32 big-endian length prefix followed by a bincode body. The
//! stream is self-delimiting, so a session can decode an unbounded sequence
//! of records without any out-of-band synchronization.
//!
//! The codec is record-agnostic: handshake (`RcvrId`), acknowledgment
//! (`bool`), and message (`Msg`) frames all go through the same two entry
//! points, [`write_frame`] and [`read_frame`].

pub mod error;
pub mod frame;

pub use error::{CodecError, Result};
pub use frame::{decode, encode, read_frame, write_frame, FrameReader, DEFAULT_MAX_FRAME_SIZE};
