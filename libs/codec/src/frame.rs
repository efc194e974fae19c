//! Frame encoding and decoding
//!
//! One frame = u32 big-endian length prefix + bincode body. The reader
//! enforces a maximum body size before allocating; oversized frames are a
//! protocol violation, not an allocation.

use crate::error::{CodecError, Result};
use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Default cap on a single frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Serialize a record to its bincode body (no length prefix).
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a record from a frame body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(body)?)
}

/// Write one framed record to the stream and flush it.
pub async fn write_frame<W, T>(stream: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(value)?;
    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    trace!(bytes = body.len(), "wrote frame");
    Ok(())
}

/// Read one framed record from the stream, with the default size cap.
pub async fn read_frame<R, T>(stream: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
    reader.read(stream).await
}

/// Frame reader with a reusable body buffer, for session loops that decode
/// an unbounded sequence of records from one stream.
pub struct FrameReader {
    max_frame_size: usize,
    buffer: BytesMut,
}

impl FrameReader {
    /// Create a reader enforcing the given body-size cap.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            buffer: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Read and decode the next frame.
    pub async fn read<R, T>(&mut self, stream: &mut R) -> Result<T>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await?;
        let body_len = u32::from_be_bytes(len_bytes) as usize;

        if body_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_size,
            });
        }

        self.buffer.resize(body_len, 0);
        stream.read_exact(&mut self.buffer).await?;
        trace!(bytes = body_len, "read frame");

        decode(&self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waggle_types::{BeeId, Msg, RcvrId};

    #[tokio::test]
    async fn frames_cross_a_duplex_stream_in_order() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let rcvr = RcvrId::new("Counter", 7);
        let msg = Msg::new(
            "Incr",
            BeeId::nil(),
            BeeId::new("hive-1", "Counter", 7),
            vec![1, 2, 3],
        );

        write_frame(&mut client, &rcvr).await.unwrap();
        write_frame(&mut client, &msg).await.unwrap();

        let got_rcvr: RcvrId = read_frame(&mut server).await.unwrap();
        let got_msg: Msg = read_frame(&mut server).await.unwrap();
        assert_eq!(got_rcvr, rcvr);
        assert_eq!(got_msg, msg);
    }

    #[tokio::test]
    async fn bool_ack_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut server, &true).await.unwrap();
        let ack: bool = read_frame(&mut client).await.unwrap();
        assert!(ack);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocation() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Hand-written prefix announcing a body far over the cap.
        tokio::io::AsyncWriteExt::write_all(&mut client, &(1024u32 * 1024).to_be_bytes())
            .await
            .unwrap();

        let mut reader = FrameReader::new(512);
        let err = reader.read::<_, RcvrId>(&mut server).await.unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn closed_stream_reports_clean_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_frame::<_, RcvrId>(&mut server).await.unwrap_err();
        assert!(err.is_clean_eof());
    }
}
