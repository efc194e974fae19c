//! Stage: the node's network server
//!
//! One listener per hive. Each accepted connection is served on its own
//! task and never blocks new accepts. The per-connection protocol:
//!
//! 1. Decode one `RcvrId` and resolve it through the app's control loop.
//! 2. Unresolved: close the connection with no response. The peer learns of
//!    the rejection only by the disconnect; no negative acknowledgment is
//!    part of the wire contract.
//! 3. Resolved: write one framed `true`, then decode an unbounded sequence
//!    of `Msg` frames, enqueueing each (message, handler) pair into the
//!    receiver's queue. Handler lists are resolved once per session per
//!    message type and cached.
//! 4. A decode failure ends only that session; reconnecting is the peer's
//!    responsibility.

use crate::error::{HiveError, Result};
use crate::handler::Handler;
use crate::hive::Hive;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use waggle_codec::{write_frame, FrameReader};
use waggle_types::{Msg, MsgType, RcvrId};

/// The listener-owning network server of one hive.
#[derive(Debug)]
pub struct Stage {
    listener: TcpListener,
    max_frame_size: usize,
}

impl Stage {
    /// Bind the listener. This is the only fatal startup condition.
    pub async fn bind(addr: SocketAddr, max_frame_size: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HiveError::network(format!("cannot bind listener on {addr}: {e}")))?;
        info!(addr = %addr, "stage listening");
        Ok(Self {
            listener,
            max_frame_size,
        })
    }

    /// The bound address; differs from the configured one when port 0 was
    /// requested.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the hive shuts down.
    pub(crate) async fn serve(self, hive: Hive) {
        let mut shutdown = hive.shutdown_signal();
        loop {
            // Re-check at the top so a shutdown signalled before this task
            // first polled is not lost.
            if *shutdown.borrow() {
                info!("stage shutting down");
                return;
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "accepted connection");
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                        }
                        let hive = hive.clone();
                        let max_frame_size = self.max_frame_size;
                        tokio::spawn(async move {
                            handle_conn(hive, stream, peer, max_frame_size).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "error in accept");
                    }
                },
            }
        }
    }
}

/// Serve one session. Returning closes the connection; every rejection path
/// before the acknowledgment is deliberately silent on the wire.
async fn handle_conn(hive: Hive, mut stream: TcpStream, peer: SocketAddr, max_frame_size: usize) {
    let mut reader = FrameReader::new(max_frame_size);

    let rcvr: RcvrId = match reader.read(&mut stream).await {
        Ok(rcvr) => rcvr,
        Err(e) => {
            warn!(peer = %peer, error = %e, "cannot decode handshake");
            return;
        }
    };

    let Some(app) = hive.app(&rcvr.app_name) else {
        warn!(peer = %peer, rcvr = %rcvr, "cannot find app; rejecting");
        return;
    };
    let Some(qee) = hive.qee(&rcvr.app_name) else {
        warn!(peer = %peer, rcvr = %rcvr, "no control loop for app; rejecting");
        return;
    };

    let bee = match qee.find_receiver(rcvr.id).await {
        Ok(Some(bee)) => bee,
        Ok(None) => {
            warn!(peer = %peer, rcvr = %rcvr, "cannot find receiver; rejecting");
            return;
        }
        Err(e) => {
            warn!(peer = %peer, rcvr = %rcvr, error = %e, "receiver resolution failed");
            return;
        }
    };

    if let Err(e) = write_frame(&mut stream, &true).await {
        warn!(peer = %peer, error = %e, "cannot acknowledge handshake");
        return;
    }
    debug!(peer = %peer, bee = %bee.id(), "session established");

    // Handler lists are resolved once per message type for this session.
    let mut handlers: HashMap<MsgType, Vec<Arc<dyn Handler>>> = HashMap::new();
    loop {
        let msg: Msg = match reader.read(&mut stream).await {
            Ok(msg) => msg,
            Err(e) if e.is_clean_eof() => {
                debug!(peer = %peer, "session closed by peer");
                return;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "cannot decode message; dropping session");
                return;
            }
        };

        if let Some(fixed) = bee.fixed_handler() {
            if bee.enqueue(msg, fixed).await.is_err() {
                warn!(peer = %peer, bee = %bee.id(), "receiver gone; dropping session");
                return;
            }
            continue;
        }

        let matched = handlers
            .entry(msg.msg_type.clone())
            .or_insert_with(|| app.handlers_for(&msg.msg_type));
        if matched.is_empty() {
            debug!(peer = %peer, msg_type = %msg.msg_type, "no handler registered; message dropped");
            continue;
        }

        for handler in matched.iter() {
            if bee.enqueue(msg.clone(), handler.clone()).await.is_err() {
                warn!(peer = %peer, bee = %bee.id(), "receiver gone; dropping session");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binding_port_zero_yields_a_concrete_address() {
        let stage = Stage::bind("127.0.0.1:0".parse().unwrap(), 1024)
            .await
            .unwrap();
        let addr = stage.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn binding_an_occupied_port_fails() {
        let first = Stage::bind("127.0.0.1:0".parse().unwrap(), 1024)
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();

        let err = Stage::bind(addr, 1024).await.unwrap_err();
        assert_eq!(err.category(), "network");
    }
}
