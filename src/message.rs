//! Message model
//!
//! A [`MessageContext`] is built once per inbound datagram, immediately
//! before the first pipeline stage runs, and dropped when the run settles.
//! Stages reply through the [`SessionHandle`], a non-owning reference to
//! the session's outbound socket: it can never keep the session alive or
//! control its lifecycle.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::net::UdpSocket;
use uuid::Uuid;

use crate::error::{Error, Result};

/// One decoded inbound datagram, as seen by pipeline stages.
#[derive(Debug)]
pub struct MessageContext {
    /// Fresh v4 UUID, for correlation and logging only.
    pub message_id: Uuid,
    /// Capture time at decode, milliseconds since epoch.
    pub timestamp_ms: i64,
    /// Ordered token sequence; empty tokens from consecutive delimiters
    /// are preserved. Stages may mutate this for downstream stages.
    pub content: Vec<String>,
    /// Address the datagram arrived from.
    pub peer: SocketAddr,
    /// Reply path toward the configured peer.
    pub handle: SessionHandle,
}

impl MessageContext {
    pub(crate) fn new(content: Vec<String>, peer: SocketAddr, handle: SessionHandle) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp_ms: Utc::now().timestamp_millis(),
            content,
            peer,
            handle,
        }
    }
}

/// Cloneable, non-owning send path for a running session.
///
/// Holds only a [`Weak`] reference to the outbound socket; once the owning
/// [`crate::Client`] tears the session down, every send through an
/// outstanding handle fails with [`Error::SessionClosed`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    socket: Weak<UdpSocket>,
    peer: SocketAddr,
}

impl SessionHandle {
    pub(crate) fn new(socket: Weak<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    /// Best-effort single send of a UTF-8 payload to the configured peer.
    pub async fn send(&self, payload: &str) -> Result<usize> {
        let socket = self.socket.upgrade().ok_or(Error::SessionClosed)?;
        socket
            .send(payload.as_bytes())
            .await
            .map_err(|e| Error::transport("send", e))
    }

    /// Address of the configured peer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the owning session still holds its outbound socket.
    pub fn is_open(&self) -> bool {
        self.socket.strong_count() > 0
    }

    pub(crate) fn from_socket(socket: &Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self::new(Arc::downgrade(socket), peer)
    }
}

#[cfg(test)]
pub(crate) fn test_context(tokens: &[&str]) -> MessageContext {
    let peer: SocketAddr = "127.0.0.1:11235".parse().unwrap();
    MessageContext::new(
        tokens.iter().map(|t| t.to_string()).collect(),
        peer,
        SessionHandle::new(Weak::new(), peer),
    )
}
