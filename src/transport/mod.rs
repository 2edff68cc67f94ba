//! Viewer-facing transport: one WebSocket endpoint, server push only

mod server;

pub use server::{TransportError, WsServer};

use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::mpsc::{self, error::TrySendError, Permit};
use tokio_tungstenite::tungstenite::Message;

pub type SessionId = u64;

/// Message queued for the connected viewer
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// JSON status report, sent as a text message
    Telemetry(String),
    /// One compressed image, sent as a binary message
    Frame(Bytes),
}

impl From<OutboundMessage> for Message {
    fn from(msg: OutboundMessage) -> Self {
        match msg {
            OutboundMessage::Telemetry(text) => Message::text(text),
            OutboundMessage::Frame(data) => Message::binary(data),
        }
    }
}

/// Handle to the single connected viewer.
///
/// Outbound messages go through a bounded queue drained by the connection
/// task; a full queue means the viewer cannot take more output right now.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl SessionHandle {
    pub fn new(id: SessionId, peer: SocketAddr, outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self { id, peer, outbound }
    }

    /// Creates a handle together with the receiving end of its queue
    pub fn channel(
        id: SessionId,
        peer: SocketAddr,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, peer, tx), rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reserves one slot in the outbound queue without blocking
    pub fn try_reserve(&self) -> Result<Permit<'_, OutboundMessage>, TrySendError<()>> {
        self.outbound.try_reserve()
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_message_conversion() {
        let text: Message = OutboundMessage::Telemetry("{}".to_string()).into();
        assert!(text.is_text());

        let bin: Message = OutboundMessage::Frame(Bytes::from_static(&[0xFF, 0xD8])).into();
        assert!(bin.is_binary());
        assert_eq!(bin.len(), 2);
    }

    #[test]
    fn test_full_queue_refuses_reservation() {
        let (handle, mut rx) = SessionHandle::channel(7, peer(), 1);
        assert_eq!(handle.id(), 7);

        let permit = handle.try_reserve().unwrap();
        permit.send(OutboundMessage::Telemetry("a".into()));
        assert!(matches!(handle.try_reserve(), Err(TrySendError::Full(()))));

        assert_eq!(rx.try_recv().unwrap(), OutboundMessage::Telemetry("a".into()));
        assert!(handle.try_reserve().is_ok());
    }

    #[test]
    fn test_dropped_receiver_closes_handle() {
        let (handle, rx) = SessionHandle::channel(1, peer(), 2);
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(handle.try_reserve(), Err(TrySendError::Closed(()))));
    }
}
