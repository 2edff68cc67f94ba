use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};

use super::{OutboundMessage, SessionHandle, SessionId};
use crate::service::{ServiceEvent, ServiceHandle};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// WebSocket endpoint admitting at most one viewer at a time.
///
/// Connection and close events are forwarded to the service loop; a second
/// viewer arriving while one is connected is closed with code 1013.
pub struct WsServer {
    listener: TcpListener,
    events: ServiceHandle,
    outbound_queue: usize,
    active: Arc<Mutex<Option<SessionId>>>,
    session_counter: AtomicU64,
}

impl WsServer {
    pub async fn bind(
        addr: &str,
        events: ServiceHandle,
        outbound_queue: usize,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            events,
            outbound_queue,
            active: Arc::new(Mutex::new(None)),
            session_counter: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the task is dropped
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept TCP connection");
                    continue;
                }
            };

            let session_id = self.session_counter.fetch_add(1, Ordering::SeqCst);
            let viewer = ViewerConnection {
                id: session_id,
                peer,
                events: self.events.clone(),
                outbound_queue: self.outbound_queue,
                active: Arc::clone(&self.active),
            };

            tokio::spawn(viewer.serve(stream));
        }
    }
}

struct ViewerConnection {
    id: SessionId,
    peer: SocketAddr,
    events: ServiceHandle,
    outbound_queue: usize,
    active: Arc<Mutex<Option<SessionId>>>,
}

impl ViewerConnection {
    async fn serve(self, stream: TcpStream) {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(session_id = self.id, peer = %self.peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let admitted = {
            let mut active = self.active.lock();
            if active.is_some() {
                false
            } else {
                *active = Some(self.id);
                true
            }
        };

        if !admitted {
            warn!(session_id = self.id, peer = %self.peer, "Viewer already connected, rejecting");
            reject(ws).await;
            return;
        }

        info!(session_id = self.id, peer = %self.peer, "Viewer connected");

        let (handle, mut outbound) = SessionHandle::channel(self.id, self.peer, self.outbound_queue);
        self.events.send(ServiceEvent::Connected(handle));

        match pump(ws, &mut outbound).await {
            Ok(()) => info!(session_id = self.id, "Viewer disconnected"),
            Err(e) => info!(session_id = self.id, error = %e, "Viewer connection lost"),
        }

        // Closed is queued while the slot is still held, so the next
        // viewer's Connected can never overtake it.
        let mut active = self.active.lock();
        self.events.send(ServiceEvent::Closed(self.id));
        if *active == Some(self.id) {
            *active = None;
        }
    }
}

/// Moves queued messages to the socket until either side closes
async fn pump(
    mut ws: WebSocketStream<TcpStream>,
    outbound: &mut mpsc::Receiver<OutboundMessage>,
) -> Result<(), tungstenite::Error> {
    loop {
        tokio::select! {
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                // server push only; pings are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
            },
            queued = outbound.recv() => match queued {
                Some(msg) => ws.send(msg.into()).await?,
                None => {
                    debug!("Outbound queue closed, closing viewer socket");
                    let _ = ws.close(None).await;
                    return Ok(());
                }
            },
        }
    }
}

async fn reject(mut ws: WebSocketStream<TcpStream>) {
    let frame = CloseFrame {
        code: CloseCode::Again,
        reason: "another viewer is connected".into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(error = %e, "Failed to close rejected viewer");
    }
}
