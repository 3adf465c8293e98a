//! Socket transport behind [`FeedConnection`](super::FeedConnection).
//!
//! A [`Connector`] opens a socket and hands back a [`SocketHandle`]: an
//! outbound command channel plus an inbound event channel. The live
//! implementation pumps a tungstenite stream; [`ChannelConnector`] keeps
//! both ends in memory for replaying recorded sessions.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::codec::{Command, Confirmation, EventFrame};
use crate::error::FeedError;
use crate::orderbook::ProductId;

/// Something the socket reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame.
    Message(String),
    /// Transport failure. The socket is unusable afterwards.
    Error(String),
    /// The socket closed.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Something to write to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A text frame.
    Text(String),
    /// Start the close handshake.
    Close,
}

impl Outgoing {
    /// Decode a text frame as a subscription command.
    pub fn command(&self) -> Option<Command> {
        match self {
            Outgoing::Text(text) => serde_json::from_str(text).ok(),
            Outgoing::Close => None,
        }
    }
}

/// Local end of an open socket.
#[derive(Debug)]
pub struct SocketHandle {
    /// Frames to write.
    pub outgoing: mpsc::UnboundedSender<Outgoing>,
    /// Events read.
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

impl SocketHandle {
    /// A connected handle and the peer end that drives it.
    pub fn pair() -> (SocketHandle, PeerSocket) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            SocketHandle {
                outgoing: outgoing_tx,
                events: events_rx,
            },
            PeerSocket {
                outgoing: outgoing_rx,
                events: events_tx,
            },
        )
    }
}

/// Remote end of a [`SocketHandle`].
#[derive(Debug)]
pub struct PeerSocket {
    outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl PeerSocket {
    /// Next frame written by the local end. `None` once it is dropped.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.outgoing.recv().await
    }

    /// Next subscription command, skipping anything else.
    pub async fn next_command(&mut self) -> Option<Command> {
        while let Some(out) = self.outgoing.recv().await {
            if let Some(command) = out.command() {
                return Some(command);
            }
        }
        None
    }

    /// Deliver a text frame. Returns false once the local end is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_event(SocketEvent::Message(text.into()))
    }

    /// Deliver a confirmation frame.
    pub fn confirm(&self, confirmation: Confirmation, feed: &str, product_id: &ProductId) -> bool {
        match serde_json::to_string(&EventFrame::confirmation(confirmation, feed, product_id)) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Deliver a close event.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.send_event(SocketEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        })
    }

    /// Deliver any event.
    pub fn send_event(&self, event: SocketEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// Opens sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`.
    async fn open(&self, url: &str) -> Result<SocketHandle, FeedError>;
}

/// WebSocket connector over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<SocketHandle, FeedError> {
        info!(url = %url, "Connecting to WebSocket");

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| FeedError::Connection(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let write_errors = events_tx.clone();
        tokio::spawn(async move {
            while let Some(out) = outgoing_rx.recv().await {
                let (message, closing) = match out {
                    Outgoing::Text(text) => (Message::Text(text), false),
                    Outgoing::Close => (Message::Close(None), true),
                };
                if let Err(e) = write.send(message).await {
                    error!(error = %e, "WebSocket write failed");
                    let _ = write_errors.send(SocketEvent::Error(e.to_string()));
                    return;
                }
                if closing {
                    return;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => SocketEvent::Message(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => SocketEvent::Message(text),
                        Err(_) => {
                            debug!("Ignoring non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Ping(_)) => {
                        debug!("Received ping");
                        continue;
                    }
                    Ok(Message::Pong(_)) => {
                        debug!("Received pong");
                        continue;
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                            None => (None, String::new()),
                        };
                        info!(code = ?code, reason = %reason, "WebSocket closed");
                        let _ = events_tx.send(SocketEvent::Closed { code, reason });
                        return;
                    }
                    Ok(Message::Frame(_)) => continue,
                    Err(e) => {
                        warn!(error = %e, "WebSocket error");
                        let _ = events_tx.send(SocketEvent::Error(e.to_string()));
                        return;
                    }
                };
                if events_tx.send(event).is_err() {
                    return;
                }
            }
            let _ = events_tx.send(SocketEvent::Closed {
                code: None,
                reason: "stream ended".to_string(),
            });
        });

        Ok(SocketHandle {
            outgoing: outgoing_tx,
            events: events_rx,
        })
    }
}

/// In-memory connector. Every successful `open` hands the peer end of a
/// fresh [`SocketHandle::pair`] to the receiver returned by [`new`](Self::new).
#[derive(Debug)]
pub struct ChannelConnector {
    peers: mpsc::UnboundedSender<PeerSocket>,
    fail_next: Mutex<Option<FeedError>>,
}

impl ChannelConnector {
    /// Connector plus the stream of peers it opens.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerSocket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                fail_next: Mutex::new(None),
            },
            rx,
        )
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next(&self, error: FeedError) {
        match self.fail_next.lock() {
            Ok(mut slot) => *slot = Some(error),
            Err(poisoned) => *poisoned.into_inner() = Some(error),
        }
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn open(&self, url: &str) -> Result<SocketHandle, FeedError> {
        let failure = match self.fail_next.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let (handle, peer) = SocketHandle::pair();
        self.peers
            .send(peer)
            .map_err(|_| FeedError::Connection(format!("no peer listening for {url}")))?;
        Ok(handle)
    }
}
