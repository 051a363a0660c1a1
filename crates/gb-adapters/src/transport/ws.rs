//! Websocket session with request/reply correlation.
//!
//! One reader task owns the receiving half. Frames that answer a pending
//! request resolve its waiter; everything else is forwarded, in arrival
//! order, to the adapter's inbound channel.

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use gb_core::GameKind;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{AdapterError, ParseError, Result};

/// Per-backend framing rules.
pub trait FrameCodec: Send + Sync + 'static {
    fn decode(&self, text: &str) -> Result<Value, ParseError>;

    /// Correlation key when `frame` answers a request, `None` for events.
    fn reply_key(&self, frame: &Value) -> Option<String>;
}

#[derive(Debug)]
pub enum Inbound {
    Frame(Value),
    Failed(AdapterError),
    Closed,
}

type Pending = Arc<DashMap<String, oneshot::Sender<Value>>>;

pub struct WsSession {
    game: GameKind,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Pending,
    reader: JoinHandle<()>,
}

impl WsSession {
    /// Opens the socket, giving up after `connect_timeout`.
    pub async fn connect<C: FrameCodec>(
        game: GameKind,
        url: &str,
        connect_timeout: Duration,
        codec: Arc<C>,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Result<Self> {
        let (stream, _) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| AdapterError::timeout(game, "connect", connect_timeout))?
            .map_err(|err| AdapterError::transport(game, err))?;
        info!(game = %game, "websocket connected");

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(DashMap::new());

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(err) = sink.send(msg).await {
                    warn!(game = %game, error = %err, "websocket send failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => match codec.decode(text.as_str()) {
                        Ok(frame) => {
                            let waiter = codec
                                .reply_key(&frame)
                                .and_then(|key| reader_pending.remove(&key));
                            match waiter {
                                Some((_, tx)) => {
                                    let _ = tx.send(frame);
                                }
                                None => {
                                    let _ = inbound.send(Inbound::Frame(frame));
                                }
                            }
                        }
                        Err(err) => {
                            let _ = inbound.send(Inbound::Failed(err.into()));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = inbound.send(Inbound::Failed(AdapterError::transport(game, err)));
                        break;
                    }
                }
            }
            debug!(game = %game, "websocket reader finished");
            // Dropping the senders wakes every waiter with NotConnected.
            reader_pending.clear();
            let _ = inbound.send(Inbound::Closed);
        });

        Ok(Self {
            game,
            outbound,
            pending,
            reader,
        })
    }

    pub fn is_open(&self) -> bool {
        !self.reader.is_finished() && !self.outbound.is_closed()
    }

    /// Sends `frame` and waits for the reply correlated by `key`.
    ///
    /// The waiter is deregistered when the deadline passes.
    pub async fn request(
        &self,
        key: String,
        frame: &Value,
        operation: &'static str,
        timeout: Duration,
    ) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        if self.outbound.send(Message::text(frame.to_string())).is_err() {
            self.pending.remove(&key);
            return Err(AdapterError::NotConnected { game: self.game });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(AdapterError::NotConnected { game: self.game }),
            Err(_) => {
                self.pending.remove(&key);
                Err(AdapterError::timeout(self.game, operation, timeout))
            }
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Sends a close frame and stops reading.
    pub fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
        self.reader.abort();
        self.pending.clear();
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        // The writer drains and exits once `outbound` is dropped.
        self.reader.abort();
    }
}

impl std::fmt::Debug for WsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSession")
            .field("game", &self.game)
            .field("open", &self.is_open())
            .field("pending", &self.pending.len())
            .finish()
    }
}
