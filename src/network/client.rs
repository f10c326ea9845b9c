//! Relay client
//!
//! Connects to a relay server, sends per-tick input frames, and surfaces
//! every relayed frame as an event. Used by the `client` CLI subcommand and
//! the integration tests.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};

use super::connection::{ConnectionError, FrameConn};
use crate::protocol::{FrameCodec, FrameError, InputFrame};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("invalid relay options: {0}")]
    Options(#[from] FrameError),

    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Successfully connected to the relay
    Connected { server_addr: SocketAddr },
    /// Disconnected from the relay
    Disconnected { reason: String },
    /// A frame was relayed to us
    FrameReceived { frame: InputFrame, raw: Bytes },
}

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Disconnected,
    Connected,
}

/// A relay client
pub struct RelayClient {
    codec: FrameCodec,
    state: Arc<RwLock<ClientState>>,
    /// Event sender
    event_tx: mpsc::Sender<ClientEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    /// Outbound frames to the relay
    frame_tx: Arc<RwLock<Option<mpsc::Sender<InputFrame>>>>,
}

impl RelayClient {
    pub fn new(codec: FrameCodec) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            codec,
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            event_tx,
            event_rx: Some(event_rx),
            frame_tx: Arc::new(RwLock::new(None)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect to a relay server
    pub async fn connect(&self, server_addr: SocketAddr) -> ClientResult<()> {
        {
            let state = self.state.read().await;
            if *state == ClientState::Connected {
                return Err(ClientError::AlreadyConnected);
            }
        }

        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true).ok();
        let mut conn = FrameConn::new(stream, self.codec);

        let (frame_tx, mut frame_rx) = mpsc::channel::<InputFrame>(256);
        {
            let mut slot = self.frame_tx.write().await;
            *slot = Some(frame_tx);
        }
        {
            let mut state = self.state.write().await;
            *state = ClientState::Connected;
        }

        let _ = self
            .event_tx
            .send(ClientEvent::Connected { server_addr })
            .await;
        tracing::info!("Connected to relay at {}", server_addr);

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let frame_slot = self.frame_tx.clone();

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    result = conn.recv() => {
                        match result {
                            Ok(Some((frame, raw))) => {
                                let _ = event_tx.send(ClientEvent::FrameReceived { frame, raw }).await;
                            }
                            Ok(None) => break "connection closed".to_string(),
                            Err(e) => break format!("read error: {}", e),
                        }
                    }
                    outbound = frame_rx.recv() => {
                        match outbound {
                            Some(frame) => {
                                if let Err(e) = conn.send_frame(&frame).await {
                                    break format!("write error: {}", e);
                                }
                            }
                            // Sender side dropped: disconnect was requested.
                            None => break "disconnect requested".to_string(),
                        }
                    }
                }
            };

            {
                let mut state = state.write().await;
                *state = ClientState::Disconnected;
            }
            {
                let mut slot = frame_slot.write().await;
                *slot = None;
            }

            let _ = conn.close().await;
            let _ = event_tx.send(ClientEvent::Disconnected { reason }).await;
        });

        Ok(())
    }

    /// Send one input frame to the relay
    pub async fn send_frame(&self, frame: InputFrame) -> ClientResult<()> {
        let slot = self.frame_tx.read().await;
        let tx = slot.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(frame)
            .await
            .map_err(|_| ClientError::Connection(ConnectionError::SendChannelClosed))
    }

    /// Disconnect from the relay
    pub async fn disconnect(&self) -> ClientResult<()> {
        let mut slot = self.frame_tx.write().await;
        if slot.take().is_none() {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    /// Check if the client is connected
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ClientState::Connected
    }
}
