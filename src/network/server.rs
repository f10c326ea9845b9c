//! Relay server
//!
//! Accepts connections and runs one worker per peer. A worker reads
//! fixed-size input frames, drives the dedup & broadcast engine, and drains
//! broadcast bytes from its peer channel onto the socket. Any read failure,
//! framing error, or write failure ends the worker and evicts every session
//! bound to its connection.

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};

use super::connection::{ConnectionError, FrameConn, PeerHandle};
use super::NetworkConfig;
use crate::protocol::{FrameCodec, FrameError, PlayerId};
use crate::relay::{Relay, RelayOptions};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("invalid relay options: {0}")]
    Options(#[from] FrameError),

    #[error("server already running")]
    AlreadyRunning,

    #[error("server not running")]
    NotRunning,

    #[error("bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server started
    Started { bind_addr: SocketAddr },
    /// A new peer has connected
    PeerConnected { addr: SocketAddr },
    /// A peer has disconnected
    PeerDisconnected { addr: SocketAddr, reason: String },
    /// One inbound frame was processed
    FrameRelayed {
        addr: SocketAddr,
        player_id: PlayerId,
        frame_number: i32,
        novel: bool,
        fanout: usize,
    },
    /// Server stopped
    Stopped,
}

/// The relay server
pub struct Server {
    /// Network configuration
    config: NetworkConfig,
    /// Frame codec shared by all workers
    codec: FrameCodec,
    /// Registry + dedup/broadcast engine
    relay: Relay,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal for the accept loop
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Shutdown signal fanned out to every peer worker
    peer_shutdown: broadcast::Sender<()>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
    /// Actual listen address once started
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Create a new server
    pub fn new(config: NetworkConfig, options: RelayOptions) -> ServerResult<Self> {
        let codec = options.codec()?;
        let (event_tx, event_rx) = mpsc::channel(256);
        let (peer_shutdown, _) = broadcast::channel(1);

        Ok(Self {
            config,
            codec,
            relay: Relay::new(options.dedup),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            peer_shutdown,
            running: Arc::new(RwLock::new(false)),
            local_addr: None,
        })
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// The relay core (registry access for diagnostics and tests)
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Listen address after `start`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Start the server
    pub async fn start(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_host = self.config.bind_address.as_deref().unwrap_or("0.0.0.0");
        let bind_addr = format!("{}:{}", bind_host, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        tracing::info!("Relay listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self
            .event_tx
            .send(ServerEvent::Started {
                bind_addr: local_addr,
            })
            .await;

        let codec = self.codec;
        let relay = self.relay.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();
        let queue_depth = self.config.send_queue_depth;
        let peer_shutdown = self.peer_shutdown.clone();

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);
                                if let Err(e) = stream.set_nodelay(true) {
                                    tracing::debug!("set_nodelay failed for {}: {}", addr, e);
                                }

                                let relay = relay.clone();
                                let event_tx = event_tx.clone();
                                let shutdown = peer_shutdown.subscribe();

                                tokio::spawn(async move {
                                    handle_peer(
                                        stream, addr, codec, relay, event_tx, queue_depth,
                                        shutdown,
                                    )
                                    .await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Relay shutdown requested");
                        break;
                    }
                }
            }

            let mut running = running.write().await;
            *running = false;

            let _ = event_tx.send(ServerEvent::Stopped).await;
        });

        Ok(())
    }

    /// Stop the server
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        // Tear down every live peer worker; each one closes its connection
        // and evicts its sessions on the way out.
        let _ = self.peer_shutdown.send(());

        Ok(())
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Run one peer connection to completion.
///
/// Generic over the stream so any reliable ordered transport (or an
/// in-memory duplex in tests) can stand in for TCP.
async fn handle_peer<S>(
    stream: S,
    addr: SocketAddr,
    codec: FrameCodec,
    relay: Relay,
    event_tx: mpsc::Sender<ServerEvent>,
    queue_depth: usize,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = FrameConn::new(stream, codec);

    // Broadcast writes for this peer arrive through the channel; the worker
    // is the only task that touches the socket.
    let (msg_tx, mut msg_rx) = mpsc::channel(queue_depth);
    let handle = PeerHandle::new(msg_tx);

    // Identities observed on this connection; sessions are created lazily
    // by the engine on first frame.
    let mut identities: Vec<PlayerId> = Vec::new();

    let _ = event_tx.send(ServerEvent::PeerConnected { addr }).await;

    let disconnect_reason = loop {
        tokio::select! {
            // Inbound frames from the peer
            result = conn.recv() => {
                match result {
                    Ok(Some((frame, raw))) => {
                        let outcome = relay.ingest(frame, raw, &handle, addr).await;
                        if !identities.contains(&outcome.player_id) {
                            identities.push(outcome.player_id);
                        }

                        tracing::debug!(
                            %addr,
                            player = outcome.player_id,
                            frame = outcome.frame_number,
                            novel = outcome.novel,
                            fanout = outcome.fanout,
                            "frame relayed"
                        );
                        let _ = event_tx.send(ServerEvent::FrameRelayed {
                            addr,
                            player_id: outcome.player_id,
                            frame_number: outcome.frame_number,
                            novel: outcome.novel,
                            fanout: outcome.fanout,
                        }).await;
                    }
                    Ok(None) => {
                        break "connection closed".to_string();
                    }
                    Err(e) => {
                        break format!("read error: {}", e);
                    }
                }
            }

            // Broadcast bytes destined for this peer
            Some(raw) = msg_rx.recv() => {
                if let Err(e) = conn.send_raw(&raw).await {
                    break format!("write error: {}", e);
                }
            }

            // Server shutdown (a dropped server counts too)
            _ = shutdown.recv() => {
                break "server shutting down".to_string();
            }
        }
    };

    // Eviction is symmetric: read and write failures both remove every
    // session bound to this connection, so no stale write target survives.
    handle.mark_disconnected();
    for player_id in identities {
        relay.registry().remove_if_bound(player_id, &handle).await;
    }

    let _ = event_tx
        .send(ServerEvent::PeerDisconnected {
            addr,
            reason: disconnect_reason,
        })
        .await;

    let _ = conn.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{IdentityMode, InputFrame, WireFormat};
    use crate::relay::DedupPolicy;
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn options() -> RelayOptions {
        RelayOptions {
            wire_format: WireFormat::Compact,
            identity: IdentityMode::SequenceParity,
            dedup: DedupPolicy::Advisory,
        }
    }

    fn encode(codec: &FrameCodec, frame_number: i32, sequence_tag: u32) -> BytesMut {
        let mut buf = BytesMut::new();
        codec.encode(
            &InputFrame {
                player_id: sequence_tag & 1,
                frame_number,
                sequence_tag,
            },
            &mut buf,
        );
        buf
    }

    async fn started_server() -> (Server, SocketAddr, mpsc::Receiver<ServerEvent>) {
        let mut server = Server::new(NetworkConfig::new(0), options()).unwrap();
        let events = server.take_event_receiver().unwrap();
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr, events)
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let (mut server, _addr, _events) = started_server().await;
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning)
        ));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_frames_fan_out_to_all_peers() {
        let codec = options().codec().unwrap();
        let (server, addr, _events) = started_server().await;

        let mut even = TcpStream::connect(addr).await.unwrap();
        let mut odd = TcpStream::connect(addr).await.unwrap();

        // Register both identities, then send one more frame from player 0.
        let f_even = encode(&codec, 1, 10);
        let f_odd = encode(&codec, 1, 11);
        even.write_all(&f_even).await.unwrap();

        let mut echo = [0u8; 6];
        even.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, &f_even[..]); // pass-through, byte-identical

        odd.write_all(&f_odd).await.unwrap();
        odd.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, &f_odd[..]);

        // Player 1's frame also reached player 0's connection.
        even.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, &f_odd[..]);

        assert_eq!(server.relay().registry().len().await, 2);
    }

    #[tokio::test]
    async fn test_truncated_frame_terminates_worker_without_broadcast() {
        let (server, addr, mut events) = started_server().await;

        let mut listener_peer = TcpStream::connect(addr).await.unwrap();
        let codec = options().codec().unwrap();
        let full = encode(&codec, 1, 10);
        listener_peer.write_all(&full).await.unwrap();
        let mut echo = [0u8; 6];
        listener_peer.read_exact(&mut echo).await.unwrap();

        // Second peer sends 3 of 6 bytes and closes.
        let mut broken = TcpStream::connect(addr).await.unwrap();
        broken.write_all(&[9, 9, 9]).await.unwrap();
        drop(broken);

        // The broken peer disconnects with a framing error and nothing is
        // broadcast for its partial frame.
        let reason = loop {
            match events.recv().await.unwrap() {
                ServerEvent::PeerDisconnected { reason, .. } => break reason,
                _ => continue,
            }
        };
        assert!(reason.contains("truncated"), "reason was: {}", reason);
        assert_eq!(server.relay().registry().len().await, 1);
    }

    #[tokio::test]
    async fn test_stop_tears_down_live_peers() {
        let codec = options().codec().unwrap();
        let (mut server, addr, mut events) = started_server().await;

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(&encode(&codec, 1, 10)).await.unwrap();
        let mut echo = [0u8; 6];
        peer.read_exact(&mut echo).await.unwrap();
        assert_eq!(server.relay().registry().len().await, 1);

        server.stop().await.unwrap();

        let (mut stopped, mut peer_gone) = (false, false);
        while !(stopped && peer_gone) {
            match events.recv().await.unwrap() {
                ServerEvent::Stopped => stopped = true,
                ServerEvent::PeerDisconnected { reason, .. } => {
                    assert!(reason.contains("shutting down"), "reason was: {}", reason);
                    peer_gone = true;
                }
                _ => {}
            }
        }
        assert!(server.relay().registry().is_empty().await);

        // A frame sent after shutdown is never relayed back: the peer sees
        // its connection closed instead of an echo.
        let _ = peer.write_all(&encode(&codec, 2, 12)).await;
        let mut buf = [0u8; 6];
        match peer.read(&mut buf).await {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("received {} bytes after stop", n),
        }
    }

    #[tokio::test]
    async fn test_disconnect_evicts_session() {
        let (server, addr, mut events) = started_server().await;
        let codec = options().codec().unwrap();

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(&encode(&codec, 1, 10)).await.unwrap();
        let mut echo = [0u8; 6];
        peer.read_exact(&mut echo).await.unwrap();
        assert_eq!(server.relay().registry().len().await, 1);

        drop(peer);
        loop {
            if let ServerEvent::PeerDisconnected { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        assert!(server.relay().registry().is_empty().await);
    }
}
