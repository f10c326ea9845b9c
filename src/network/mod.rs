//! Network module - Transport-facing plumbing for the relay
//!
//! Provides:
//! - Server: listener plus one worker per accepted connection
//! - RelayClient: connects to a relay and exchanges frames
//! - FrameConn/PeerHandle: framed stream wrapper and peer write handles
//!
//! The transport requirement is only a connection-oriented, reliable,
//! ordered byte stream; Tokio TCP provides it here and the frame plumbing
//! stays generic over `AsyncRead + AsyncWrite`.

mod client;
mod connection;
mod server;

pub use client::*;
pub use connection::*;
pub use server::*;

use std::net::SocketAddr;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Per-peer outbound queue depth before broadcast sends backpressure
    pub send_queue_depth: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            bind_address: None,
            send_queue_depth: 256,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
