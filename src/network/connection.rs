//! Connection handling for the relay
//!
//! `FrameConn` wraps a reliable ordered byte stream and yields exactly
//! wire-sized input frames. `PeerHandle` is the cloneable write side stored
//! in the session registry; broadcast writes travel through its channel and
//! are drained onto the socket by the owning connection worker.

use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::protocol::{FrameCodec, FrameError, InputFrame};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("connection closed")]
    Closed,

    #[error("send channel closed")]
    SendChannelClosed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// A reliable byte stream carrying fixed-size input frames
pub struct FrameConn<S> {
    stream: S,
    codec: FrameCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameConn<S> {
    pub fn new(stream: S, codec: FrameCodec) -> Self {
        Self {
            stream,
            codec,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(64),
        }
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Receive the next frame along with its raw bytes.
    ///
    /// Returns `Ok(None)` on a clean close at a frame boundary. A close in
    /// the middle of a frame is a framing error: the partial record must
    /// never be decoded or forwarded.
    pub async fn recv(&mut self) -> ConnectionResult<Option<(InputFrame, Bytes)>> {
        let frame_len = self.codec.frame_len();
        loop {
            if self.read_buf.len() >= frame_len {
                let raw = self.read_buf.split_to(frame_len).freeze();
                let frame = self.codec.decode(&raw)?;
                return Ok(Some((frame, raw)));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None); // Clean close
                }
                return Err(ConnectionError::Frame(FrameError::Truncated {
                    got: self.read_buf.len(),
                    need: frame_len,
                }));
            }

            self.read_buf.extend_from_slice(&buf[..n]);
        }
    }

    /// Write raw frame bytes verbatim
    pub async fn send_raw(&mut self, raw: &[u8]) -> ConnectionResult<()> {
        self.stream.write_all(raw).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Encode and send one frame
    pub async fn send_frame(&mut self, frame: &InputFrame) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.codec.encode(frame, &mut self.write_buf);

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream
    pub async fn close(&mut self) -> ConnectionResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// A handle for delivering broadcast bytes to one peer connection
#[derive(Clone, Debug)]
pub struct PeerHandle {
    sender: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
}

impl PeerHandle {
    pub fn new(sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            sender,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Queue raw frame bytes for delivery to this peer
    pub async fn send(&self, raw: Bytes) -> ConnectionResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        self.sender
            .send(raw)
            .await
            .map_err(|_| ConnectionError::SendChannelClosed)
    }

    /// Check if the peer connection is still active
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Mark the peer as disconnected; subsequent sends fail fast
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Whether `other` writes to the same underlying connection
    pub fn same_peer(&self, other: &PeerHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{IdentityMode, WireFormat};

    fn compact_codec() -> FrameCodec {
        FrameCodec::new(WireFormat::Compact, IdentityMode::SequenceParity).unwrap()
    }

    #[tokio::test]
    async fn test_recv_round_trip() {
        let (a, b) = tokio::io::duplex(256);
        let mut sender = FrameConn::new(a, compact_codec());
        let mut receiver = FrameConn::new(b, compact_codec());

        let frame = InputFrame {
            player_id: 0,
            frame_number: 3,
            sequence_tag: 10,
        };
        sender.send_frame(&frame).await.unwrap();

        let (got, raw) = receiver.recv().await.unwrap().unwrap();
        assert_eq!(got, frame);
        assert_eq!(raw.len(), 6);
    }

    #[tokio::test]
    async fn test_partial_frame_is_framing_error() {
        let (mut a, b) = tokio::io::duplex(256);
        let mut receiver = FrameConn::new(b, compact_codec());

        // 4 of 6 bytes, then close
        a.write_all(&[1, 0, 0, 0]).await.unwrap();
        drop(a);

        match receiver.recv().await {
            Err(ConnectionError::Frame(FrameError::Truncated { got, need })) => {
                assert_eq!(got, 4);
                assert_eq!(need, 6);
            }
            other => panic!("expected framing error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_clean_close_at_boundary() {
        let (a, b) = tokio::io::duplex(256);
        let mut receiver = FrameConn::new(b, compact_codec());
        drop(a);

        assert!(receiver.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handle_fails_after_disconnect() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = PeerHandle::new(tx);
        assert!(handle.is_connected());

        handle.mark_disconnected();
        assert!(matches!(
            handle.send(Bytes::from_static(b"x")).await,
            Err(ConnectionError::Closed)
        ));
    }
}
