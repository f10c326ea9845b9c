//! Dedup & broadcast engine
//!
//! Decides whether an inbound frame is novel for its player, updates the
//! session registry, and fans the raw frame bytes out to every registered
//! peer. Duplicate detection is advisory by default: a repeated sequence tag
//! is still broadcast, it just leaves the dedup state untouched. The gating
//! policy suppresses duplicate broadcasts instead.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use super::registry::Registry;
use crate::network::PeerHandle;
use crate::protocol::{InputFrame, PlayerId};

/// What a duplicate frame means for delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupPolicy {
    /// Duplicates are still broadcast; dedup state only drives logging
    #[default]
    Advisory,
    /// Duplicates are dropped before the broadcast step
    Gating,
}

/// Result of relaying one inbound frame
#[derive(Debug, Clone, Copy)]
pub struct RelayOutcome {
    pub player_id: PlayerId,
    pub frame_number: i32,
    /// False when the sequence tag matched the last accepted one
    pub novel: bool,
    /// Peers the frame was delivered to
    pub fanout: usize,
}

/// The relay core: one registry plus a dedup policy
#[derive(Clone, Default)]
pub struct Relay {
    registry: Registry,
    policy: DedupPolicy,
}

impl Relay {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            registry: Registry::new(),
            policy,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// Process one inbound frame: lazily create the sender's session, run
    /// the dedup check, and broadcast `raw` verbatim to every registered
    /// connection. A failed delivery evicts exactly that peer and never
    /// aborts delivery to the rest.
    pub async fn ingest(
        &self,
        frame: InputFrame,
        raw: Bytes,
        sender: &PeerHandle,
        sender_addr: SocketAddr,
    ) -> RelayOutcome {
        let last = self
            .registry
            .get_or_create(frame.player_id, sender, sender_addr)
            .await;

        let novel = last != Some(frame.sequence_tag);
        if novel {
            self.registry
                .update_sequence(frame.player_id, frame.sequence_tag)
                .await;
        } else {
            tracing::debug!(
                player = frame.player_id,
                seq = frame.sequence_tag,
                "duplicate frame"
            );
        }

        let mut fanout = 0;
        if novel || self.policy == DedupPolicy::Advisory {
            let targets = self.registry.snapshot_connections().await;
            fanout = self.broadcast(&raw, targets).await;
        }

        RelayOutcome {
            player_id: frame.player_id,
            frame_number: frame.frame_number,
            novel,
            fanout,
        }
    }

    /// Deliver `raw` to every target connection; returns the number of
    /// successful deliveries. A failed delivery evicts the target's session
    /// only while it is still bound to the snapshot's handle: the identity
    /// may have re-registered on a fresh connection since the snapshot was
    /// taken, and that successor session must survive.
    async fn broadcast(&self, raw: &Bytes, targets: Vec<(PlayerId, PeerHandle)>) -> usize {
        let mut fanout = 0;
        for (peer_id, handle) in targets {
            match handle.send(raw.clone()).await {
                Ok(()) => fanout += 1,
                Err(e) => {
                    tracing::warn!(player = peer_id, error = %e, "evicting unreachable peer");
                    handle.mark_disconnected();
                    self.registry.remove_if_bound(peer_id, &handle).await;
                }
            }
        }
        fanout
    }
}
