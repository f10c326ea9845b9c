//! Relay module - session registry plus the dedup & broadcast engine
//!
//! This is the stateful core of the server: mapping player identities to
//! live connections, tracking last-seen sequence tags, and fanning accepted
//! frames out to every registered peer.

mod engine;
mod registry;

pub use engine::*;
pub use registry::*;

use crate::protocol::{FrameCodec, FrameError, IdentityMode, WireFormat};

/// How one relay deployment decodes frames and treats duplicates
#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Wire layout of inbound frames
    pub wire_format: WireFormat,
    /// Player identity derivation strategy
    pub identity: IdentityMode,
    /// Whether dedup gates delivery or only informs it
    pub dedup: DedupPolicy,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::Compact,
            identity: IdentityMode::SequenceParity,
            dedup: DedupPolicy::Advisory,
        }
    }
}

impl RelayOptions {
    /// Build the frame codec for these options, rejecting invalid
    /// format/identity combinations.
    pub fn codec(&self) -> Result<FrameCodec, FrameError> {
        FrameCodec::new(self.wire_format, self.identity)
    }
}
