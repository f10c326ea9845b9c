//! Input frame codec
//!
//! Two fixed-size little-endian wire formats are supported. A deployment
//! picks exactly one; mixing formats on one relay is unsupported.
//!
//! - `Tagged` (12 bytes): `player_id:i32`, `frame_number:i32`,
//!   `sequence_tag:u32`
//! - `Compact` (6 bytes): `frame_number:i32`, `sequence_tag:u16`
//!
//! Player identity is derived by a configurable strategy: either the
//! dedicated field of a tagged frame, or the parity of the sequence tag
//! (which caps the session at two players and exists for compatibility with
//! the compact format).

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Semantic player identity
pub type PlayerId = u32;

/// Codec errors
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("truncated frame: got {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },

    #[error("identity mode {mode:?} requires the tagged wire format")]
    IdentityUnsupported { mode: IdentityMode },
}

/// Wire layout of an input frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    /// 12-byte frame with a dedicated player identity field
    Tagged,
    /// 6-byte frame; identity must be derived from the sequence tag
    Compact,
}

impl WireFormat {
    /// Exact byte length of one frame in this format
    pub const fn frame_len(self) -> usize {
        match self {
            WireFormat::Tagged => 12,
            WireFormat::Compact => 6,
        }
    }
}

/// Strategy for mapping a decoded frame to a player identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityMode {
    /// `player_id = sequence_tag & 1`; at most two concurrent players
    SequenceParity,
    /// Identity comes from the frame's own field; any number of players
    FrameField,
}

/// One decoded per-tick input record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFrame {
    /// Derived or carried player identity
    pub player_id: PlayerId,
    /// Tick counter, for ordering and display only
    pub frame_number: i32,
    /// Drives identity derivation and duplicate detection
    pub sequence_tag: u32,
}

/// Stateless encoder/decoder for one wire format + identity strategy
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    format: WireFormat,
    identity: IdentityMode,
}

impl FrameCodec {
    /// Build a codec, rejecting strategy/format combinations that cannot
    /// work (the compact format carries no identity field).
    pub fn new(format: WireFormat, identity: IdentityMode) -> Result<Self, FrameError> {
        if identity == IdentityMode::FrameField && format != WireFormat::Tagged {
            return Err(FrameError::IdentityUnsupported { mode: identity });
        }
        Ok(Self { format, identity })
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn identity(&self) -> IdentityMode {
        self.identity
    }

    /// Exact byte length of one frame under this codec
    pub fn frame_len(&self) -> usize {
        self.format.frame_len()
    }

    /// Decode one frame from `buf`. Pure transform; decoding the same bytes
    /// twice yields the same result.
    pub fn decode(&self, buf: &[u8]) -> Result<InputFrame, FrameError> {
        let need = self.frame_len();
        if buf.len() < need {
            return Err(FrameError::Truncated {
                got: buf.len(),
                need,
            });
        }

        let mut buf = &buf[..need];
        let (field_id, frame_number, sequence_tag) = match self.format {
            WireFormat::Tagged => {
                let id = buf.get_i32_le();
                let frame = buf.get_i32_le();
                let tag = buf.get_u32_le();
                (id as PlayerId, frame, tag)
            }
            WireFormat::Compact => {
                let frame = buf.get_i32_le();
                let tag = u32::from(buf.get_u16_le());
                (0, frame, tag)
            }
        };

        let player_id = match self.identity {
            IdentityMode::SequenceParity => sequence_tag & 1,
            IdentityMode::FrameField => field_id,
        };

        Ok(InputFrame {
            player_id,
            frame_number,
            sequence_tag,
        })
    }

    /// Encode `frame` onto `buf` in this codec's wire format
    pub fn encode(&self, frame: &InputFrame, buf: &mut BytesMut) {
        match self.format {
            WireFormat::Tagged => {
                buf.put_i32_le(frame.player_id as i32);
                buf.put_i32_le(frame.frame_number);
                buf.put_u32_le(frame.sequence_tag);
            }
            WireFormat::Compact => {
                buf.put_i32_le(frame.frame_number);
                buf.put_u16_le(frame.sequence_tag as u16);
            }
        }
    }
}
