//! Protocol module - Defines the wire records exchanged with the relay
//!
//! Clients send fixed-size binary input frames, one per simulation tick.
//! The relay never inspects more than the fields it needs for identity
//! derivation and duplicate detection; frame bytes are forwarded verbatim.

mod frame;

pub use frame::*;

/// Default port for the relay listener
pub const DEFAULT_PORT: u16 = 10086;
