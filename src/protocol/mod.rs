//! Handshake admission protocol
//!
//! This module contains the core components of the gate:
//! - Message wire formats
//! - Per-peer MAC state for the outgoing path
//! - Device-side MAC1/MAC2 verification and cookie issuing
//! - Load detection
//! - Receiver-index routing table

pub mod cookie;
pub mod index;
pub mod load;
pub mod macs;
pub mod messages;

pub use cookie::CookieGate;
pub use index::{IndexEntry, IndexTable};
pub use load::LoadMonitor;
pub use macs::MacState;
pub use messages::{CookieReply, MessageType};

use std::time::Duration;

use crate::crypto::blake2s;

/// Label for MAC1 key derivation
pub const LABEL_MAC1: &[u8] = b"mac1----";

/// Label for cookie key derivation
pub const LABEL_COOKIE: &[u8] = b"cookie--";

/// Rotation interval of the device cookie secret, and validity window
/// of a cookie cached on the sending side (120 seconds)
pub const COOKIE_REFRESH: Duration = Duration::from_secs(120);

/// Compute the MAC1 key for a public key
///
/// mac1_key = HASH(LABEL_MAC1 || public_key)
///
/// The verifier keys this on its own public key; senders key it on the
/// responder's. Both sides arrive at the same value for the same key.
pub fn mac1_key(public: &[u8; 32]) -> [u8; 32] {
    blake2s::hash_two(LABEL_MAC1, public)
}

/// Compute the cookie-reply encryption key for a public key
///
/// cookie_key = HASH(LABEL_COOKIE || public_key)
pub fn cookie_key(public: &[u8; 32]) -> [u8; 32] {
    blake2s::hash_two(LABEL_COOKIE, public)
}
