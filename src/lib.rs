//! Floodgate - handshake admission control for a secure tunnel
//!
//! Gates entry into a tunnel's handshake protocol before any expensive
//! public-key work runs. Every inbound initiation must carry MAC1,
//! proving knowledge of the responder's public key; under load the
//! responder additionally demands MAC2, keyed on a short-lived cookie
//! that can only be obtained by receiving a reply at the claimed
//! source address.
//!
//! # Features
//!
//! - MAC1 verification on every handshake message, constant time
//! - Cookie minting and MAC2 enforcement while under load
//! - Time-rotated device cookie secret (2 minute window)
//! - Concurrent receiver-index table for routing replies
//!
//! # Usage
//!
//! ```
//! let responder = floodgate::Device::new();
//! let initiator = floodgate::Device::new();
//!
//! let (sk_r, pk_r) = floodgate::crypto::x25519::generate_keypair();
//! let (sk_i, pk_i) = floodgate::crypto::x25519::generate_keypair();
//! responder.set_private_key(sk_r);
//! initiator.set_private_key(sk_i);
//!
//! let responder_rec = initiator.new_peer(pk_r);
//! responder.new_peer(pk_i);
//!
//! let mut msg = [0u8; 148];
//! msg[0] = 1;
//! responder_rec.add_macs(&mut msg);
//! assert!(responder.check_mac1(&msg));
//! ```

pub mod crypto;
pub mod device;
pub mod error;
pub mod protocol;

pub use device::{Device, GateVerdict, Handshake, Peer};
pub use error::{FloodgateError, Result};
pub use protocol::messages::{CookieReply, MessageType};
