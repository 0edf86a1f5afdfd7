//! Per-peer MAC state for the outgoing path
//!
//! Every outgoing handshake message gets MAC1. MAC2 is only written
//! while a cookie obtained from the responder is still fresh; without
//! one the field is zero-filled, which tells a loaded responder to
//! answer with a cookie reply instead of processing the handshake.

use std::time::Instant;

use crate::crypto::{aead, blake2s};
use crate::crypto::blake2s::MAC_LEN;
use crate::protocol::messages::{CookieReply, MACS_LEN};
use crate::protocol::{cookie_key, mac1_key, COOKIE_REFRESH};

/// MAC state for one (local, peer) key pair
///
/// The two derived keys are pure functions of the peer's public key and
/// never change for the peer's lifetime. The cookie and the last MAC1
/// sent are the only mutable fields.
pub struct MacState {
    key_mac1: [u8; 32],
    key_cookie: [u8; 32],
    cookie: Option<[u8; MAC_LEN]>,
    cookie_received_at: Option<Instant>,
    last_mac1: Option<[u8; MAC_LEN]>,
}

impl MacState {
    /// Create MAC state keyed on a peer's public key
    pub fn new(peer_public: &[u8; 32]) -> Self {
        Self {
            key_mac1: mac1_key(peer_public),
            key_cookie: cookie_key(peer_public),
            cookie: None,
            cookie_received_at: None,
            last_mac1: None,
        }
    }

    /// MAC1 key derived from the peer's public key
    pub fn key_mac1(&self) -> &[u8; 32] {
        &self.key_mac1
    }

    /// Cookie-reply decryption key derived from the peer's public key
    pub fn key_cookie(&self) -> &[u8; 32] {
        &self.key_cookie
    }

    /// Check whether a cookie is cached and still inside its window
    pub fn has_fresh_cookie(&self) -> bool {
        self.fresh_cookie().is_some()
    }

    fn fresh_cookie(&self) -> Option<&[u8; MAC_LEN]> {
        match (&self.cookie, self.cookie_received_at) {
            (Some(cookie), Some(received)) if received.elapsed() < COOKIE_REFRESH => Some(cookie),
            _ => None,
        }
    }

    /// Write MAC1 and (when a fresh cookie is cached) MAC2 into the two
    /// trailing tag fields of an outgoing message
    ///
    /// Messages shorter than the two tag fields are left untouched.
    pub fn add_macs(&mut self, msg: &mut [u8]) {
        let len = msg.len();
        if len < MACS_LEN {
            return;
        }
        let mac1_off = len - MACS_LEN;
        let mac2_off = len - MAC_LEN;

        let mac1 = blake2s::mac(&self.key_mac1, &msg[..mac1_off]);
        msg[mac1_off..mac2_off].copy_from_slice(&mac1);
        self.last_mac1 = Some(mac1);

        match self.fresh_cookie() {
            Some(cookie) => {
                let mac2 = blake2s::mac_with_cookie(cookie, &msg[..mac2_off]);
                msg[mac2_off..].copy_from_slice(&mac2);
            }
            None => {
                msg[mac2_off..].fill(0);
            }
        }
    }

    /// Decrypt a cookie reply and cache the contained cookie
    ///
    /// The reply is bound to the last initiation we sent: its AEAD
    /// associated data is the MAC1 recorded by `add_macs`. A reply
    /// arriving before any MAC1 was sent, or failing authentication,
    /// is dropped without touching state.
    pub fn consume_cookie_reply(&mut self, reply: &CookieReply) -> bool {
        let last_mac1 = match self.last_mac1 {
            Some(mac1) => mac1,
            None => return false,
        };

        let decrypted = match aead::xdecrypt(
            &self.key_cookie,
            &reply.nonce,
            &reply.encrypted_cookie,
            &last_mac1,
        ) {
            Ok(plaintext) => plaintext,
            Err(_) => return false,
        };

        if decrypted.len() != MAC_LEN {
            return false;
        }

        let mut cookie = [0u8; MAC_LEN];
        cookie.copy_from_slice(&decrypted);

        self.cookie = Some(cookie);
        self.cookie_received_at = Some(Instant::now());

        tracing::debug!(
            "stored cookie (valid for {}s)",
            COOKIE_REFRESH.as_secs()
        );

        true
    }

    /// Drop the cached cookie
    pub fn clear_cookie(&mut self) {
        self.cookie = None;
        self.cookie_received_at = None;
    }
}
