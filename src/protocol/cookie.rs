//! Device-side MAC verification and cookie issuing
//!
//! The gate sits in front of the handshake state machine: it verifies
//! MAC1 on every inbound initiation/response, verifies MAC2 when the
//! device is shedding load, and mints encrypted cookie replies that
//! prove a sender can receive traffic at the address it claims.
//!
//! MAC2 verification keeps no per-peer state. The expected cookie is
//! re-minted from the current device secret and the claimed source
//! address on every check, so a spoofed address can never verify.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::crypto::blake2s::{self, MAC_LEN};
use crate::crypto::aead;
use crate::error::{DeviceError, FloodgateError, ProtocolError};
use crate::protocol::messages::{CookieReply, MACS_LEN};
use crate::protocol::{cookie_key, mac1_key, COOKIE_REFRESH};

/// Device-wide admission gate
///
/// Unkeyed until the device installs a private key; every check on an
/// unkeyed gate rejects.
pub struct CookieGate {
    keys: RwLock<Option<GateKeys>>,
    secret: RwLock<Option<CookieSecret>>,
}

#[derive(Clone, Copy)]
struct GateKeys {
    key_mac1: [u8; 32],
    key_cookie: [u8; 32],
}

/// Device-wide secret behind minted cookies; rotated lazily on use
struct CookieSecret {
    value: [u8; 32],
    created_at: Instant,
}

impl CookieSecret {
    fn generate() -> Self {
        let mut value = [0u8; 32];
        OsRng.fill_bytes(&mut value);
        Self {
            value,
            created_at: Instant::now(),
        }
    }

    fn is_stale(&self) -> bool {
        self.created_at.elapsed() > COOKIE_REFRESH
    }
}

impl CookieGate {
    /// Create an unkeyed gate
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(None),
            secret: RwLock::new(None),
        }
    }

    /// Key the gate on the device's public key
    ///
    /// Re-keying discards the cookie secret, so cookies minted under
    /// the previous identity stop verifying.
    pub fn init(&self, device_public: &[u8; 32]) {
        let keys = GateKeys {
            key_mac1: mac1_key(device_public),
            key_cookie: cookie_key(device_public),
        };
        *self.keys.write() = Some(keys);
        *self.secret.write() = None;
    }

    /// Verify the MAC1 field of an inbound handshake message
    ///
    /// Undersized messages, an unkeyed gate, and tag mismatches all
    /// produce the same `false`.
    pub fn check_mac1(&self, msg: &[u8]) -> bool {
        if msg.len() < MACS_LEN {
            return false;
        }
        let key_mac1 = match *self.keys.read() {
            Some(keys) => keys.key_mac1,
            None => return false,
        };

        let mac1_off = msg.len() - MACS_LEN;
        let expected = blake2s::mac(&key_mac1, &msg[..mac1_off]);
        mac_eq(&expected, &msg[mac1_off..mac1_off + MAC_LEN])
    }

    /// Verify the MAC2 field of an inbound handshake message against
    /// the claimed source address
    ///
    /// The cookie is re-minted from the current secret; nothing the
    /// peer sent is trusted as key material. A stale secret rejects
    /// outright since any cookie minted from it has expired.
    pub fn check_mac2(&self, msg: &[u8], source: &SocketAddr) -> bool {
        if msg.len() < MACS_LEN {
            return false;
        }
        if self.keys.read().is_none() {
            return false;
        }

        let secret = self.secret.read();
        let secret = match secret.as_ref() {
            Some(secret) if !secret.is_stale() => secret,
            _ => return false,
        };

        let cookie = blake2s::mac(&secret.value, &source_identity(source));

        let mac2_off = msg.len() - MAC_LEN;
        let expected = blake2s::mac_with_cookie(&cookie, &msg[..mac2_off]);
        mac_eq(&expected, &msg[mac2_off..])
    }

    /// Mint a cookie reply for a handshake message from `source`
    ///
    /// The cookie is sealed under the device's own cookie key (the one
    /// the initiator derives from this device's public key) with the
    /// message's MAC1 as associated data. Single attempt; errors go to
    /// the caller, never onto the wire.
    pub fn create_reply(
        &self,
        msg: &[u8],
        receiver_index: u32,
        source: &SocketAddr,
    ) -> Result<CookieReply, FloodgateError> {
        if msg.len() < MACS_LEN {
            return Err(ProtocolError::InvalidMessageLength {
                expected: MACS_LEN,
                got: msg.len(),
            }
            .into());
        }
        let key_cookie = match *self.keys.read() {
            Some(keys) => keys.key_cookie,
            None => return Err(DeviceError::NoPrivateKey.into()),
        };

        let cookie = self.mint(source);

        let mut nonce = [0u8; aead::XNONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mac1_off = msg.len() - MACS_LEN;
        let mac2_off = msg.len() - MAC_LEN;
        let sealed = aead::xencrypt(&key_cookie, &nonce, &cookie, &msg[mac1_off..mac2_off])?;

        let mut encrypted_cookie = [0u8; 32];
        encrypted_cookie.copy_from_slice(&sealed);

        Ok(CookieReply {
            receiver_index,
            nonce,
            encrypted_cookie,
        })
    }

    /// Mint the cookie for a source address from the current secret,
    /// rotating the secret first if it is unset or stale
    fn mint(&self, source: &SocketAddr) -> [u8; MAC_LEN] {
        let id = source_identity(source);

        {
            let secret = self.secret.read();
            if let Some(secret) = secret.as_ref() {
                if !secret.is_stale() {
                    return blake2s::mac(&secret.value, &id);
                }
            }
        }

        let mut secret = self.secret.write();
        // another path may have rotated while we were waiting
        match secret.as_ref() {
            Some(current) if !current.is_stale() => blake2s::mac(&current.value, &id),
            _ => {
                let fresh = CookieSecret::generate();
                let cookie = blake2s::mac(&fresh.value, &id);
                *secret = Some(fresh);
                tracing::debug!("rotated cookie secret");
                cookie
            }
        }
    }
}

impl Default for CookieGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical 18-byte identity of a source address: the 16-byte
/// IPv6-mapped address form followed by the port, little-endian
fn source_identity(source: &SocketAddr) -> [u8; 18] {
    let ip = match source.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };

    let mut id = [0u8; 18];
    id[..16].copy_from_slice(&ip.octets());
    id[16..].copy_from_slice(&source.port().to_le_bytes());
    id
}

/// Fixed-time equality over a tag-length byte array
fn mac_eq(expected: &[u8; MAC_LEN], observed: &[u8]) -> bool {
    observed.len() == MAC_LEN && bool::from(expected[..].ct_eq(observed))
}
