//! Wire formats seen by the admission gate
//!
//! Handshake initiations and responses are treated as opaque buffers
//! ending in two 16-byte tag fields:
//!
//! ```text
//! [header][payload][mac1: 16][mac2: 16]
//! ```
//!
//! MAC1 covers every byte before the mac1 field; MAC2 covers every byte
//! before the mac2 field (header + payload + mac1). The only message
//! this layer fully owns is the Cookie Reply (type 3, 64 bytes).

use crate::crypto::blake2s::MAC_LEN;
use crate::error::ProtocolError;

/// Combined length of the two trailing tag fields
pub const MACS_LEN: usize = 2 * MAC_LEN;

/// Message types on the wire
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    HandshakeInitiation = 1,
    HandshakeResponse = 2,
    CookieReply = 3,
    TransportData = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::HandshakeInitiation),
            2 => Ok(Self::HandshakeResponse),
            3 => Ok(Self::CookieReply),
            4 => Ok(Self::TransportData),
            _ => Err(ProtocolError::InvalidMessageType { msg_type: value }),
        }
    }
}

/// Cookie Reply message (64 bytes)
///
/// ```text
/// type(1) | reserved(3) | receiver_index(4) | nonce(24) | encrypted_cookie(32)
/// ```
///
/// `encrypted_cookie` is the 16-byte cookie plus the 16-byte
/// authentication tag. Integers are little-endian.
#[derive(Debug, Clone)]
pub struct CookieReply {
    pub receiver_index: u32,
    pub nonce: [u8; 24],
    pub encrypted_cookie: [u8; 32],
}

impl CookieReply {
    /// Size of the cookie reply message
    pub const SIZE: usize = 64;

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        buf[0] = MessageType::CookieReply as u8;
        // buf[1..4] reserved (zeros)
        buf[4..8].copy_from_slice(&self.receiver_index.to_le_bytes());
        buf[8..32].copy_from_slice(&self.nonce);
        buf[32..64].copy_from_slice(&self.encrypted_cookie);

        buf
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::InvalidMessageLength {
                expected: Self::SIZE,
                got: data.len(),
            });
        }

        if data[0] != MessageType::CookieReply as u8 {
            return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
        }

        let receiver_index = u32::from_le_bytes(data[4..8].try_into().expect("sized slice"));

        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(&data[8..32]);

        let mut encrypted_cookie = [0u8; 32];
        encrypted_cookie.copy_from_slice(&data[32..64]);

        Ok(Self {
            receiver_index,
            nonce,
            encrypted_cookie,
        })
    }
}

/// Get the message type from a packet
pub fn get_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::InvalidMessageLength {
            expected: 1,
            got: 0,
        });
    }
    MessageType::try_from(data[0])
}
