//! Error types for the floodgate admission layer

use thiserror::Error;

/// Main error type for floodgate
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Device configuration errors
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed: invalid ciphertext or authentication tag")]
    Decryption,
}

/// Protocol-level errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {msg_type}")]
    InvalidMessageType { msg_type: u8 },

    #[error("Invalid message length: expected {expected}, got {got}")]
    InvalidMessageLength { expected: usize, got: usize },
}

/// Local device configuration errors
///
/// These indicate the operator's own node is misconfigured. They are
/// surfaced to the caller for logging and never answered on the wire.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No private key configured")]
    NoPrivateKey,
}

/// Result type alias for floodgate operations
pub type Result<T> = std::result::Result<T, FloodgateError>;
