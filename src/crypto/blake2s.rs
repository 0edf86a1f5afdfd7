//! BLAKE2s primitives for MAC1/MAC2 and key derivation
//!
//! The admission gate only needs the hash and the keyed 128-bit MAC;
//! both tag fields and minted cookies are 16 bytes.

use blake2::{
    digest::{consts::U16, FixedOutput, Mac as MacTrait, Update},
    Blake2s256, Blake2sMac, Digest,
};

/// Length of BLAKE2s-256 hash output
pub const HASH_LEN: usize = 32;

/// Length of the truncated keyed MAC output (16 bytes on the wire)
pub const MAC_LEN: usize = 16;

/// BLAKE2s-256 hash of a single input
pub fn hash(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2s256::new();
    Digest::update(&mut hasher, data);
    hasher.finalize().into()
}

/// BLAKE2s-256 hash of two concatenated inputs: HASH(a || b)
pub fn hash_two(a: &[u8], b: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2s256::new();
    Digest::update(&mut hasher, a);
    Digest::update(&mut hasher, b);
    hasher.finalize().into()
}

/// BLAKE2s keyed MAC (16 bytes output) with 32-byte key
///
/// Used for MAC1 and for minting cookies from the device secret.
pub fn mac(key: &[u8; HASH_LEN], data: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = Blake2sMac::<U16>::new_from_slice(key).expect("valid key length");
    MacTrait::update(&mut mac, data);
    mac.finalize_fixed().into()
}

/// BLAKE2s keyed MAC (16 bytes output) with 16-byte key
///
/// Used for MAC2, which is keyed with the 16-byte cookie.
pub fn mac_with_cookie(key: &[u8; MAC_LEN], data: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = Blake2sMac::<U16>::new_from_slice(key).expect("valid key length");
    MacTrait::update(&mut mac, data);
    mac.finalize_fixed().into()
}
