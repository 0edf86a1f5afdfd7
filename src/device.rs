//! Device and peer objects owning the gate's state
//!
//! A `Device` owns its identity keypair, the admission gate, the load
//! monitor, the receiver-index table, and the peer collection. A
//! `Peer` owns its MAC state behind a per-peer lock and a slot for the
//! in-flight handshake. The index table only ever holds weak
//! references into this graph.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::x25519;
use crate::error::{DeviceError, Result};
use crate::protocol::cookie::CookieGate;
use crate::protocol::index::{IndexEntry, IndexTable};
use crate::protocol::load::{LoadMonitor, DEFAULT_LOAD_THRESHOLD};
use crate::protocol::macs::MacState;
use crate::protocol::messages::CookieReply;

/// Routing decision for an inbound handshake initiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    /// MACs check out; hand the message to the handshake state machine
    Allow,
    /// MAC1 invalid; drop silently
    Reject,
    /// Under load and no valid address proof; answer with a cookie reply
    CookieRequired,
}

#[derive(Clone, Copy)]
struct Identity {
    private: [u8; 32],
    public: [u8; 32],
}

/// Slot tracking the receiver index of an in-flight handshake
///
/// The handshake state machine above this layer owns the actual
/// exchange; this slot only exists so replies can be routed back.
pub struct Handshake {
    local_index: Mutex<Option<u32>>,
}

impl Handshake {
    fn new() -> Self {
        Self {
            local_index: Mutex::new(None),
        }
    }

    /// Receiver index registered for this handshake, if any
    pub fn local_index(&self) -> Option<u32> {
        *self.local_index.lock()
    }
}

/// One configured remote peer
pub struct Peer {
    public_key: [u8; 32],
    macs: Mutex<MacState>,
    handshake: Arc<Handshake>,
}

impl Peer {
    fn new(public_key: [u8; 32]) -> Arc<Self> {
        Arc::new(Self {
            public_key,
            macs: Mutex::new(MacState::new(&public_key)),
            handshake: Arc::new(Handshake::new()),
        })
    }

    /// The peer's static public key
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// The peer's in-flight handshake slot
    pub fn handshake(&self) -> &Arc<Handshake> {
        &self.handshake
    }

    /// MAC1 key derived from this peer's public key
    pub fn key_mac1(&self) -> [u8; 32] {
        *self.macs.lock().key_mac1()
    }

    /// Cookie-reply decryption key derived from this peer's public key
    pub fn key_cookie(&self) -> [u8; 32] {
        *self.macs.lock().key_cookie()
    }

    /// Write MAC1 (and MAC2 while a cookie is fresh) into an outgoing
    /// handshake message
    pub fn add_macs(&self, msg: &mut [u8]) {
        self.macs.lock().add_macs(msg);
    }

    /// Whether a cookie from this peer is cached and unexpired
    pub fn has_fresh_cookie(&self) -> bool {
        self.macs.lock().has_fresh_cookie()
    }

    /// Drop the cached cookie
    pub fn clear_cookie(&self) {
        self.macs.lock().clear_cookie();
    }

    fn consume_cookie_reply(&self, reply: &CookieReply) -> bool {
        self.macs.lock().consume_cookie_reply(reply)
    }
}

/// Local endpoint of the admission layer
pub struct Device {
    identity: RwLock<Option<Identity>>,
    gate: CookieGate,
    load: LoadMonitor,
    indices: IndexTable,
    peers: Mutex<HashMap<[u8; 32], Arc<Peer>>>,
}

impl Device {
    /// Create an unconfigured device
    pub fn new() -> Self {
        Self::with_load_threshold(DEFAULT_LOAD_THRESHOLD)
    }

    /// Create a device with a custom load threshold
    pub fn with_load_threshold(threshold: u32) -> Self {
        Self {
            identity: RwLock::new(None),
            gate: CookieGate::new(),
            load: LoadMonitor::with_threshold(threshold),
            indices: IndexTable::new(),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Install the device identity and key the gate on its public key
    pub fn set_private_key(&self, private: [u8; 32]) {
        let public = x25519::public_key(&private);
        self.gate.init(&public);
        *self.identity.write() = Some(Identity { private, public });
        tracing::info!("installed device key, public {}", hex::encode(&public[..4]));
    }

    /// The device's public key, if configured
    pub fn public_key(&self) -> Option<[u8; 32]> {
        (*self.identity.read()).map(|id| id.public)
    }

    /// The device's private key, if configured
    ///
    /// Read-only from this layer; the handshake state machine above
    /// consumes it.
    pub fn private_key(&self) -> Option<[u8; 32]> {
        (*self.identity.read()).map(|id| id.private)
    }

    /// Register a peer by public key, replacing any previous record
    pub fn new_peer(&self, public_key: [u8; 32]) -> Arc<Peer> {
        let peer = Peer::new(public_key);
        self.peers.lock().insert(public_key, Arc::clone(&peer));
        tracing::info!("registered peer {}", hex::encode(&public_key[..4]));
        peer
    }

    /// Look up a registered peer
    pub fn peer(&self, public_key: &[u8; 32]) -> Option<Arc<Peer>> {
        self.peers.lock().get(public_key).cloned()
    }

    /// Remove a peer; its index-table entries become unresolvable
    pub fn remove_peer(&self, public_key: &[u8; 32]) {
        self.peers.lock().remove(public_key);
    }

    /// The receiver-index routing table
    pub fn indices(&self) -> &IndexTable {
        &self.indices
    }

    /// Register an in-flight handshake for a peer and return its
    /// freshly drawn receiver index
    ///
    /// Indices come from a cryptographically secure source; a
    /// collision with a live entry draws again.
    pub fn begin_handshake(&self, peer: &Arc<Peer>) -> u32 {
        self.abort_handshake(peer);
        loop {
            let index = OsRng.next_u32();
            let entry = IndexEntry::new(peer, peer.handshake());
            if self.indices.insert(index, entry) {
                *peer.handshake.local_index.lock() = Some(index);
                tracing::debug!("registered handshake index {:08x}", index);
                return index;
            }
        }
    }

    /// Unregister a peer's in-flight handshake; idempotent
    pub fn abort_handshake(&self, peer: &Arc<Peer>) {
        if let Some(index) = peer.handshake.local_index.lock().take() {
            self.indices.remove(index);
        }
    }

    /// Verify MAC1 on an inbound handshake message
    pub fn check_mac1(&self, msg: &[u8]) -> bool {
        self.gate.check_mac1(msg)
    }

    /// Verify MAC2 on an inbound handshake message against the claimed
    /// source address
    pub fn check_mac2(&self, msg: &[u8], source: &SocketAddr) -> bool {
        self.gate.check_mac2(msg, source)
    }

    /// Mint a cookie reply for a handshake message from `source`
    ///
    /// Fails if no private key is configured; that error is for the
    /// operator's logs and never answered on the wire.
    pub fn create_cookie_reply(
        &self,
        msg: &[u8],
        receiver_index: u32,
        source: &SocketAddr,
    ) -> Result<CookieReply> {
        if self.identity.read().is_none() {
            return Err(DeviceError::NoPrivateKey.into());
        }
        self.gate.create_reply(msg, receiver_index, source)
    }

    /// Route a received cookie reply to the peer its receiver index
    /// belongs to and cache the decrypted cookie there
    ///
    /// Unknown, removed, and torn-down indices all return `false`,
    /// indistinguishable from an authentication failure.
    pub fn consume_cookie_reply(&self, reply: &CookieReply) -> bool {
        let (peer, _handshake) = match self.indices.lookup(reply.receiver_index) {
            Some(found) => found,
            None => return false,
        };
        peer.consume_cookie_reply(reply)
    }

    /// Record an inbound handshake initiation with the load monitor
    pub fn note_handshake_initiation(&self) {
        self.load.note_handshake_initiation();
    }

    /// Whether MAC2 enforcement is currently active
    pub fn is_under_load(&self) -> bool {
        self.load.is_under_load()
    }

    /// Admission decision for an inbound handshake initiation
    ///
    /// Counts the arrival, requires MAC1 always, and requires MAC2
    /// only while the device is under load.
    pub fn gate_initiation(&self, msg: &[u8], source: &SocketAddr) -> GateVerdict {
        self.load.note_handshake_initiation();

        if !self.gate.check_mac1(msg) {
            return GateVerdict::Reject;
        }
        if self.load.is_under_load() && !self.gate.check_mac2(msg, source) {
            return GateVerdict::CookieRequired;
        }
        GateVerdict::Allow
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::x25519;
    use crate::protocol::{cookie_key, mac1_key};
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr(last_octet: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, last_octet)), port)
    }

    /// Two devices holding each other's public key, as configured
    /// peers would be. `peer1` is device 2's record of device 1.
    fn device_pair() -> (Device, Device, Arc<Peer>, Arc<Peer>) {
        let dev1 = Device::new();
        let dev2 = Device::new();

        let (sk1, pk1) = x25519::generate_keypair();
        let (sk2, pk2) = x25519::generate_keypair();
        dev1.set_private_key(sk1);
        dev2.set_private_key(sk2);

        let peer1 = dev2.new_peer(pk1);
        let peer2 = dev1.new_peer(pk2);
        (dev1, dev2, peer1, peer2)
    }

    #[test]
    fn test_key_symmetry() {
        let (dev1, dev2, peer1, peer2) = device_pair();

        let pk1 = dev1.public_key().unwrap();
        let pk2 = dev2.public_key().unwrap();

        assert_eq!(peer1.key_mac1(), mac1_key(&pk1));
        assert_eq!(peer1.key_cookie(), cookie_key(&pk1));
        assert_eq!(peer2.key_mac1(), mac1_key(&pk2));
        assert_eq!(peer2.key_cookie(), cookie_key(&pk2));
    }

    #[test]
    fn test_mac1_round_trip_between_devices() {
        let (dev1, _dev2, peer1, _peer2) = device_pair();

        let mut msg = [0u8; 256];
        msg[..12].copy_from_slice(b"some content");
        peer1.add_macs(&mut msg);

        assert!(dev1.check_mac1(&msg));
    }

    #[test]
    fn test_reference_scenario() {
        let (dev1, dev2, peer1, _peer2) = device_pair();
        let source = test_addr(10, 51820);
        let unrelated = test_addr(99, 51820);

        let mut msg = [0u8; 256];
        msg[..12].copy_from_slice(b"some content");

        peer1.add_macs(&mut msg);
        assert!(dev1.check_mac1(&msg));

        let receiver = dev2.begin_handshake(&peer1);
        let reply = dev1.create_cookie_reply(&msg, receiver, &source).unwrap();
        assert!(dev2.consume_cookie_reply(&reply));
        assert!(peer1.has_fresh_cookie());

        peer1.add_macs(&mut msg);
        assert!(dev1.check_mac1(&msg));
        assert!(dev1.check_mac2(&msg, &source));
        assert!(!dev1.check_mac2(&msg, &unrelated));

        msg[5] ^= 1;
        assert!(!dev1.check_mac1(&msg));
    }

    #[test]
    fn test_cookie_reply_survives_wire_form() {
        let (dev1, dev2, peer1, _peer2) = device_pair();
        let source = test_addr(10, 51820);

        let mut msg = [0u8; 148];
        peer1.add_macs(&mut msg);

        let receiver = dev2.begin_handshake(&peer1);
        let reply = dev1.create_cookie_reply(&msg, receiver, &source).unwrap();

        let parsed = CookieReply::from_bytes(&reply.to_bytes()).unwrap();
        assert!(dev2.consume_cookie_reply(&parsed));
    }

    #[test]
    fn test_consume_unknown_index_fails_silently() {
        let (dev1, dev2, peer1, _peer2) = device_pair();
        let source = test_addr(10, 51820);

        let mut msg = [0u8; 256];
        peer1.add_macs(&mut msg);

        let reply = dev1.create_cookie_reply(&msg, 0xDEADBEEF, &source).unwrap();
        assert!(!dev2.consume_cookie_reply(&reply));
        assert!(!peer1.has_fresh_cookie());
    }

    #[test]
    fn test_consume_after_peer_removed_fails_silently() {
        let (dev1, dev2, peer1, _peer2) = device_pair();
        let source = test_addr(10, 51820);

        let mut msg = [0u8; 256];
        peer1.add_macs(&mut msg);

        let receiver = dev2.begin_handshake(&peer1);
        let reply = dev1.create_cookie_reply(&msg, receiver, &source).unwrap();

        dev2.remove_peer(peer1.public_key());
        drop(peer1);

        assert!(!dev2.consume_cookie_reply(&reply));
    }

    #[test]
    fn test_create_cookie_reply_requires_private_key() {
        let dev = Device::new();
        let msg = [0u8; 64];

        let result = dev.create_cookie_reply(&msg, 1, &test_addr(1, 1000));
        assert!(matches!(
            result,
            Err(crate::error::FloodgateError::Device(
                DeviceError::NoPrivateKey
            ))
        ));
    }

    #[test]
    fn test_begin_handshake_registers_and_replaces() {
        let (_dev1, dev2, peer1, _peer2) = device_pair();

        let first = dev2.begin_handshake(&peer1);
        assert_eq!(peer1.handshake().local_index(), Some(first));
        assert!(dev2.indices().lookup(first).is_some());

        let second = dev2.begin_handshake(&peer1);
        assert!(dev2.indices().lookup(second).is_some());
        if first != second {
            assert!(dev2.indices().lookup(first).is_none());
        }

        dev2.abort_handshake(&peer1);
        assert!(dev2.indices().lookup(second).is_none());
        assert_eq!(peer1.handshake().local_index(), None);
    }

    #[test]
    fn test_gate_initiation_flood_requires_cookie() {
        let responder = Device::with_load_threshold(1);
        let initiator = Device::new();

        let (sk_r, pk_r) = x25519::generate_keypair();
        let (sk_i, pk_i) = x25519::generate_keypair();
        responder.set_private_key(sk_r);
        initiator.set_private_key(sk_i);

        // the initiator's record of the responder, and vice versa
        let responder_rec = initiator.new_peer(pk_r);
        responder.new_peer(pk_i);

        let source = test_addr(10, 51820);
        let mut msg = [0u8; 148];
        msg[0] = 1;
        responder_rec.add_macs(&mut msg);

        // quiet device: MAC1 alone admits
        assert_eq!(responder.gate_initiation(&msg, &source), GateVerdict::Allow);

        // flood: MAC2 now required, and the zero-filled field fails
        assert_eq!(
            responder.gate_initiation(&msg, &source),
            GateVerdict::CookieRequired
        );
        assert!(responder.is_under_load());

        // cookie round trip restores admission while still under load
        let receiver = initiator.begin_handshake(&responder_rec);
        let reply = responder
            .create_cookie_reply(&msg, receiver, &source)
            .unwrap();
        assert!(initiator.consume_cookie_reply(&reply));

        responder_rec.add_macs(&mut msg);
        assert_eq!(responder.gate_initiation(&msg, &source), GateVerdict::Allow);

        // a corrupted message is rejected outright
        msg[5] ^= 1;
        assert_eq!(responder.gate_initiation(&msg, &source), GateVerdict::Reject);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_macs_round_trip(
            mut msg in proptest::collection::vec(any::<u8>(), 32..256usize),
            receiver in any::<u32>(),
            ip_a in any::<[u8; 4]>(),
            port_a in any::<u16>(),
            ip_b in any::<[u8; 4]>(),
            port_b in any::<u16>(),
        ) {
            prop_assume!((ip_a, port_a) != (ip_b, port_b));

            let source = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip_a)), port_a);
            let other = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip_b)), port_b);

            let (dev1, dev2, peer1, _peer2) = device_pair();

            prop_assert!(dev2
                .indices()
                .insert(receiver, IndexEntry::new(&peer1, peer1.handshake())));

            peer1.add_macs(&mut msg);
            prop_assert!(dev1.check_mac1(&msg));

            let reply = dev1.create_cookie_reply(&msg, receiver, &source).unwrap();
            prop_assert!(dev2.consume_cookie_reply(&reply));

            peer1.add_macs(&mut msg);
            prop_assert!(dev1.check_mac1(&msg));
            prop_assert!(dev1.check_mac2(&msg, &source));
            prop_assert!(!dev1.check_mac2(&msg, &other));

            msg[5] ^= 1;
            prop_assert!(!dev1.check_mac1(&msg));
        }
    }
}
