//! Overlay node identity and destination naming.
//!
//! A destination hash names a reachable endpoint on the overlay. It is an
//! opaque value minted by the transport layer when an endpoint is
//! registered; consumers must treat it as a token and never re-derive it
//! from a public key (the derivation includes the application namespace and
//! is owned by the transport).

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};

/// Length of a destination hash in bytes.
pub const DESTINATION_HASH_LEN: usize = 16;

/// The local node's Ed25519 keypair.
///
/// Generated fresh at process start; peers learn the public half through
/// announces.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self { signing_key: SigningKey::generate(&mut rng) }
    }

    /// Create a keypair from a 32-byte seed. Deterministic; used in tests.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self { signing_key: SigningKey::from_bytes(seed) }
    }

    /// The public identity other nodes see.
    pub fn identity(&self) -> Identity {
        Identity { verifying_key: self.signing_key.verifying_key() }
    }

    pub fn public_key_hex(&self) -> String {
        self.identity().public_key_hex()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.public_key_hex())
    }
}

/// A public overlay identity, as carried in announces and returned by
/// `recall_identity`.
#[derive(Clone)]
pub struct Identity {
    verifying_key: VerifyingKey,
}

impl Identity {
    /// Reconstruct an identity from raw public key bytes.
    ///
    /// Returns `None` if the bytes are not a valid Ed25519 point.
    pub fn from_public_key_bytes(bytes: &[u8; 32]) -> Option<Self> {
        VerifyingKey::from_bytes(bytes)
            .ok()
            .map(|verifying_key| Identity { verifying_key })
    }

    /// Raw public key bytes.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Public key as lowercase hex (64 characters).
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.public_key_bytes() == other.public_key_bytes()
    }
}

impl Eq for Identity {}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.public_key_hex())
    }
}

/// An opaque 16-byte endpoint name on the overlay.
///
/// Produced by the transport layer; compared and stored byte-for-byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationHash([u8; DESTINATION_HASH_LEN]);

impl DestinationHash {
    pub fn from_bytes(bytes: [u8; DESTINATION_HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DESTINATION_HASH_LEN] {
        &self.0
    }

    /// Lowercase hex rendering (32 characters), the form stored in
    /// `peer_discovery.json`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex rendering back. Returns `None` on wrong length or
    /// non-hex input.
    pub fn parse_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; DESTINATION_HASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.to_hex())
    }
}

/// Mint the destination hash for an identity within an application
/// namespace. Internal to the transport layer — see the module note.
pub(crate) fn derive_destination_hash(
    identity: &Identity,
    app_name: &str,
    aspect: &str,
) -> DestinationHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&identity.public_key_bytes());
    hasher.update(app_name.as_bytes());
    hasher.update(b".");
    hasher.update(aspect.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; DESTINATION_HASH_LEN];
    out.copy_from_slice(&digest.as_bytes()[..DESTINATION_HASH_LEN]);
    DestinationHash(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypairs_are_distinct() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_ne!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn seeded_keypair_is_deterministic() {
        let a = Keypair::from_seed(&[7u8; 32]);
        let b = Keypair::from_seed(&[7u8; 32]);
        assert_eq!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn identity_roundtrips_through_bytes() {
        let id = Keypair::from_seed(&[3u8; 32]).identity();
        let restored = Identity::from_public_key_bytes(&id.public_key_bytes()).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn destination_hash_hex_roundtrip() {
        let id = Keypair::from_seed(&[1u8; 32]).identity();
        let hash = derive_destination_hash(&id, "atak", "cot");
        let parsed = DestinationHash::parse_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn destination_hash_depends_on_namespace() {
        let id = Keypair::from_seed(&[1u8; 32]).identity();
        let a = derive_destination_hash(&id, "atak", "cot");
        let b = derive_destination_hash(&id, "atak", "chat");
        assert_ne!(a, b);
    }

    #[test]
    fn parse_hex_rejects_bad_input() {
        assert!(DestinationHash::parse_hex("zz").is_none());
        assert!(DestinationHash::parse_hex("aabb").is_none());
    }
}
