use crate::crypto::xed25519;
use ed25519_dalek::Signature;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

/// The DJB key type constant used by the Signal ecosystem.
pub const DJB_TYPE: u8 = 5;

/// An X25519 key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: [u8; 32],
    pub private_key: [u8; 32],
}

impl KeyPair {
    /// Generates a new random X25519 key pair.
    pub fn new() -> Self {
        let mut p_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut p_bytes);
        Self::from_private_key(p_bytes)
    }

    /// Creates a key pair from an existing 32-byte private key.
    pub fn from_private_key(private_key: [u8; 32]) -> Self {
        let private = StaticSecret::from(private_key);
        let public = PublicKey::from(&private);
        Self {
            public_key: *public.as_bytes(),
            private_key: private.to_bytes(),
        }
    }

    /// Computes the X25519 shared secret with a remote public key.
    pub fn shared_secret(&self, their_public: &[u8; 32]) -> [u8; 32] {
        x25519_dalek::x25519(self.private_key, *their_public)
    }

    /// Signs the public key of another key pair, prepending the DJB type
    /// byte as the Signal protocol requires.
    pub fn sign(&self, key_to_sign: &KeyPair) -> Signature {
        let mut message = [0u8; 33];
        message[0] = DJB_TYPE;
        message[1..].copy_from_slice(&key_to_sign.public_key);
        self.sign_message(&message)
    }

    /// Signs an arbitrary message via the XEd25519 scheme.
    pub fn sign_message(&self, message: &[u8]) -> Signature {
        let signature_bytes = xed25519::sign(&self.private_key, message);
        Signature::from_bytes(&signature_bytes)
    }

    /// Creates a new pre-key and signs its public key with this key pair.
    pub fn create_signed_prekey(&self, key_id: u32) -> PreKey {
        let new_key = PreKey::new(key_id);
        let signature = self.sign(&new_key.key_pair);
        PreKey {
            signature: Some(signature.to_bytes()),
            ..new_key
        }
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        Self::new()
    }
}

// serde has no built-in impls for 64-byte arrays, and serde_big_array's
// helper does not apply to Option fields directly.
mod opt_signature {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_big_array::BigArray;

    #[derive(Serialize, Deserialize)]
    struct Wrapper(#[serde(with = "BigArray")] [u8; 64]);

    pub fn serialize<S: Serializer>(v: &Option<[u8; 64]>, s: S) -> Result<S::Ok, S::Error> {
        v.map(Wrapper).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; 64]>, D::Error> {
        Ok(Option::<Wrapper>::deserialize(d)?.map(|w| w.0))
    }
}

/// A one-time Curve25519 pre-key, optionally signed by the identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKey {
    pub key_pair: KeyPair,
    pub key_id: u32,
    #[serde(with = "opt_signature")]
    pub signature: Option<[u8; 64]>,
}

impl PreKey {
    pub fn new(key_id: u32) -> Self {
        Self {
            key_pair: KeyPair::new(),
            key_id,
            signature: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_agreement() {
        let a = KeyPair::new();
        let b = KeyPair::new();
        assert_eq!(
            a.shared_secret(&b.public_key),
            b.shared_secret(&a.public_key)
        );
    }

    #[test]
    fn test_signed_prekey_verifies() {
        let identity = KeyPair::new();
        let prekey = identity.create_signed_prekey(1);

        let mut message = [0u8; 33];
        message[0] = DJB_TYPE;
        message[1..].copy_from_slice(&prekey.key_pair.public_key);

        assert!(xed25519::verify(
            &identity.public_key,
            &message,
            &prekey.signature.unwrap(),
        ));
    }
}
