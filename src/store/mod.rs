pub mod clientpayload;

use crate::binary::jid::Jid;
use crate::crypto::key_pair::{KeyPair, PreKey};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Long-lived key material and pairing state of this companion device.
///
/// Created once on first run and preserved across sessions; everything
/// per-connection (ephemeral key, counters, handshake state) lives in the
/// session layer instead. Callers persist this however they like; it
/// serializes with serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Long-term X25519 static pair used in the Noise handshake.
    pub noise_key: KeyPair,
    /// Curve25519 identity pair anchoring the ADV signature chain.
    pub identity_key: KeyPair,
    /// Pre-key signed by the identity key, published at registration.
    pub signed_pre_key: PreKey,
    /// 32-byte secret used as the HMAC key over ADV identity payloads.
    pub adv_secret_key: [u8; 32],
    /// Randomly assigned 32-bit registration id.
    pub registration_id: u32,
    /// Present once the device has been paired with a primary phone.
    pub companion: Option<Jid>,
    /// Set after the initial pre-key batch has been uploaded.
    pub prekeys_sent: bool,
}

impl Device {
    pub fn new() -> Self {
        let identity_key = KeyPair::new();
        let signed_pre_key = identity_key.create_signed_prekey(1);
        let mut adv_secret_key = [0u8; 32];
        OsRng.fill_bytes(&mut adv_secret_key);

        Self {
            noise_key: KeyPair::new(),
            identity_key,
            signed_pre_key,
            adv_secret_key,
            registration_id: OsRng.gen(),
            companion: None,
            prekeys_sent: false,
        }
    }

    /// Whether this device has been paired with a primary phone.
    pub fn is_paired(&self) -> bool {
        self.companion.is_some()
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}
