use crate::crypto::{gcm, hkdf};
use crate::socket::error::{Result, SocketError};
use crate::socket::noise_socket::generate_iv;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::Aes256Gcm;
use sha2::{Digest, Sha256};

fn sha256_slice(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Symmetric state of the Noise XX handshake.
///
/// `hash` is the rolling transcript hash used as AAD for every handshake
/// AEAD operation; `salt` is the chaining key evolved by each DH mix. The
/// AEAD nonce counter restarts at zero after every [`mix_into_key`].
///
/// [`mix_into_key`]: NoiseHandshake::mix_into_key
pub struct NoiseHandshake {
    hash: [u8; 32],
    salt: [u8; 32],
    key: Aes256Gcm,
    counter: u64,
}

impl NoiseHandshake {
    pub fn new(pattern: &str, header: &[u8]) -> Result<Self> {
        // A 32-byte protocol name seeds the hash directly; anything longer
        // is folded through SHA-256 first.
        let h: [u8; 32] = match pattern.as_bytes().try_into() {
            Ok(exact) => exact,
            Err(_) => sha256_slice(pattern.as_bytes()),
        };

        let mut state = Self {
            hash: h,
            salt: h,
            key: gcm::prepare(&h).map_err(|e| SocketError::Crypto(e.to_string()))?,
            counter: 0,
        };
        state.authenticate(header);
        Ok(state)
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn salt(&self) -> &[u8; 32] {
        &self.salt
    }

    /// Mixes `data` into the transcript hash.
    pub fn authenticate(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    fn post_increment_counter(&mut self) -> u64 {
        let count = self.counter;
        self.counter += 1;
        count
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = generate_iv(self.post_increment_counter());
        let payload = Payload {
            msg: plaintext,
            aad: &self.hash,
        };
        let ciphertext = self
            .key
            .encrypt(iv.as_ref().into(), payload)
            .map_err(|e| SocketError::Crypto(e.to_string()))?;
        self.authenticate(&ciphertext);
        Ok(ciphertext)
    }

    /// Decrypts a handshake payload. A tag mismatch is fatal for the
    /// handshake; the transcript hash is only advanced on success.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let aad = self.hash;
        let iv = generate_iv(self.post_increment_counter());
        let payload = Payload {
            msg: ciphertext,
            aad: &aad,
        };
        let plaintext = self
            .key
            .decrypt(iv.as_ref().into(), payload)
            .map_err(|_| SocketError::HandshakeAuth)?;
        self.authenticate(ciphertext);
        Ok(plaintext)
    }

    /// Computes an X25519 shared secret and folds it into the chaining key.
    pub fn mix_shared_secret(&mut self, priv_key: &[u8; 32], pub_key: &[u8; 32]) -> Result<()> {
        let shared_secret = x25519_dalek::x25519(*priv_key, *pub_key);
        self.mix_into_key(&shared_secret)
    }

    pub fn mix_into_key(&mut self, data: &[u8]) -> Result<()> {
        self.counter = 0;
        let (salt, cipher_key) = self.extract_and_expand(Some(data))?;
        self.salt = salt;
        self.key = gcm::prepare(&cipher_key).map_err(|e| SocketError::Crypto(e.to_string()))?;
        Ok(())
    }

    fn extract_and_expand(&self, ikm: Option<&[u8]>) -> Result<([u8; 32], [u8; 32])> {
        let okm = hkdf::sha256(ikm.unwrap_or(&[]), Some(&self.salt), &[], 64)
            .map_err(|e| SocketError::Crypto(e.to_string()))?;

        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        first.copy_from_slice(&okm[..32]);
        second.copy_from_slice(&okm[32..]);
        Ok((first, second))
    }

    /// Final HKDF split of the chaining key into the transport keys.
    /// Consumes the handshake state; both transport counters start at zero.
    pub fn finish(self) -> Result<(Aes256Gcm, Aes256Gcm)> {
        let (write_bytes, read_bytes) = self.extract_and_expand(None)?;
        let write_key =
            gcm::prepare(&write_bytes).map_err(|e| SocketError::Crypto(e.to_string()))?;
        let read_key = gcm::prepare(&read_bytes).map_err(|e| SocketError::Crypto(e.to_string()))?;
        Ok((write_key, read_key))
    }
}
