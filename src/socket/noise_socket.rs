use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::Aead;
use aes_gcm::Aes256Gcm;

use crate::socket::error::{Result, SocketError};

/// Builds the 96-bit AEAD nonce: four zero bytes followed by the 64-bit
/// big-endian frame counter.
pub fn generate_iv(counter: u64) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[4..].copy_from_slice(&counter.to_be_bytes());
    iv
}

/// Post-handshake transport cipher: one AES-256-GCM key and one strictly
/// monotonic counter per direction. Counters start at zero when the
/// handshake finishes and are bumped after every successful operation, so
/// no two frames in one direction ever share an IV.
pub struct NoiseSocket {
    write_key: Aes256Gcm,
    read_key: Aes256Gcm,
    write_counter: AtomicU64,
    read_counter: AtomicU64,
}

impl NoiseSocket {
    pub fn new(write_key: Aes256Gcm, read_key: Aes256Gcm) -> Self {
        Self {
            write_key,
            read_key,
            write_counter: AtomicU64::new(0),
            read_counter: AtomicU64::new(0),
        }
    }

    pub fn encrypt_frame(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let counter = self.write_counter.fetch_add(1, Ordering::SeqCst);
        let iv = generate_iv(counter);
        self.write_key
            .encrypt(iv.as_ref().into(), plaintext)
            .map_err(|e| SocketError::Crypto(e.to_string()))
    }

    /// Decrypts an inbound frame, failing closed on a tag mismatch. Returns
    /// the plaintext together with the counter value that was consumed so
    /// the caller can watch for gaps.
    pub fn decrypt_frame(&self, ciphertext: &[u8]) -> Result<(Vec<u8>, u64)> {
        let counter = self.read_counter.fetch_add(1, Ordering::SeqCst);
        let iv = generate_iv(counter);
        let plaintext = self
            .read_key
            .decrypt(iv.as_ref().into(), ciphertext)
            .map_err(|e| SocketError::Crypto(e.to_string()))?;
        Ok((plaintext, counter))
    }

    pub fn write_counter(&self) -> u64 {
        self.write_counter.load(Ordering::SeqCst)
    }

    pub fn read_counter(&self) -> u64 {
        self.read_counter.load(Ordering::SeqCst)
    }
}

/// Watches the sequence of consumed read-counter values and reports when
/// more than one increment happened between two observed decrypt events.
#[derive(Default)]
pub struct CounterGapDetector {
    last_seen: Option<u64>,
}

impl CounterGapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of skipped counter values, if any.
    pub fn observe(&mut self, counter: u64) -> Option<u64> {
        let gap = match self.last_seen {
            Some(last) if counter > last + 1 => Some(counter - last - 1),
            _ => None,
        };
        self.last_seen = Some(counter);
        gap
    }
}
