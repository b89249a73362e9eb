use aes::Aes256;
use cbc::{Decryptor, Encryptor};
use cipher::{
    block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use thiserror::Error;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

#[derive(Debug, Error)]
pub enum CbcError {
    #[error("Invalid key or IV length for CBC mode: {0}")]
    InvalidLength(#[from] cipher::InvalidLength),
    #[error("Ciphertext length must be a non-zero multiple of 16")]
    InvalidCiphertextLength,
    #[error("Cipher operation failed during padding/unpadding")]
    CipherError,
}

type Result<T> = std::result::Result<T, CbcError>;

/// Encrypts plaintext using AES-256-CBC with PKCS#7 padding.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let enc = Aes256CbcEnc::new_from_slices(key, iv)?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypts ciphertext using AES-256-CBC, validating the PKCS#7 padding.
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CbcError::InvalidCiphertextLength);
    }
    let dec = Aes256CbcDec::new_from_slices(key, iv)?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CbcError::CipherError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let plaintext = b"not a block multiple";

        let ciphertext = encrypt(&key, &iv, plaintext).unwrap();
        assert_eq!(ciphertext.len() % 16, 0);
        assert_eq!(decrypt(&key, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_decrypt_rejects_truncated_input() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        assert!(decrypt(&key, &iv, &[0u8; 15]).is_err());
        assert!(decrypt(&key, &iv, &[]).is_err());
    }
}
