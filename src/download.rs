use base64::prelude::*;
use hkdf::Hkdf;
use log::warn;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::client::Client;
use crate::crypto::{cbc, hmac_sha256};
use crate::mediaconn::MediaConn;

/// Truncated HMAC length appended to encrypted media.
pub const MEDIA_MAC_SIZE: usize = 10;
/// Plaintext window covered by each sidecar MAC.
pub const SIDECAR_BLOCK_SIZE: usize = 80;

/// Media category. Each maps to a fixed HKDF info string, so a key blob
/// decrypts only as the type it was encrypted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaType {
    pub fn app_info(&self) -> &'static str {
        match self {
            MediaType::Image => "WhatsApp Image Keys",
            MediaType::Video => "WhatsApp Video Keys",
            MediaType::Audio => "WhatsApp Audio Keys",
            MediaType::Document => "WhatsApp Document Keys",
        }
    }

    pub fn mms_type(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Document => "document",
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media MAC verification failed")]
    MacMismatch,
    #[error("downloaded payload is too short")]
    TooShort,
    #[error("cipher failure: {0}")]
    Cipher(#[from] cbc::CbcError),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("no media hosts available")]
    NoHosts,
}

/// Key material expanded from a 32-byte media key.
pub struct MediaKeys {
    pub iv: [u8; 16],
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub ref_key: [u8; 32],
}

/// Expands `media_key` to the 112-byte (iv, cipherKey, macKey, refKey)
/// tuple for the given media type.
pub fn get_media_keys(media_key: &[u8], media_type: MediaType) -> MediaKeys {
    let hk = Hkdf::<Sha256>::new(None, media_key);
    let mut expanded = [0u8; 112];
    hk.expand(media_type.app_info().as_bytes(), &mut expanded)
        .expect("112 bytes is a valid HKDF-SHA256 output length");
    MediaKeys {
        iv: expanded[0..16].try_into().unwrap(),
        cipher_key: expanded[16..48].try_into().unwrap(),
        mac_key: expanded[48..80].try_into().unwrap(),
        ref_key: expanded[80..112].try_into().unwrap(),
    }
}

/// Verifies the truncated MAC over `iv || ciphertext` and decrypts.
/// Nothing is returned on a MAC mismatch, not even partial plaintext.
pub fn verify_and_decrypt(
    encrypted_payload: &[u8],
    media_key: &[u8],
    media_type: MediaType,
) -> Result<Vec<u8>, MediaError> {
    if encrypted_payload.len() <= MEDIA_MAC_SIZE {
        return Err(MediaError::TooShort);
    }
    let (ciphertext, received_mac) =
        encrypted_payload.split_at(encrypted_payload.len() - MEDIA_MAC_SIZE);

    let keys = get_media_keys(media_key, media_type);
    let computed = hmac_sha256(&keys.mac_key, &[&keys.iv, ciphertext]);
    if computed[..MEDIA_MAC_SIZE].ct_eq(received_mac).unwrap_u8() != 1 {
        return Err(MediaError::MacMismatch);
    }

    Ok(cbc::decrypt(&keys.cipher_key, &keys.iv, ciphertext)?)
}

/// Builds the candidate download URLs for a direct path, one per host.
pub fn build_download_urls(
    media_conn: &MediaConn,
    direct_path: &str,
    file_enc_sha256: &[u8],
) -> Vec<String> {
    let token = BASE64_URL_SAFE_NO_PAD.encode(file_enc_sha256);
    media_conn
        .hosts
        .iter()
        .map(|host| {
            format!(
                "https://{hostname}{direct_path}?auth={auth}&token={token}",
                hostname = host.hostname,
                auth = media_conn.auth,
            )
        })
        .collect()
}

impl Client {
    /// Downloads and decrypts a media blob, trying each host in turn.
    pub async fn download_media(
        &self,
        direct_path: &str,
        file_enc_sha256: &[u8],
        media_key: &[u8],
        media_type: MediaType,
    ) -> Result<Vec<u8>, MediaError> {
        let media_conn = self
            .refresh_media_conn(false)
            .await
            .map_err(|e| MediaError::Http(e.to_string()))?;

        let urls = build_download_urls(&media_conn, direct_path, file_enc_sha256);
        if urls.is_empty() {
            return Err(MediaError::NoHosts);
        }

        for url in urls {
            match fetch_encrypted(url.clone()).await {
                Ok(payload) => return verify_and_decrypt(&payload, media_key, media_type),
                Err(e) => {
                    warn!(target: "Client/Media", "Download from {url} failed: {e}, trying next host");
                }
            }
        }
        Err(MediaError::NoHosts)
    }
}

async fn fetch_encrypted(url: String) -> Result<Vec<u8>, MediaError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, MediaError> {
        let response = ureq::get(&url)
            .call()
            .map_err(|e| MediaError::Http(e.to_string()))?;
        response
            .into_body()
            .read_to_vec()
            .map_err(|e| MediaError::Http(e.to_string()))
    })
    .await
    .map_err(|e| MediaError::Http(e.to_string()))?
}
