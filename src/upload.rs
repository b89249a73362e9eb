use base64::prelude::*;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;

use crate::client::Client;
use crate::crypto::{cbc, hmac_sha256, sha256};
use crate::download::{get_media_keys, MediaError, MediaType, MEDIA_MAC_SIZE, SIDECAR_BLOCK_SIZE};

/// Result of encrypting a media file for upload.
pub struct EncryptedMedia {
    pub data_to_upload: Vec<u8>,
    pub media_key: [u8; 32],
    pub file_sha256: [u8; 32],
    pub file_enc_sha256: [u8; 32],
    pub sidecar: Vec<u8>,
}

/// A successful upload: the URL and direct path the server assigned.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    pub direct_path: String,
}

/// Encrypts `plaintext` under a fresh random media key: AES-CBC with the
/// HKDF-derived iv/key, the first ten bytes of `HMAC(iv || ciphertext)`
/// appended, plus the streaming sidecar.
pub fn encrypt_media(plaintext: &[u8], media_type: MediaType) -> Result<EncryptedMedia, MediaError> {
    let file_sha256 = sha256(plaintext);

    let mut media_key = [0u8; 32];
    OsRng.fill_bytes(&mut media_key);
    let keys = get_media_keys(&media_key, media_type);

    let ciphertext = cbc::encrypt(&keys.cipher_key, &keys.iv, plaintext)?;
    let mac = hmac_sha256(&keys.mac_key, &[&keys.iv, &ciphertext]);

    let mut upload = ciphertext;
    upload.extend_from_slice(&mac[..MEDIA_MAC_SIZE]);

    let file_enc_sha256 = sha256(&upload);
    let sidecar = media_sidecar(plaintext, &keys.mac_key);

    Ok(EncryptedMedia {
        data_to_upload: upload,
        media_key,
        file_sha256,
        file_enc_sha256,
        sidecar,
    })
}

/// Per-block MAC stream for seeking in encrypted audio/video: the first
/// ten bytes of `HMAC(mac_key, block)` for every 80-byte plaintext window.
pub fn media_sidecar(plaintext: &[u8], mac_key: &[u8]) -> Vec<u8> {
    let mut sidecar = Vec::with_capacity(plaintext.len().div_ceil(SIDECAR_BLOCK_SIZE) * 10);
    for block in plaintext.chunks(SIDECAR_BLOCK_SIZE) {
        let mac = hmac_sha256(mac_key, &[block]);
        sidecar.extend_from_slice(&mac[..MEDIA_MAC_SIZE]);
    }
    sidecar
}

/// Builds the upload URL for an encrypted blob on the given host.
pub fn build_upload_url(
    hostname: &str,
    media_type: MediaType,
    auth: &str,
    file_enc_sha256: &[u8],
) -> String {
    let token = BASE64_URL_SAFE_NO_PAD.encode(file_enc_sha256);
    format!(
        "https://{hostname}/mms/{mms_type}/{token}?auth={auth}&token={token}",
        mms_type = media_type.mms_type(),
    )
}

impl Client {
    /// Encrypts and uploads a media file, returning the assigned URL and
    /// direct path together with the key material the recipient needs.
    pub async fn upload_media(
        &self,
        plaintext: &[u8],
        media_type: MediaType,
    ) -> Result<(EncryptedMedia, UploadResponse), MediaError> {
        let encrypted = encrypt_media(plaintext, media_type)?;
        let media_conn = self
            .refresh_media_conn(false)
            .await
            .map_err(|e| MediaError::Http(e.to_string()))?;

        let host = media_conn.hosts.first().ok_or(MediaError::NoHosts)?;
        let url = build_upload_url(
            &host.hostname,
            media_type,
            &media_conn.auth,
            &encrypted.file_enc_sha256,
        );

        let body = encrypted.data_to_upload.clone();
        let response = tokio::task::spawn_blocking(move || -> Result<UploadResponse, MediaError> {
            let response = ureq::post(&url)
                .send(&body[..])
                .map_err(|e| MediaError::Http(e.to_string()))?;
            let text = response
                .into_body()
                .read_to_string()
                .map_err(|e| MediaError::Http(e.to_string()))?;
            serde_json::from_str(&text).map_err(|e| MediaError::Http(e.to_string()))
        })
        .await
        .map_err(|e| MediaError::Http(e.to_string()))??;

        Ok((encrypted, response))
    }
}
