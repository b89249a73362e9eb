use rand::rngs::OsRng;
use xeddsa::xed25519::{PrivateKey, PublicKey};

/// Signs `message` with an X25519 private key using the XEd25519 scheme.
pub fn sign(private_key_bytes: &[u8; 32], message: &[u8]) -> [u8; 64] {
    let priv_key = PrivateKey(*private_key_bytes);
    let rng = OsRng;
    <PrivateKey as xeddsa::xeddsa::Sign<[u8; 64], [u8; 32], [u8; 32]>>::sign(
        &priv_key, message, rng,
    )
}

/// Verifies an XEd25519 signature against an X25519 public key.
pub fn verify(public_key_bytes: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let pub_key = PublicKey(*public_key_bytes);
    <PublicKey as xeddsa::xeddsa::Verify<[u8; 64], [u8; 32]>>::verify(&pub_key, message, signature)
        .is_ok()
}
