use base64::prelude::*;
use hmac::{Hmac, Mac};
use log::{debug, error, info, warn};
use prost::Message;
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

use crate::binary::jid::SERVER_JID;
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::client::Client;
use crate::crypto::xed25519;
use crate::proto;
use crate::types::events::Event;

type HmacSha256 = Hmac<Sha256>;

/// Signature domain separators of the ADV identity chain.
const ADV_PREFIX_ACCOUNT_SIGNATURE: &[u8] = &[6, 0];
const ADV_PREFIX_DEVICE_SIGNATURE: &[u8] = &[6, 1];

/// Progress of the companion enrollment exchange. Terminal in
/// [`PairingState::Paired`] or [`PairingState::PairingFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    UnpairedIdle,
    AwaitingPairDevice,
    QrDisplayed,
    AwaitingPairSuccess,
    Verifying,
    Paired,
    PairingFailed,
}

/// A cryptographic integrity failure during pairing. Always fatal; a
/// compromised pairing is never retried.
#[derive(Debug, Error)]
#[error("pairing rejected with code {code}: {text}")]
pub struct PairCryptoError {
    pub code: u16,
    pub text: &'static str,
}

/// Key material needed for the pairing crypto, detached from the client so
/// the exchange is testable on its own.
pub struct PairDeviceState {
    pub identity_key: crate::crypto::key_pair::KeyPair,
    pub noise_key: crate::crypto::key_pair::KeyPair,
    pub adv_secret_key: [u8; 32],
}

pub struct PairUtils;

impl PairUtils {
    /// Builds the QR text: the server ref and the three base64 keys the
    /// phone needs, comma-joined.
    pub fn make_qr_data(state: &PairDeviceState, ref_str: &str) -> String {
        let noise_b64 = BASE64_STANDARD.encode(state.noise_key.public_key);
        let identity_b64 = BASE64_STANDARD.encode(state.identity_key.public_key);
        let adv_b64 = BASE64_STANDARD.encode(state.adv_secret_key);
        [ref_str, noise_b64.as_str(), identity_b64.as_str(), adv_b64.as_str()].join(",")
    }

    /// Acknowledges a pairing notification with an empty `iq/result`.
    pub fn build_ack_node(request: &Node) -> Option<Node> {
        let id = request.attrs.get("id")?;
        let mut attrs = Attrs::new();
        attrs.insert("to".into(), SERVER_JID.to_string());
        attrs.insert("type".into(), "result".into());
        attrs.insert("id".into(), id.clone());
        Some(Node {
            tag: "iq".into(),
            attrs,
            content: None,
        })
    }

    /// Verifies an ADV identity blob and produces our half of the
    /// signature chain.
    ///
    /// Steps: HMAC the outer container with the companion secret, check
    /// the phone's account signature over our identity key, sign the
    /// device-signature message, clear the account signature and re-encode
    /// for the reply. Returns the re-encoded identity and its key index.
    pub fn do_pair_crypto(
        state: &PairDeviceState,
        device_identity_bytes: &[u8],
    ) -> Result<(Vec<u8>, u32), PairCryptoError> {
        let container = proto::AdvSignedDeviceIdentityHmac::decode(device_identity_bytes)
            .map_err(|_| PairCryptoError {
                code: 500,
                text: "internal-error",
            })?;

        let details_bytes = container.details.as_deref().ok_or(PairCryptoError {
            code: 500,
            text: "internal-error",
        })?;
        let hmac_bytes = container.hmac.as_deref().ok_or(PairCryptoError {
            code: 500,
            text: "internal-error",
        })?;

        let mut mac = HmacSha256::new_from_slice(&state.adv_secret_key)
            .expect("HMAC-SHA256 accepts any key size");
        mac.update(details_bytes);
        if mac.verify_slice(hmac_bytes).is_err() {
            return Err(PairCryptoError {
                code: 401,
                text: "hmac-mismatch",
            });
        }

        let mut signed_identity =
            proto::AdvSignedDeviceIdentity::decode(details_bytes).map_err(|_| PairCryptoError {
                code: 500,
                text: "internal-error",
            })?;

        let account_sig_key: [u8; 32] = signed_identity
            .account_signature_key
            .as_deref()
            .and_then(|k| k.try_into().ok())
            .ok_or(PairCryptoError {
                code: 500,
                text: "internal-error",
            })?;
        let account_sig: [u8; 64] = signed_identity
            .account_signature
            .as_deref()
            .and_then(|s| s.try_into().ok())
            .ok_or(PairCryptoError {
                code: 500,
                text: "internal-error",
            })?;
        let inner_details = signed_identity.details.clone().ok_or(PairCryptoError {
            code: 500,
            text: "internal-error",
        })?;

        let msg_to_verify = [
            ADV_PREFIX_ACCOUNT_SIGNATURE,
            inner_details.as_slice(),
            &state.identity_key.public_key[..],
        ]
        .concat();
        if !xed25519::verify(&account_sig_key, &msg_to_verify, &account_sig) {
            return Err(PairCryptoError {
                code: 401,
                text: "signature-mismatch",
            });
        }

        let msg_to_sign = [
            ADV_PREFIX_DEVICE_SIGNATURE,
            inner_details.as_slice(),
            &state.identity_key.public_key[..],
            &account_sig[..],
        ]
        .concat();
        let device_signature = state.identity_key.sign_message(&msg_to_sign);

        let key_index = proto::AdvDeviceIdentity::decode(inner_details.as_slice())
            .map_err(|_| PairCryptoError {
                code: 500,
                text: "internal-error",
            })?
            .key_index
            .unwrap_or(0);

        signed_identity.device_signature = Some(device_signature.to_bytes().to_vec());
        signed_identity.account_signature = None;

        Ok((signed_identity.encode_to_vec(), key_index))
    }

    /// Builds the `iq/result` reply carrying `pair-device-sign`.
    pub fn build_pair_success_response(
        req_id: &str,
        self_signed_identity: Vec<u8>,
        key_index: u32,
    ) -> Node {
        let mut identity_attrs = Attrs::new();
        identity_attrs.insert("key-index".into(), key_index.to_string());
        let identity_node = Node {
            tag: "device-identity".into(),
            attrs: identity_attrs,
            content: Some(NodeContent::Bytes(self_signed_identity)),
        };
        let sign_node = Node {
            tag: "pair-device-sign".into(),
            attrs: Attrs::new(),
            content: Some(NodeContent::Nodes(vec![identity_node])),
        };

        let mut attrs = Attrs::new();
        attrs.insert("to".into(), SERVER_JID.to_string());
        attrs.insert("id".into(), req_id.to_string());
        attrs.insert("type".into(), "result".into());
        Node {
            tag: "iq".into(),
            attrs,
            content: Some(NodeContent::Nodes(vec![sign_node])),
        }
    }
}

impl Client {
    async fn pair_device_state(&self) -> PairDeviceState {
        let store = self.store.lock().await;
        PairDeviceState {
            identity_key: store.identity_key.clone(),
            noise_key: store.noise_key.clone(),
            adv_secret_key: store.adv_secret_key,
        }
    }

    /// Handles `iq/pair-device`: extract the ref, emit the QR code and
    /// acknowledge.
    pub(crate) async fn handle_pair_device(self: &Arc<Self>, node: Node) {
        let ref_bytes = match node
            .get_optional_child_by_tag(&["pair-device", "ref"])
            .and_then(Node::content_bytes)
        {
            Some(bytes) => bytes,
            None => {
                warn!(target: "Client/Pair", "pair-device notification without ref");
                return;
            }
        };
        let ref_str = String::from_utf8_lossy(ref_bytes).into_owned();

        let state = self.pair_device_state().await;
        let qr = PairUtils::make_qr_data(&state, &ref_str);

        *self.pairing_state.lock().await = PairingState::QrDisplayed;
        self.dispatch_event(Event::Qr { code: qr }).await;

        match PairUtils::build_ack_node(&node) {
            Some(ack) => {
                if let Err(e) = self.send_node(&ack).await {
                    warn!(target: "Client/Pair", "Failed to ack pair-device: {e}");
                }
                *self.pairing_state.lock().await = PairingState::AwaitingPairSuccess;
            }
            None => warn!(target: "Client/Pair", "pair-device notification without id"),
        }
    }

    /// Handles `iq/pair-success`: verify the ADV identity chain, reply
    /// with our device signature and persist the companion JID.
    pub(crate) async fn handle_pair_success(self: &Arc<Self>, node: Node) {
        *self.pairing_state.lock().await = PairingState::Verifying;

        let pair_success = match node.get_optional_child("pair-success") {
            Some(child) => child,
            None => return,
        };
        let req_id = match node.attrs.get("id") {
            Some(id) => id.clone(),
            None => {
                warn!(target: "Client/Pair", "pair-success without id");
                return;
            }
        };

        let device_identity = match pair_success
            .get_optional_child("device-identity")
            .and_then(Node::content_bytes)
        {
            Some(bytes) => bytes.to_vec(),
            None => {
                self.fail_pairing(500, "missing-device-identity").await;
                return;
            }
        };
        let companion_jid = pair_success
            .get_optional_child("device")
            .and_then(|d| d.attrs().optional_jid("jid"));

        let state = self.pair_device_state().await;
        let (identity_bytes, key_index) =
            match PairUtils::do_pair_crypto(&state, &device_identity) {
                Ok(result) => result,
                Err(e) => {
                    // Integrity failure: no reply, no persisted state.
                    error!(target: "Client/Pair", "Pairing verification failed: {e}");
                    self.fail_pairing(e.code, e.text).await;
                    return;
                }
            };

        let response = PairUtils::build_pair_success_response(&req_id, identity_bytes, key_index);
        if let Err(e) = self.send_node(&response).await {
            warn!(target: "Client/Pair", "Failed to send pair-device-sign: {e}");
            self.fail_pairing(500, "send-failed").await;
            return;
        }

        let jid = match companion_jid {
            Some(jid) => jid,
            None => {
                warn!(target: "Client/Pair", "pair-success without device jid");
                self.fail_pairing(500, "missing-jid").await;
                return;
            }
        };

        self.store.lock().await.companion = Some(jid.clone());
        *self.pairing_state.lock().await = PairingState::Paired;
        info!(target: "Client/Pair", "Paired as {jid}");
        self.dispatch_event(Event::PairSuccess { jid }).await;
        debug!(target: "Client/Pair", "Awaiting post-pair reconnect");
    }

    async fn fail_pairing(&self, code: u16, text: &str) {
        *self.pairing_state.lock().await = PairingState::PairingFailed;
        self.dispatch_event(Event::PairError {
            code,
            text: text.to_string(),
        })
        .await;
    }

    pub async fn pairing_state(&self) -> PairingState {
        *self.pairing_state.lock().await
    }
}

/// Phone-side helper used in tests: produces the `pair-success` payload a
/// primary device would send for the given companion keys.
pub fn build_signed_identity_for_companion(
    phone_identity: &crate::crypto::key_pair::KeyPair,
    companion: &PairDeviceState,
    key_index: u32,
) -> Vec<u8> {
    let inner = proto::AdvDeviceIdentity {
        raw_id: Some(42),
        timestamp: Some(1_700_000_000),
        key_index: Some(key_index),
    }
    .encode_to_vec();

    let msg = [
        ADV_PREFIX_ACCOUNT_SIGNATURE,
        inner.as_slice(),
        &companion.identity_key.public_key[..],
    ]
    .concat();
    let account_signature = xed25519::sign(&phone_identity.private_key, &msg);

    let details = proto::AdvSignedDeviceIdentity {
        details: Some(inner),
        account_signature_key: Some(phone_identity.public_key.to_vec()),
        account_signature: Some(account_signature.to_vec()),
        device_signature: None,
    }
    .encode_to_vec();

    let mut mac = HmacSha256::new_from_slice(&companion.adv_secret_key)
        .expect("HMAC-SHA256 accepts any key size");
    mac.update(&details);
    let hmac = mac.finalize().into_bytes();

    proto::AdvSignedDeviceIdentityHmac {
        details: Some(details),
        hmac: Some(hmac.to_vec()),
    }
    .encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::KeyPair;

    fn companion_state() -> PairDeviceState {
        PairDeviceState {
            identity_key: KeyPair::new(),
            noise_key: KeyPair::new(),
            adv_secret_key: [7u8; 32],
        }
    }

    #[test]
    fn test_qr_data_layout() {
        let state = companion_state();
        let qr = PairUtils::make_qr_data(&state, "1@abcdef");
        let parts: Vec<&str> = qr.split(',').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "1@abcdef");
        assert_eq!(
            BASE64_STANDARD.decode(parts[1]).unwrap(),
            state.noise_key.public_key
        );
        assert_eq!(
            BASE64_STANDARD.decode(parts[2]).unwrap(),
            state.identity_key.public_key
        );
        assert_eq!(
            BASE64_STANDARD.decode(parts[3]).unwrap(),
            state.adv_secret_key
        );
    }

    #[test]
    fn test_pair_crypto_happy_path() {
        let phone = KeyPair::new();
        let companion = companion_state();
        let payload = build_signed_identity_for_companion(&phone, &companion, 3);

        let (identity_bytes, key_index) =
            PairUtils::do_pair_crypto(&companion, &payload).expect("valid identity accepted");
        assert_eq!(key_index, 3);

        let reply = proto::AdvSignedDeviceIdentity::decode(identity_bytes.as_slice()).unwrap();
        assert!(reply.account_signature.is_none(), "account signature cleared");
        let device_sig: [u8; 64] = reply
            .device_signature
            .as_deref()
            .unwrap()
            .try_into()
            .unwrap();

        // The device signature covers prefix || details || identity_pub ||
        // account_signature; the account signature only exists in the
        // original payload since the reply clears it.
        let inner = reply.details.unwrap();
        let original = proto::AdvSignedDeviceIdentityHmac::decode(payload.as_slice()).unwrap();
        let original_identity =
            proto::AdvSignedDeviceIdentity::decode(original.details.unwrap().as_slice()).unwrap();
        let signed_msg = [
            ADV_PREFIX_DEVICE_SIGNATURE,
            inner.as_slice(),
            &companion.identity_key.public_key[..],
            original_identity.account_signature.as_deref().unwrap(),
        ]
        .concat();
        assert!(xed25519::verify(
            &companion.identity_key.public_key,
            &signed_msg,
            &device_sig
        ));
    }

    #[test]
    fn test_pair_crypto_rejects_tampered_hmac() {
        let phone = KeyPair::new();
        let companion = companion_state();
        let payload = build_signed_identity_for_companion(&phone, &companion, 1);

        let mut container =
            proto::AdvSignedDeviceIdentityHmac::decode(payload.as_slice()).unwrap();
        container.hmac.as_mut().unwrap()[0] ^= 0x01;
        let tampered = container.encode_to_vec();

        let err = PairUtils::do_pair_crypto(&companion, &tampered).unwrap_err();
        assert_eq!(err.code, 401);
        assert_eq!(err.text, "hmac-mismatch");
    }

    #[test]
    fn test_pair_crypto_rejects_tampered_details() {
        let phone = KeyPair::new();
        let companion = companion_state();
        let payload = build_signed_identity_for_companion(&phone, &companion, 1);

        let mut container =
            proto::AdvSignedDeviceIdentityHmac::decode(payload.as_slice()).unwrap();
        container.details.as_mut().unwrap()[0] ^= 0x01;
        let tampered = container.encode_to_vec();

        let err = PairUtils::do_pair_crypto(&companion, &tampered).unwrap_err();
        assert_eq!(err.code, 401);
    }

    #[test]
    fn test_pair_crypto_rejects_wrong_account_signature() {
        let phone = KeyPair::new();
        let companion = companion_state();
        let payload = build_signed_identity_for_companion(&phone, &companion, 1);

        let container = proto::AdvSignedDeviceIdentityHmac::decode(payload.as_slice()).unwrap();
        let mut identity =
            proto::AdvSignedDeviceIdentity::decode(container.details.unwrap().as_slice()).unwrap();
        identity.account_signature.as_mut().unwrap()[5] ^= 0x40;
        let details = identity.encode_to_vec();

        // Recompute a valid HMAC so only the signature check can fail.
        let mut mac = HmacSha256::new_from_slice(&companion.adv_secret_key).unwrap();
        mac.update(&details);
        let forged = proto::AdvSignedDeviceIdentityHmac {
            details: Some(details),
            hmac: Some(mac.finalize().into_bytes().to_vec()),
        }
        .encode_to_vec();

        let err = PairUtils::do_pair_crypto(&companion, &forged).unwrap_err();
        assert_eq!(err.text, "signature-mismatch");
    }

    #[test]
    fn test_pair_crypto_rejects_wrong_signature_key() {
        let phone = KeyPair::new();
        let companion = companion_state();
        let payload = build_signed_identity_for_companion(&phone, &companion, 1);

        let container = proto::AdvSignedDeviceIdentityHmac::decode(payload.as_slice()).unwrap();
        let mut identity =
            proto::AdvSignedDeviceIdentity::decode(container.details.unwrap().as_slice()).unwrap();
        identity.account_signature_key = Some(KeyPair::new().public_key.to_vec());
        let details = identity.encode_to_vec();

        let mut mac = HmacSha256::new_from_slice(&companion.adv_secret_key).unwrap();
        mac.update(&details);
        let forged = proto::AdvSignedDeviceIdentityHmac {
            details: Some(details),
            hmac: Some(mac.finalize().into_bytes().to_vec()),
        }
        .encode_to_vec();

        let err = PairUtils::do_pair_crypto(&companion, &forged).unwrap_err();
        assert_eq!(err.text, "signature-mismatch");
    }

    #[tokio::test]
    async fn test_tampered_pair_success_is_dropped_without_reply() {
        use crate::store::Device;

        let device = Device::new();
        let companion = PairDeviceState {
            identity_key: device.identity_key.clone(),
            noise_key: device.noise_key.clone(),
            adv_secret_key: device.adv_secret_key,
        };
        let phone = KeyPair::new();
        let payload = build_signed_identity_for_companion(&phone, &companion, 1);

        let mut container =
            proto::AdvSignedDeviceIdentityHmac::decode(payload.as_slice()).unwrap();
        container.hmac.as_mut().unwrap()[0] ^= 0x01;
        let tampered = container.encode_to_vec();

        let client = Client::new(device);
        let mut iq_attrs = Attrs::new();
        iq_attrs.insert("id".into(), "pair-1".into());
        let node = Node {
            tag: "iq".into(),
            attrs: iq_attrs,
            content: Some(NodeContent::Nodes(vec![Node {
                tag: "pair-success".into(),
                attrs: Attrs::new(),
                content: Some(NodeContent::Nodes(vec![
                    Node {
                        tag: "device-identity".into(),
                        attrs: Attrs::new(),
                        content: Some(NodeContent::Bytes(tampered)),
                    },
                    {
                        let mut device_attrs = Attrs::new();
                        device_attrs
                            .insert("jid".into(), "491234567890:4@s.whatsapp.net".into());
                        Node {
                            tag: "device".into(),
                            attrs: device_attrs,
                            content: None,
                        }
                    },
                ])),
            }])),
        };

        client.handle_pair_success(node).await;

        assert_eq!(client.pairing_state().await, PairingState::PairingFailed);
        // A compromised pairing leaves no trace: nothing persisted.
        assert!(client.store.lock().await.companion.is_none());
    }

    #[test]
    fn test_pair_success_response_shape() {
        let node = PairUtils::build_pair_success_response("id-1", vec![1, 2, 3], 7);
        assert_eq!(node.tag, "iq");
        assert_eq!(node.attrs.get("type").unwrap(), "result");
        let identity = node
            .get_optional_child_by_tag(&["pair-device-sign", "device-identity"])
            .unwrap();
        assert_eq!(identity.attrs.get("key-index").unwrap(), "7");
        assert_eq!(identity.content_bytes().unwrap(), &[1, 2, 3]);
    }
}
