use crate::binary::jid::SERVER_JID;
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::client::Client;
use crate::crypto::key_pair::{PreKey, DJB_TYPE};
use crate::request::{InfoQuery, InfoQueryType, IqError};
use crate::store::Device;
use log::info;

/// Number of one-time pre-keys published on first login.
const PREKEY_UPLOAD_COUNT: u32 = 30;

fn key_node(tag: &str, bytes: Vec<u8>) -> Node {
    Node {
        tag: tag.to_string(),
        attrs: Attrs::new(),
        content: Some(NodeContent::Bytes(bytes)),
    }
}

/// Encodes a pre-key as the wire expects it: 3-byte big-endian id plus the
/// raw public key, and the signature for the signed pre-key.
fn encode_prekey(prekey: &PreKey, include_signature: bool) -> Node {
    let mut children = vec![
        key_node("id", prekey.key_id.to_be_bytes()[1..].to_vec()),
        key_node("value", prekey.key_pair.public_key.to_vec()),
    ];
    if include_signature {
        if let Some(signature) = prekey.signature {
            children.push(key_node("signature", signature.to_vec()));
        }
    }
    Node {
        tag: "key".to_string(),
        attrs: Attrs::new(),
        content: Some(NodeContent::Nodes(children)),
    }
}

/// Builds the `encrypt` namespace upload body from device state and a
/// fresh batch of one-time keys.
pub fn build_upload_content(device: &Device, prekeys: &[PreKey]) -> Vec<Node> {
    vec![
        key_node(
            "registration",
            device.registration_id.to_be_bytes().to_vec(),
        ),
        key_node("type", vec![DJB_TYPE]),
        key_node("identity", device.identity_key.public_key.to_vec()),
        Node {
            tag: "list".to_string(),
            attrs: Attrs::new(),
            content: Some(NodeContent::Nodes(
                prekeys.iter().map(|k| encode_prekey(k, false)).collect(),
            )),
        },
        encode_prekey(&device.signed_pre_key, true),
    ]
}

impl Client {
    /// Publishes the initial batch of one-time pre-keys. Called once after
    /// the first successful login.
    pub(crate) async fn upload_prekeys(&self) -> Result<(), IqError> {
        let (content, count) = {
            let store = self.store.lock().await;
            let prekeys: Vec<PreKey> = (1..=PREKEY_UPLOAD_COUNT).map(PreKey::new).collect();
            (build_upload_content(&store, &prekeys), prekeys.len())
        };

        info!(target: "Client", "Uploading {count} pre-keys");
        self.send_iq(InfoQuery {
            namespace: "encrypt",
            query_type: InfoQueryType::Set,
            to: SERVER_JID.parse().unwrap(),
            id: None,
            content: Some(NodeContent::Nodes(content)),
            timeout: None,
        })
        .await
        .map(|_| ())
    }
}
