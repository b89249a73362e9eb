use std::sync::LazyLock;

use base64::prelude::*;
use prost::Message;

use crate::proto;
use crate::store::Device;

const BUILD_HASH: &str = "S9Kdc4pc4EJryo21snc5cg==";

static BASE_CLIENT_PAYLOAD: LazyLock<proto::ClientPayload> =
    LazyLock::new(|| proto::ClientPayload {
        user_agent: Some(proto::UserAgent {
            platform: Some(proto::Platform::Web as i32),
            release_channel: Some(proto::ReleaseChannel::Release as i32),
            app_version: Some(proto::AppVersion {
                primary: Some(2),
                secondary: Some(2144),
                tertiary: Some(11),
            }),
            mcc: Some("000".to_string()),
            mnc: Some("000".to_string()),
            os_version: Some("0.1".to_string()),
            manufacturer: Some("".to_string()),
            device: Some("Desktop".to_string()),
            os_build_number: Some("0.1".to_string()),
            locale_language_iso6391: Some("en".to_string()),
            locale_country_iso31661_alpha2: Some("en".to_string()),
        }),
        web_info: Some(proto::WebInfo {
            web_sub_platform: Some(proto::WebSubPlatform::WebBrowser as i32),
        }),
        connect_type: Some(proto::ConnectType::WifiUnknown as i32),
        connect_reason: Some(proto::ConnectReason::UserActivated as i32),
        ..Default::default()
    });

static COMPANION_PROPS: LazyLock<proto::CompanionProps> =
    LazyLock::new(|| proto::CompanionProps {
        os: Some("Windows".to_string()),
        version: Some(proto::AppVersion {
            primary: Some(10),
            secondary: None,
            tertiary: None,
        }),
        platform_type: Some(proto::PlatformType::Chrome as i32),
        require_full_sync: Some(false),
    });

/// Builds the ClientPayload carried inside ClientFinish: a login payload
/// for an already-paired device, otherwise a registration payload that
/// kicks off the QR pairing flow on the server side.
pub fn get_client_payload(device: &Device) -> proto::ClientPayload {
    match &device.companion {
        Some(jid) => get_login_payload(device, jid),
        None => get_registration_payload(device),
    }
}

fn get_login_payload(_device: &Device, jid: &crate::binary::jid::Jid) -> proto::ClientPayload {
    let mut payload = BASE_CLIENT_PAYLOAD.clone();
    payload.username = jid.user.parse::<u64>().ok();
    payload.device = Some(jid.device as u32);
    payload.passive = Some(true);
    payload
}

fn get_registration_payload(device: &Device) -> proto::ClientPayload {
    let mut payload = BASE_CLIENT_PAYLOAD.clone();

    let signature = device
        .signed_pre_key
        .signature
        .expect("signed pre-key carries a signature");

    let reg_data = proto::CompanionRegData {
        e_regid: Some(device.registration_id.to_be_bytes().to_vec()),
        e_keytype: Some(vec![crate::crypto::key_pair::DJB_TYPE]),
        e_ident: Some(device.identity_key.public_key.to_vec()),
        e_skey_id: Some(device.signed_pre_key.key_id.to_be_bytes()[1..].to_vec()),
        e_skey_val: Some(device.signed_pre_key.key_pair.public_key.to_vec()),
        e_skey_sig: Some(signature.to_vec()),
        build_hash: Some(
            BASE64_STANDARD
                .decode(BUILD_HASH)
                .expect("build hash constant is valid base64"),
        ),
        companion_props: Some(COMPANION_PROPS.encode_to_vec()),
    };

    payload.reg_data = Some(reg_data);
    payload.passive = Some(false);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpaired_device_sends_registration_data() {
        let device = Device::new();
        let payload = get_client_payload(&device);
        assert_eq!(payload.passive, Some(false));
        let reg = payload.reg_data.expect("registration data present");
        assert_eq!(reg.e_keytype.as_deref(), Some(&[5u8][..]));
        assert_eq!(
            reg.e_regid.as_deref(),
            Some(&device.registration_id.to_be_bytes()[..])
        );
        // Signed pre-key id travels as a 3-byte big-endian integer.
        assert_eq!(reg.e_skey_id.as_deref().map(<[u8]>::len), Some(3));
    }

    #[test]
    fn test_paired_device_sends_login_payload() {
        let mut device = Device::new();
        device.companion = Some("491234567890:3@s.whatsapp.net".parse().unwrap());
        let payload = get_client_payload(&device);
        assert_eq!(payload.username, Some(491234567890));
        assert_eq!(payload.device, Some(3));
        assert_eq!(payload.passive, Some(true));
        assert!(payload.reg_data.is_none());
    }
}
