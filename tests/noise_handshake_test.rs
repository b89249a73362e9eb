//! Known-answer tests for the Noise XX handshake, generated against an
//! independent implementation of the same construction, plus a full
//! simulated round-trip where the test plays the server.

use prost::Message;
use wamd::crypto::key_pair::KeyPair;
use wamd::handshake::HandshakeState;
use wamd::proto;
use wamd::socket::consts::{NOISE_START_PATTERN, WA_CONN_HEADER};
use wamd::socket::{NoiseHandshake, NoiseSocket};
use wamd::store::Device;

fn hex_to_bytes<const N: usize>(hex_str: &str) -> [u8; N] {
    hex::decode(hex_str)
        .expect("valid hex")
        .try_into()
        .unwrap_or_else(|v: Vec<u8>| panic!("expected length {N}, got {}", v.len()))
}

// Fixed key material for the reference vectors.
const CLIENT_EPH_PRIV: &str = "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20";
const SERVER_EPH_PUB: &str = "5869aff450549732cbaaed5e5df9b30a6da31cb0e5742bad5ad4a1a768f1a67b";
const SERVER_STAT_PUB: &str = "64b101b1d0be5a8704bd078f9895001fc03e8e9f9522f188dd128d9846d48466";
const CLIENT_STAT_PRIV: &str = "6162636465666768696a6b6c6d6e6f707172737475767778797a7b7c7d7e7f80";
const CLIENT_EPH_PUB: &str = "07a37cbc142093c8b755dc1b10e86cb426374ad16aa853ed0bdfc0b2b86d1c7c";
const CLIENT_STAT_PUB: &str = "244fe3b963e899dd295baffce248d3530f3a9a7479ba063002680ebfe7adad49";

const H_PROLOGUE: &str = "24076ca3815931f30d113dfc5f158dbf4e5ff5a2f01da528ff682074befc9eed";
const H_CLIENT_EPH: &str = "fd423a6941b0241917bd0985938e5bb27cc9e2d8ae162b344f991dbffe84c058";
const H_SERVER_EPH: &str = "2c78650fc220f44965e1f49f206b82d94a309a354d45af5b37a41d69ce2f3d06";
const SALT_1: &str = "3613e4412bdd0f4e74bd1749c9393fdbf0cd0a0e7e1042b660006feb81cfde60";
const STATIC_CT: &str = "00b3aff25b3d82c729de225f5564ba476253f9b472152396516f44f2905b050035f6e5d3e70c0bd82e12956ab5245e17";
const H_AFTER_STATIC: &str = "c4856b26bd0a542a2465d8a85e187df2643d5399cd9a17f7e2e69ad9c6332746";
const SALT_2: &str = "b944bcfbc1e4797e12896b64bebaf33bff4305ad498500f29cf7646ab79aac27";
const PAYLOAD_CT: &str = "598cd4c3fef838c2048636e839726ac98435a2f93baf6e7123ece9fac5b158dd93de6e2718e90355d93b7263862add944b153be7";
const H_AFTER_PAYLOAD: &str = "78e9ed1ef1c5e25e28d871cf08322217324618545f84779d3daf9cc336d79aeb";
const CLIENT_STATIC_CT: &str = "1e9a18d4052438441f0a792b3eeb2e91fedb31cb078c36af2f1b187e406b1d2f69005c9ebe2ae61b7c28d6cdb940a850";
const SALT_3: &str = "47e97c4f16fb217029cf01a51cad268c7ed6a12bca9ef7ce9be7c8fdb6c7d740";
const CLIENT_PAYLOAD: &[u8] = b"client-payload-protobuf-bytes";
const CLIENT_PAYLOAD_CT: &str =
    "61dfa41da60cd1e0a27f30eeec317bf961a26dabeefeffb7c46e4ce60582ed3182d2a0f92f6739545453df2f73";
const TRANSPORT_CT0: &str =
    "13c2be23eb93ee2ce7084436c5108ebd01d2775d147804b59358811603b120f0130ca5450e";
const SERVER_FRAME_CT0: &str =
    "441a2590a0fd51d7dce0f85b2e1375b7679b565ea38a64cdfb4b20bc0f85ca90ba3ddef35d4b";

#[test]
fn test_handshake_known_answer_flow() {
    let client_eph_priv = hex_to_bytes::<32>(CLIENT_EPH_PRIV);
    let client_eph_pub = hex_to_bytes::<32>(CLIENT_EPH_PUB);
    let server_eph_pub = hex_to_bytes::<32>(SERVER_EPH_PUB);
    let client_stat_priv = hex_to_bytes::<32>(CLIENT_STAT_PRIV);
    let client_stat_pub = hex_to_bytes::<32>(CLIENT_STAT_PUB);

    let mut nh = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER).unwrap();
    assert_eq!(*nh.hash(), hex_to_bytes::<32>(H_PROLOGUE), "prologue hash");

    nh.authenticate(&client_eph_pub);
    assert_eq!(
        *nh.hash(),
        hex_to_bytes::<32>(H_CLIENT_EPH),
        "hash after client ephemeral"
    );

    nh.authenticate(&server_eph_pub);
    assert_eq!(
        *nh.hash(),
        hex_to_bytes::<32>(H_SERVER_EPH),
        "hash after server ephemeral"
    );

    nh.mix_shared_secret(&client_eph_priv, &server_eph_pub)
        .unwrap();
    assert_eq!(*nh.salt(), hex_to_bytes::<32>(SALT_1), "salt after mix 1");

    let static_plain = nh.decrypt(&hex::decode(STATIC_CT).unwrap()).unwrap();
    assert_eq!(
        static_plain,
        hex::decode(SERVER_STAT_PUB).unwrap(),
        "decrypted server static"
    );
    assert_eq!(
        *nh.hash(),
        hex_to_bytes::<32>(H_AFTER_STATIC),
        "hash after static decrypt"
    );

    let server_static: [u8; 32] = static_plain.try_into().unwrap();
    nh.mix_shared_secret(&client_eph_priv, &server_static)
        .unwrap();
    assert_eq!(*nh.salt(), hex_to_bytes::<32>(SALT_2), "salt after mix 2");

    let payload_plain = nh.decrypt(&hex::decode(PAYLOAD_CT).unwrap()).unwrap();
    assert_eq!(payload_plain, b"opaque-noise-certificate-chain-bytes");
    assert_eq!(
        *nh.hash(),
        hex_to_bytes::<32>(H_AFTER_PAYLOAD),
        "hash after payload decrypt"
    );

    let encrypted_static = nh.encrypt(&client_stat_pub).unwrap();
    assert_eq!(
        hex::encode(&encrypted_static),
        CLIENT_STATIC_CT,
        "encrypted client static"
    );

    nh.mix_shared_secret(&client_stat_priv, &server_eph_pub)
        .unwrap();
    assert_eq!(*nh.salt(), hex_to_bytes::<32>(SALT_3), "salt after mix 3");

    let encrypted_payload = nh.encrypt(CLIENT_PAYLOAD).unwrap();
    assert_eq!(
        hex::encode(&encrypted_payload),
        CLIENT_PAYLOAD_CT,
        "encrypted client payload"
    );

    // Final split: verify the derived transport keys through the frame
    // cipher in both directions.
    let (write_key, read_key) = nh.finish().unwrap();
    let socket = NoiseSocket::new(write_key, read_key);

    let first_frame = socket.encrypt_frame(b"first-transport-frame").unwrap();
    assert_eq!(hex::encode(&first_frame), TRANSPORT_CT0, "write key vector");

    let (plain, counter) = socket
        .decrypt_frame(&hex::decode(SERVER_FRAME_CT0).unwrap())
        .unwrap();
    assert_eq!(plain, b"server-transport-frame", "read key vector");
    assert_eq!(counter, 0);
}

/// Plays both sides of the XX exchange: [`HandshakeState`] as the client,
/// a raw [`NoiseHandshake`] as the relay. After `finish` the two transport
/// ciphers must interoperate in both directions.
#[test]
fn test_full_handshake_against_simulated_server() {
    let mut device = Device::new();
    device.companion = Some("491234567890:5@s.whatsapp.net".parse().unwrap());
    let client_static = device.noise_key.clone();
    let ephemeral = KeyPair::new();

    let server_static = KeyPair::new();
    let server_ephemeral = KeyPair::new();
    let server_payload = b"certificate-chain".to_vec();

    let mut client = HandshakeState::with_ephemeral(&device, ephemeral.clone()).unwrap();
    let client_hello = client.build_client_hello();

    // --- server side ---
    let hello = proto::HandshakeMessage::decode(client_hello.as_slice())
        .unwrap()
        .client_hello
        .unwrap();
    let client_eph: [u8; 32] = hello.ephemeral.unwrap().try_into().unwrap();

    let mut server = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER).unwrap();
    server.authenticate(&client_eph);
    server.authenticate(&server_ephemeral.public_key);
    server
        .mix_shared_secret(&server_ephemeral.private_key, &client_eph)
        .unwrap();
    let static_ct = server.encrypt(&server_static.public_key).unwrap();
    server
        .mix_shared_secret(&server_static.private_key, &client_eph)
        .unwrap();
    let payload_ct = server.encrypt(&server_payload).unwrap();

    let server_hello = proto::HandshakeMessage {
        server_hello: Some(proto::ServerHello {
            ephemeral: Some(server_ephemeral.public_key.to_vec()),
            r#static: Some(static_ct),
            payload: Some(payload_ct),
        }),
        ..Default::default()
    }
    .encode_to_vec();

    // --- client side ---
    let client_finish = client
        .read_server_hello_and_build_client_finish(&server_hello)
        .unwrap();

    // --- server processes ClientFinish ---
    let finish = proto::HandshakeMessage::decode(client_finish.as_slice())
        .unwrap()
        .client_finish
        .unwrap();
    let static_plain = server.decrypt(&finish.r#static.unwrap()).unwrap();
    assert_eq!(static_plain, client_static.public_key);

    let client_static_pub: [u8; 32] = static_plain.try_into().unwrap();
    server
        .mix_shared_secret(&server_ephemeral.private_key, &client_static_pub)
        .unwrap();
    let payload_plain = server.decrypt(&finish.payload.unwrap()).unwrap();
    let client_payload = proto::ClientPayload::decode(payload_plain.as_slice()).unwrap();
    assert_eq!(client_payload.username, Some(491234567890));
    assert_eq!(client_payload.passive, Some(true));

    // --- transport keys interoperate ---
    let (client_write, client_read) = client.finish().unwrap();
    let (server_okm_first, server_okm_second) = server.finish().unwrap();

    let client_socket = NoiseSocket::new(client_write, client_read);
    // The server writes with the client's read key and vice versa.
    let server_socket = NoiseSocket::new(server_okm_second, server_okm_first);

    for round in 0..3u8 {
        let c2s = client_socket.encrypt_frame(&[round; 17]).unwrap();
        let (plain, _) = server_socket.decrypt_frame(&c2s).unwrap();
        assert_eq!(plain, vec![round; 17]);

        let s2c = server_socket.encrypt_frame(&[round ^ 0xFF; 9]).unwrap();
        let (plain, counter) = client_socket.decrypt_frame(&s2c).unwrap();
        assert_eq!(plain, vec![round ^ 0xFF; 9]);
        assert_eq!(counter, u64::from(round));
    }
}

#[test]
fn test_handshake_rejects_tampered_server_static() {
    let device = Device::new();
    let ephemeral = KeyPair::new();
    let server_ephemeral = KeyPair::new();
    let server_static = KeyPair::new();

    let mut client = HandshakeState::with_ephemeral(&device, ephemeral).unwrap();
    let client_hello = client.build_client_hello();
    let hello = proto::HandshakeMessage::decode(client_hello.as_slice())
        .unwrap()
        .client_hello
        .unwrap();
    let client_eph: [u8; 32] = hello.ephemeral.unwrap().try_into().unwrap();

    let mut server = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER).unwrap();
    server.authenticate(&client_eph);
    server.authenticate(&server_ephemeral.public_key);
    server
        .mix_shared_secret(&server_ephemeral.private_key, &client_eph)
        .unwrap();
    let mut static_ct = server.encrypt(&server_static.public_key).unwrap();
    static_ct[3] ^= 0x10;
    server
        .mix_shared_secret(&server_static.private_key, &client_eph)
        .unwrap();
    let payload_ct = server.encrypt(b"certs").unwrap();

    let server_hello = proto::HandshakeMessage {
        server_hello: Some(proto::ServerHello {
            ephemeral: Some(server_ephemeral.public_key.to_vec()),
            r#static: Some(static_ct),
            payload: Some(payload_ct),
        }),
        ..Default::default()
    }
    .encode_to_vec();

    assert!(client
        .read_server_hello_and_build_client_finish(&server_hello)
        .is_err());
}
