use aes_gcm::Aes256Gcm;
use log::{debug, info};
use prost::Message;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;
use tokio::time::{timeout, Duration};

use crate::crypto::key_pair::KeyPair;
use crate::proto;
use crate::socket::consts::{NOISE_START_PATTERN, WA_CONN_HEADER};
use crate::socket::{FrameSocket, NoiseHandshake, NoiseSocket, SocketError};
use crate::store::{clientpayload, Device};

const HANDSHAKE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Protobuf encoding error: {0}")]
    ProtoEncode(#[from] prost::EncodeError),
    #[error("Protobuf decoding error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),
    #[error("Handshake response is missing required parts")]
    IncompleteResponse,
    #[error("Unexpected key length in handshake response")]
    InvalidKeyLength,
    #[error("Socket error during handshake: {0}")]
    Socket(#[from] SocketError),
    #[error("Timed out waiting for handshake response")]
    Timeout,
    #[error("Connection closed during handshake")]
    Closed,
}

pub type Result<T> = std::result::Result<T, HandshakeError>;

/// Drives the client side of the XX round-trip. The symmetric crypto lives
/// in [`NoiseHandshake`]; this type owns the message sequencing and the
/// protobuf envelope.
pub struct HandshakeState {
    noise: NoiseHandshake,
    ephemeral_kp: KeyPair,
    static_kp: KeyPair,
    payload: Vec<u8>,
}

impl HandshakeState {
    pub fn new(device: &Device) -> Result<Self> {
        Self::with_ephemeral(device, KeyPair::new())
    }

    /// Same as [`new`], but with a caller-supplied ephemeral pair. Known-
    /// answer tests need this; production code never passes a fixed key.
    ///
    /// [`new`]: HandshakeState::new
    pub fn with_ephemeral(device: &Device, ephemeral_kp: KeyPair) -> Result<Self> {
        let mut noise = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER)?;
        noise.authenticate(&ephemeral_kp.public_key);

        Ok(Self {
            noise,
            ephemeral_kp,
            static_kp: device.noise_key.clone(),
            payload: clientpayload::get_client_payload(device).encode_to_vec(),
        })
    }

    pub fn build_client_hello(&self) -> Vec<u8> {
        proto::HandshakeMessage {
            client_hello: Some(proto::ClientHello {
                ephemeral: Some(self.ephemeral_kp.public_key.to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }
        .encode_to_vec()
    }

    /// Processes ServerHello and produces the ClientFinish bytes:
    /// mixes `DH(e, se)`, decrypts the server static, mixes `DH(e, ss)`,
    /// decrypts the opaque payload, then encrypts our static key and the
    /// client payload around a final `DH(s, se)` mix.
    pub fn read_server_hello_and_build_client_finish(
        &mut self,
        response_bytes: &[u8],
    ) -> Result<Vec<u8>> {
        let server_hello = proto::HandshakeMessage::decode(response_bytes)?
            .server_hello
            .ok_or(HandshakeError::IncompleteResponse)?;

        let server_ephemeral: [u8; 32] = server_hello
            .ephemeral
            .ok_or(HandshakeError::IncompleteResponse)?
            .try_into()
            .map_err(|_| HandshakeError::InvalidKeyLength)?;
        let server_static_ciphertext = server_hello
            .r#static
            .ok_or(HandshakeError::IncompleteResponse)?;
        let payload_ciphertext = server_hello
            .payload
            .ok_or(HandshakeError::IncompleteResponse)?;

        self.noise.authenticate(&server_ephemeral);
        self.noise
            .mix_shared_secret(&self.ephemeral_kp.private_key, &server_ephemeral)?;

        let server_static: [u8; 32] = self
            .noise
            .decrypt(&server_static_ciphertext)?
            .try_into()
            .map_err(|_| HandshakeError::InvalidKeyLength)?;

        self.noise
            .mix_shared_secret(&self.ephemeral_kp.private_key, &server_static)?;

        // The payload is an opaque certificate blob; it must authenticate,
        // its contents are not interpreted here.
        self.noise.decrypt(&payload_ciphertext)?;

        let encrypted_static = self.noise.encrypt(&self.static_kp.public_key)?;
        self.noise
            .mix_shared_secret(&self.static_kp.private_key, &server_ephemeral)?;
        let encrypted_payload = self.noise.encrypt(&self.payload)?;

        Ok(proto::HandshakeMessage {
            client_finish: Some(proto::ClientFinish {
                r#static: Some(encrypted_static),
                payload: Some(encrypted_payload),
            }),
            ..Default::default()
        }
        .encode_to_vec())
    }

    pub fn finish(self) -> Result<(Aes256Gcm, Aes256Gcm)> {
        Ok(self.noise.finish()?)
    }
}

/// Runs the full handshake over an already-connected frame socket and
/// returns the transport cipher with both counters at zero.
pub async fn do_handshake(
    device: &Device,
    frame_socket: &FrameSocket,
    frames_rx: &mut Receiver<bytes::Bytes>,
) -> Result<NoiseSocket> {
    let mut state = HandshakeState::new(device)?;

    debug!("--> Sending ClientHello");
    frame_socket.send_frame(&state.build_client_hello()).await?;

    let response = match timeout(HANDSHAKE_RESPONSE_TIMEOUT, frames_rx.recv()).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(HandshakeError::Closed),
        Err(_) => return Err(HandshakeError::Timeout),
    };

    debug!("<-- Received ServerHello, building ClientFinish");
    let client_finish = state.read_server_hello_and_build_client_finish(&response)?;

    debug!("--> Sending ClientFinish");
    frame_socket.send_frame(&client_finish).await?;

    let (write_key, read_key) = state.finish()?;
    info!("Handshake complete, switching to encrypted transport");

    Ok(NoiseSocket::new(write_key, read_key))
}
