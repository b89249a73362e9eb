use crate::binary::token;

pub const URL: &str = "wss://web.whatsapp.com/ws/chat";
pub const ORIGIN: &str = "https://web.whatsapp.com";

/// Noise protocol name, zero-padded to exactly 32 bytes.
pub const NOISE_START_PATTERN: &str = "Noise_XX_25519_AESGCM_SHA256\x00\x00\x00\x00";

pub const WA_MAGIC_VALUE: u8 = 6;

/// Prologue bytes sent before the first Noise frame and mixed into the
/// handshake hash: "WA", the protocol dialect and the token dictionary
/// version.
pub const WA_CONN_HEADER: [u8; 4] = [b'W', b'A', WA_MAGIC_VALUE, token::DICT_VERSION];

pub const FRAME_MAX_SIZE: usize = 2 << 23;
pub const FRAME_LENGTH_SIZE: usize = 3;

/// In-band length value signalling connection termination. A frame header
/// carrying this length is a soft disconnect, not data.
pub const DISCONNECT_MAGIC_LENGTH: usize = 8913411;
