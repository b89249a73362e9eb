use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Socket is closed")]
    SocketClosed,
    #[error("Socket is already open")]
    SocketAlreadyOpen,
    #[error("Frame is too large (max {max}, got {got})")]
    FrameTooLarge { max: usize, got: usize },
    #[error("Noise AEAD authentication failed")]
    HandshakeAuth,
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_websockets::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Crypto error: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, SocketError>;
