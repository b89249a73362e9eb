use thiserror::Error;

use crate::binary::jid::JidError;

/// Errors produced while encoding or decoding the binary node format.
#[derive(Debug, Clone, Error)]
pub enum BinaryError {
    #[error("I/O error while writing encoded node")]
    Io,
    #[error("Invalid token read from stream: {0}")]
    InvalidToken(u8),
    #[error("Invalid node format")]
    InvalidNode,
    #[error("Attribute key was not a string")]
    NonStringKey,
    #[error("Invalid packed character {0:#x}")]
    InvalidPackedChar(u8),
    #[error("String not representable in the packed alphabet")]
    Unpackable,
    #[error("Data is not valid UTF-8")]
    InvalidUtf8,
    #[error("Zlib decompression error: {0}")]
    Zlib(String),
    #[error("JID parsing error: {0}")]
    Jid(#[from] JidError),
    #[error("Unexpected end of binary data")]
    UnexpectedEof,
    #[error("Received empty data where payload was expected")]
    EmptyData,
    #[error("Leftover data after decoding: {0} bytes")]
    LeftoverData(usize),
    #[error("Attribute parsing failed: {0}")]
    AttrParse(String),
    #[error("Missing required attribute: {0}")]
    MissingAttr(String),
}

pub type Result<T> = std::result::Result<T, BinaryError>;
