use std::io::Write;

use crate::binary::error::{BinaryError, Result};
use crate::binary::jid::{self, Jid};
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::binary::token;

/// Returns the JID a string encodes to, if the compact wire forms apply.
///
/// Only the well-known servers get the compact encoding; anything else is
/// written as a plain string so unknown addresses survive a round-trip
/// unchanged.
fn compact_jid(input: &str) -> Option<Jid> {
    if !input.contains('@') {
        return None;
    }
    let parsed: Jid = input.parse().ok()?;
    if parsed.user.is_empty() {
        return None;
    }
    if parsed.device > 0 || parsed.agent > 0 {
        // The agent+device form only exists for user JIDs.
        if parsed.server == jid::DEFAULT_USER_SERVER || parsed.server == jid::HIDDEN_USER_SERVER {
            return Some(parsed);
        }
        return None;
    }
    if jid::COMPACT_SERVERS.contains(&parsed.server.as_str()) {
        Some(parsed)
    } else {
        None
    }
}

pub(crate) struct Encoder<W: Write> {
    writer: W,
}

impl<W: Write> Encoder<W> {
    pub(crate) fn new(writer: W) -> Result<Self> {
        let mut enc = Self { writer };
        // Leading flag byte: zero means uncompressed payload.
        enc.write_u8(0)?;
        Ok(enc)
    }

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.writer.write_all(&[val]).map_err(|_| BinaryError::Io)
    }

    fn write_u16_be(&mut self, val: u16) -> Result<()> {
        self.writer
            .write_all(&val.to_be_bytes())
            .map_err(|_| BinaryError::Io)
    }

    fn write_u20_be(&mut self, val: u32) -> Result<()> {
        self.writer
            .write_all(&[
                ((val >> 16) & 0x0F) as u8,
                ((val >> 8) & 0xFF) as u8,
                (val & 0xFF) as u8,
            ])
            .map_err(|_| BinaryError::Io)
    }

    fn write_u32_be(&mut self, val: u32) -> Result<()> {
        self.writer
            .write_all(&val.to_be_bytes())
            .map_err(|_| BinaryError::Io)
    }

    fn write_raw_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).map_err(|_| BinaryError::Io)
    }

    fn write_bytes_with_len(&mut self, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        if len < 256 {
            self.write_u8(token::BINARY_8)?;
            self.write_u8(len as u8)?;
        } else if len < (1 << 20) {
            self.write_u8(token::BINARY_20)?;
            self.write_u20_be(len as u32)?;
        } else {
            self.write_u8(token::BINARY_32)?;
            self.write_u32_be(len as u32)?;
        }
        self.write_raw_bytes(bytes)
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        if let Some(index) = token::index_of_single_token(s) {
            self.write_u8(index)?;
        } else if let Some((dict, index)) = token::index_of_double_byte_token(s) {
            self.write_u8(token::DICTIONARY_0 + dict)?;
            self.write_u8(index)?;
        } else if Self::validate_nibble(s) {
            self.write_packed(s, token::NIBBLE_8)?;
        } else if Self::validate_hex(s) {
            self.write_packed(s, token::HEX_8)?;
        } else if let Some(jid) = compact_jid(s) {
            self.write_jid(&jid)?;
        } else {
            self.write_bytes_with_len(s.as_bytes())?;
        }
        Ok(())
    }

    fn write_jid(&mut self, jid: &Jid) -> Result<()> {
        if jid.device > 0 || jid.agent > 0 {
            let domain_type = if jid.server == jid::HIDDEN_USER_SERVER {
                1
            } else {
                jid.agent
            };
            self.write_u8(token::AD_JID)?;
            self.write_u8(domain_type)?;
            self.write_u8(jid.device as u8)?;
            self.write_string(&jid.user)?;
        } else {
            self.write_u8(token::JID_PAIR)?;
            if jid.user.is_empty() {
                self.write_u8(token::LIST_EMPTY)?;
            } else {
                self.write_string(&jid.user)?;
            }
            self.write_string(&jid.server)?;
        }
        Ok(())
    }

    fn validate_nibble(value: &str) -> bool {
        !value.is_empty()
            && value.len() <= token::PACKED_MAX as usize
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || b == b'-' || b == b'.')
    }

    fn validate_hex(value: &str) -> bool {
        !value.is_empty()
            && value.len() <= token::PACKED_MAX as usize
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    }

    fn pack_nibble(b: u8) -> Result<u8> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'-' => Ok(10),
            b'.' => Ok(11),
            _ => Err(BinaryError::InvalidPackedChar(b)),
        }
    }

    fn pack_hex(b: u8) -> Result<u8> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'A'..=b'F' => Ok(10 + b - b'A'),
            _ => Err(BinaryError::InvalidPackedChar(b)),
        }
    }

    fn write_packed(&mut self, value: &str, data_type: u8) -> Result<()> {
        if value.len() > token::PACKED_MAX as usize {
            return Err(BinaryError::Unpackable);
        }
        self.write_u8(data_type)?;

        // The top bit of the length byte marks an odd character count,
        // i.e. the final low nibble is padding.
        let mut rounded_len = value.len().div_ceil(2) as u8;
        if value.len() % 2 != 0 {
            rounded_len |= 0x80;
        }
        self.write_u8(rounded_len)?;

        let pack: fn(u8) -> Result<u8> = if data_type == token::NIBBLE_8 {
            Self::pack_nibble
        } else {
            Self::pack_hex
        };

        let bytes = value.as_bytes();
        for pair in bytes.chunks(2) {
            let high = pack(pair[0])?;
            let low = if pair.len() == 2 { pack(pair[1])? } else { 0x0F };
            self.write_u8((high << 4) | low)?;
        }
        Ok(())
    }

    fn write_list_start(&mut self, len: usize) -> Result<()> {
        if len == 0 {
            self.write_u8(token::LIST_EMPTY)?;
        } else if len < 256 {
            self.write_u8(token::LIST_8)?;
            self.write_u8(len as u8)?;
        } else {
            self.write_u8(token::LIST_16)?;
            self.write_u16_be(len as u16)?;
        }
        Ok(())
    }

    fn write_attributes(&mut self, attrs: &Attrs) -> Result<()> {
        for (key, value) in attrs {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }

    fn write_content(&mut self, content: &NodeContent) -> Result<()> {
        match content {
            NodeContent::String(s) => self.write_string(s),
            NodeContent::Bytes(bytes) => self.write_bytes_with_len(bytes),
            NodeContent::Nodes(nodes) => {
                self.write_list_start(nodes.len())?;
                for node in nodes {
                    self.write_node(node)?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn write_node(&mut self, node: &Node) -> Result<()> {
        let content_len = usize::from(node.content.is_some());
        let list_len = 1 + node.attrs.len() * 2 + content_len;

        self.write_list_start(list_len)?;
        self.write_string(&node.tag)?;
        self.write_attributes(&node.attrs)?;
        if let Some(content) = &node.content {
            self.write_content(content)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use std::io::Cursor;

    fn encode(node: &Node) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(Cursor::new(&mut buffer)).unwrap();
        encoder.write_node(node).unwrap();
        buffer
    }

    #[test]
    fn test_token_only_node() {
        // "message" and "receipt" are both dictionary tokens, so the whole
        // node is five bytes: flag, LIST_8, size, token, token.
        let node = Node::new(
            "message",
            Attrs::new(),
            Some(NodeContent::String("receipt".to_string())),
        );
        let bytes = encode(&node);
        assert_eq!(bytes.len(), 5);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], token::LIST_8);
        assert_eq!(bytes[2], 2);
    }

    #[test]
    fn test_list_header_size_counts_attrs_and_content() {
        let node = Node::new(
            "iq",
            attrs! {"to" => "s.whatsapp.net", "type" => "get", "id" => "abc"},
            None,
        );
        let bytes = encode(&node);
        assert_eq!(bytes[1], token::LIST_8);
        // 1 tag + 2 * 3 attrs, no content.
        assert_eq!(bytes[2], 7);
    }

    #[test]
    fn test_nibble_packing() {
        let node = Node::new(
            "item",
            Attrs::new(),
            Some(NodeContent::String("-.0123456789".to_string())),
        );
        let bytes = encode(&node);
        let tail = &bytes[bytes.len() - 8..];
        assert_eq!(tail[0], token::NIBBLE_8);
        assert_eq!(tail[1], 6);
        assert_eq!(&tail[2..], &[0xAB, 0x01, 0x23, 0x45, 0x67, 0x89]);
    }

    #[test]
    fn test_odd_length_pack_sets_high_bit() {
        let node = Node::new(
            "item",
            Attrs::new(),
            Some(NodeContent::String("123".to_string())),
        );
        let bytes = encode(&node);
        let tail = &bytes[bytes.len() - 4..];
        assert_eq!(tail[0], token::NIBBLE_8);
        assert_eq!(tail[1], 0x80 | 2);
        assert_eq!(&tail[2..], &[0x12, 0x3F]);
    }

    #[test]
    fn test_hex_requires_uppercase() {
        assert!(Encoder::<Vec<u8>>::validate_hex("DEADBEEF"));
        assert!(!Encoder::<Vec<u8>>::validate_hex("deadbeef"));
        assert!(!Encoder::<Vec<u8>>::validate_hex(""));
    }

    #[test]
    fn test_packed_max_boundary() {
        let at_max = "0".repeat(token::PACKED_MAX as usize);
        let over_max = "0".repeat(token::PACKED_MAX as usize + 1);
        assert!(Encoder::<Vec<u8>>::validate_nibble(&at_max));
        assert!(!Encoder::<Vec<u8>>::validate_nibble(&over_max));
    }

    #[test]
    fn test_binary_length_boundaries() {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(Cursor::new(&mut buffer)).unwrap();
        encoder.write_bytes_with_len(&[0x42; 255]).unwrap();
        assert_eq!(buffer[1], token::BINARY_8);
        assert_eq!(buffer[2], 255);

        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(Cursor::new(&mut buffer)).unwrap();
        encoder.write_bytes_with_len(&[0x42; 256]).unwrap();
        assert_eq!(buffer[1], token::BINARY_20);
        assert_eq!(&buffer[2..5], &[0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_unknown_server_jid_falls_back_to_string() {
        assert!(compact_jid("user@unknown.example").is_none());
        assert!(compact_jid("491234@s.whatsapp.net").is_some());
        assert!(compact_jid("not a jid").is_none());
    }
}
