use std::borrow::Cow;
use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::binary::decoder::Decoder;
use crate::binary::encoder::Encoder;
use crate::binary::error::{BinaryError, Result};
use crate::binary::node::Node;

/// Serializes a node into its wire form, including the leading flag byte.
pub fn marshal(node: &Node) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(1024);
    let mut encoder = Encoder::new(&mut payload)?;
    encoder.write_node(node)?;
    Ok(payload)
}

/// Strips the flag byte from a decrypted frame, inflating the remainder if
/// the compression bit is set.
pub fn unpack(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    let (&flags, rest) = data.split_first().ok_or(BinaryError::EmptyData)?;
    if flags & 2 != 0 {
        let mut decoder = ZlibDecoder::new(rest);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| BinaryError::Zlib(e.to_string()))?;
        Ok(Cow::Owned(decompressed))
    } else {
        Ok(Cow::Borrowed(rest))
    }
}

/// Decodes a full frame (flag byte included) into a node, rejecting
/// trailing garbage.
pub fn unmarshal(data: &[u8]) -> Result<Node> {
    let payload = unpack(data)?;
    let mut decoder = Decoder::new(&payload);
    let node = decoder.read_node()?;
    if decoder.is_finished() {
        Ok(node)
    } else {
        Err(BinaryError::LeftoverData(decoder.bytes_left()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::binary::node::{Attrs, NodeContent};
    use crate::binary::token;

    fn assert_roundtrip(node: &Node) {
        let bytes = marshal(node).expect("marshal");
        let decoded = unmarshal(&bytes).expect("unmarshal");
        assert_eq!(&decoded, node);
    }

    #[test]
    fn test_roundtrip_empty_iq() {
        assert_roundtrip(&Node::new(
            "iq",
            attrs! {"to" => "s.whatsapp.net", "type" => "get", "id" => "abc"},
            None,
        ));
    }

    #[test]
    fn test_roundtrip_bytes_content() {
        assert_roundtrip(&Node::new(
            "device-identity",
            attrs! {"key-index" => "1"},
            Some(NodeContent::Bytes((0u8..200).collect())),
        ));
    }

    #[test]
    fn test_roundtrip_nested_children() {
        let prekey = Node::new(
            "key",
            Attrs::new(),
            Some(NodeContent::Bytes(vec![9u8; 32])),
        );
        assert_roundtrip(&Node::new(
            "iq",
            attrs! {"xmlns" => "encrypt", "type" => "set", "to" => "s.whatsapp.net"},
            Some(NodeContent::Nodes(vec![
                Node::new("registration", Attrs::new(), Some(NodeContent::Bytes(vec![0, 0, 1, 2]))),
                Node::new("list", Attrs::new(), Some(NodeContent::Nodes(vec![prekey]))),
            ])),
        ));
    }

    #[test]
    fn test_roundtrip_jid_attrs() {
        assert_roundtrip(&Node::new(
            "receipt",
            attrs! {
                "from" => "491234567890@s.whatsapp.net",
                "participant" => "491234567890:17@s.whatsapp.net",
                "to" => "123456-789@g.us",
            },
            None,
        ));
    }

    #[test]
    fn test_roundtrip_unknown_server_stays_string() {
        assert_roundtrip(&Node::new(
            "presence",
            attrs! {"from" => "someone@example.org"},
            None,
        ));
    }

    #[test]
    fn test_attribute_order_preserved() {
        let node = Node::new(
            "iq",
            attrs! {"zeta" => "1", "alpha" => "2", "mid" => "3"},
            None,
        );
        let decoded = unmarshal(&marshal(&node).unwrap()).unwrap();
        let keys: Vec<&String> = decoded.attrs.keys().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_rejects_undefined_tag_byte() {
        // 245 is not a defined tag byte in this dictionary version.
        let data = vec![0u8, token::LIST_8, 1, 245];
        assert!(matches!(
            unmarshal(&data),
            Err(BinaryError::InvalidToken(245))
        ));
    }

    #[test]
    fn test_rejects_leftover_data() {
        let mut bytes = marshal(&Node::new("presence", Attrs::new(), None)).unwrap();
        bytes.push(0x77);
        assert!(matches!(
            unmarshal(&bytes),
            Err(BinaryError::LeftoverData(1))
        ));
    }

    #[test]
    fn test_rejects_truncated_data() {
        let bytes = marshal(&Node::new(
            "iq",
            attrs! {"id" => "1234-ab"},
            None,
        ))
        .unwrap();
        assert!(unmarshal(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_unpack_zlib_flag() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let raw = marshal(&Node::new("presence", Attrs::new(), None)).unwrap();
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&raw[1..]).unwrap();
        let mut compressed = vec![2u8];
        compressed.extend_from_slice(&enc.finish().unwrap());

        let node = unmarshal(&compressed).unwrap();
        assert_eq!(node.tag, "presence");
    }
}
