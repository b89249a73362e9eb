use crate::binary::error::{BinaryError, Result};
use crate::binary::jid::{self, Jid};
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::binary::token;

pub(crate) struct Decoder<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.position >= self.data.len()
    }

    pub(crate) fn bytes_left(&self) -> usize {
        self.data.len() - self.position
    }

    fn check_eos(&self, len: usize) -> Result<()> {
        if self.bytes_left() >= len {
            Ok(())
        } else {
            Err(BinaryError::UnexpectedEof)
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.check_eos(1)?;
        let value = self.data[self.position];
        self.position += 1;
        Ok(value)
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        self.check_eos(2)?;
        let value = u16::from_be_bytes([self.data[self.position], self.data[self.position + 1]]);
        self.position += 2;
        Ok(value)
    }

    fn read_u20_be(&mut self) -> Result<u32> {
        self.check_eos(3)?;
        let bytes = &self.data[self.position..self.position + 3];
        self.position += 3;
        Ok(((bytes[0] as u32 & 0x0F) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32))
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        self.check_eos(4)?;
        let value = u32::from_be_bytes(
            self.data[self.position..self.position + 4]
                .try_into()
                .unwrap(),
        );
        self.position += 4;
        Ok(value)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.check_eos(len)?;
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| BinaryError::InvalidUtf8)
    }

    fn read_list_size(&mut self, tag: u8) -> Result<usize> {
        match tag {
            token::LIST_EMPTY => Ok(0),
            token::LIST_8 => Ok(self.read_u8()? as usize),
            token::LIST_16 => Ok(self.read_u16_be()? as usize),
            _ => Err(BinaryError::InvalidToken(tag)),
        }
    }

    fn read_jid_pair(&mut self) -> Result<Jid> {
        let user = self.read_value_as_string()?.unwrap_or_default();
        let server = self
            .read_value_as_string()?
            .ok_or(BinaryError::InvalidNode)?;
        Ok(Jid::new(&user, &server))
    }

    fn read_ad_jid(&mut self) -> Result<Jid> {
        let domain_type = self.read_u8()?;
        let device = self.read_u8()? as u16;
        let user = self
            .read_value_as_string()?
            .ok_or(BinaryError::InvalidNode)?;

        let (server, agent) = match domain_type {
            0 => (jid::DEFAULT_USER_SERVER, 0),
            1 => (jid::HIDDEN_USER_SERVER, 0),
            other => (jid::DEFAULT_USER_SERVER, other),
        };

        Ok(Jid {
            user,
            server: server.to_string(),
            agent,
            device,
        })
    }

    fn read_value_as_string(&mut self) -> Result<Option<String>> {
        let tag = self.read_u8()?;
        match tag {
            token::LIST_EMPTY => Ok(None),
            token::BINARY_8 => {
                let size = self.read_u8()? as usize;
                self.read_string(size).map(Some)
            }
            token::BINARY_20 => {
                let size = self.read_u20_be()? as usize;
                self.read_string(size).map(Some)
            }
            token::BINARY_32 => {
                let size = self.read_u32_be()? as usize;
                self.read_string(size).map(Some)
            }
            token::JID_PAIR => self.read_jid_pair().map(|j| Some(j.to_string())),
            token::AD_JID => self.read_ad_jid().map(|j| Some(j.to_string())),
            token::NIBBLE_8 | token::HEX_8 => self.read_packed(tag).map(Some),
            token::DICTIONARY_0..=token::DICTIONARY_3 => {
                let index = self.read_u8()?;
                token::get_double_token(tag - token::DICTIONARY_0, index)
                    .map(|s| Some(s.to_string()))
                    .ok_or(BinaryError::InvalidToken(index))
            }
            _ => token::get_single_token(tag)
                .map(|s| Some(s.to_string()))
                .ok_or(BinaryError::InvalidToken(tag)),
        }
    }

    fn read_packed(&mut self, tag: u8) -> Result<String> {
        let len_byte = self.read_u8()?;
        let is_odd = (len_byte & 0x80) != 0;
        let byte_len = (len_byte & 0x7F) as usize;

        let packed = self.read_bytes(byte_len)?;
        let mut result = String::with_capacity(byte_len * 2);
        for &byte in packed {
            result.push(Self::unpack_nibble(tag, (byte & 0xF0) >> 4)?);
            result.push(Self::unpack_nibble(tag, byte & 0x0F)?);
        }
        if is_odd {
            result.pop();
        }
        Ok(result)
    }

    fn unpack_nibble(tag: u8, value: u8) -> Result<char> {
        match tag {
            token::NIBBLE_8 => match value {
                0..=9 => Ok((b'0' + value) as char),
                10 => Ok('-'),
                11 => Ok('.'),
                15 => Ok('\x00'),
                _ => Err(BinaryError::InvalidPackedChar(value)),
            },
            token::HEX_8 => match value {
                0..=9 => Ok((b'0' + value) as char),
                10..=15 => Ok((b'A' + value - 10) as char),
                _ => Err(BinaryError::InvalidPackedChar(value)),
            },
            _ => Err(BinaryError::InvalidToken(tag)),
        }
    }

    fn read_attributes(&mut self, count: usize) -> Result<Attrs> {
        let mut attrs = Attrs::with_capacity(count);
        for _ in 0..count {
            let key = self
                .read_value_as_string()?
                .ok_or(BinaryError::NonStringKey)?;
            let value = self.read_value_as_string()?.unwrap_or_default();
            attrs.insert(key, value);
        }
        Ok(attrs)
    }

    fn read_content(&mut self) -> Result<Option<NodeContent>> {
        let tag = self.read_u8()?;
        match tag {
            token::LIST_EMPTY => Ok(None),
            token::BINARY_8 => {
                let len = self.read_u8()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::BINARY_20 => {
                let len = self.read_u20_be()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::BINARY_32 => {
                let len = self.read_u32_be()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::LIST_8 | token::LIST_16 => {
                let size = self.read_list_size(tag)?;
                let mut nodes = Vec::with_capacity(size);
                for _ in 0..size {
                    nodes.push(self.read_node()?);
                }
                Ok(Some(NodeContent::Nodes(nodes)))
            }
            other => {
                // A string-valued content byte: token, packed or JID form.
                self.position -= 1;
                match self.read_value_as_string()? {
                    Some(s) => Ok(Some(NodeContent::String(s))),
                    None => Err(BinaryError::InvalidToken(other)),
                }
            }
        }
    }

    pub(crate) fn read_node(&mut self) -> Result<Node> {
        let tag = self.read_u8()?;
        let list_size = self.read_list_size(tag)?;
        if list_size == 0 {
            return Err(BinaryError::InvalidNode);
        }

        let description = self
            .read_value_as_string()?
            .ok_or(BinaryError::InvalidNode)?;

        let attr_count = (list_size - 1) / 2;
        let has_content = list_size % 2 == 0;

        let attrs = self.read_attributes(attr_count)?;
        let content = if has_content {
            self.read_content()?
        } else {
            None
        };

        Ok(Node {
            tag: description,
            attrs,
            content,
        })
    }
}
