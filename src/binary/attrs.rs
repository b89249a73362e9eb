use crate::binary::error::{BinaryError, Result};
use crate::binary::jid::Jid;
use crate::binary::node::Node;

/// Accumulating attribute reader.
///
/// Lookups record failures instead of returning them one by one, so a
/// handler can read every attribute it needs and then check [`ok`] or
/// [`finish`] once.
///
/// [`ok`]: AttrParser::ok
/// [`finish`]: AttrParser::finish
pub struct AttrParser<'a> {
    node: &'a Node,
    pub errors: Vec<BinaryError>,
}

impl<'a> AttrParser<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self {
            node,
            errors: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&self) -> Result<()> {
        match self.errors.first() {
            None => Ok(()),
            Some(first) => Err(first.clone()),
        }
    }

    fn get_raw(&mut self, key: &str, require: bool) -> Option<&'a str> {
        let val = self.node.attrs.get(key).map(String::as_str);
        if require && val.is_none() {
            self.errors.push(BinaryError::MissingAttr(key.to_string()));
        }
        val
    }

    pub fn optional_string(&mut self, key: &str) -> Option<&'a str> {
        self.get_raw(key, false)
    }

    pub fn string(&mut self, key: &str) -> String {
        self.get_raw(key, true).unwrap_or_default().to_string()
    }

    pub fn optional_jid(&mut self, key: &str) -> Option<Jid> {
        let raw = self.get_raw(key, false)?;
        match raw.parse::<Jid>() {
            Ok(jid) => Some(jid),
            Err(e) => {
                self.errors.push(BinaryError::Jid(e));
                None
            }
        }
    }

    pub fn jid(&mut self, key: &str) -> Jid {
        self.get_raw(key, true);
        self.optional_jid(key).unwrap_or_default()
    }

    pub fn optional_u64(&mut self, key: &str) -> Option<u64> {
        let raw = self.get_raw(key, false)?;
        match raw.parse::<u64>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "Failed to parse u64 from {raw:?} for key {key:?}: {e}"
                )));
                None
            }
        }
    }

    pub fn u64(&mut self, key: &str) -> u64 {
        self.get_raw(key, true);
        self.optional_u64(key).unwrap_or_default()
    }

    pub fn optional_bool(&mut self, key: &str) -> bool {
        matches!(self.get_raw(key, false), Some("true") | Some("1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::binary::node::Attrs;

    #[test]
    fn test_required_attrs() {
        let node = Node::new("iq", attrs! {"id" => "abc", "code" => "515"}, None);
        let mut parser = node.attrs();
        assert_eq!(parser.string("id"), "abc");
        assert_eq!(parser.u64("code"), 515);
        assert!(parser.ok());

        assert_eq!(parser.string("missing"), "");
        assert!(!parser.ok());
        assert!(parser.finish().is_err());
    }

    #[test]
    fn test_jid_attr() {
        let node = Node::new("iq", attrs! {"from" => "123@s.whatsapp.net"}, None);
        let mut parser = node.attrs();
        assert_eq!(parser.jid("from").user, "123");
        assert!(parser.ok());
    }

    #[test]
    fn test_bad_number_records_error() {
        let node = Node::new("failure", attrs! {"reason" => "not-a-number"}, None);
        let mut parser = node.attrs();
        assert_eq!(parser.optional_u64("reason"), None);
        assert!(!parser.ok());
    }

    #[test]
    fn test_missing_optional_is_silent() {
        let node = Node::new("presence", Attrs::new(), None);
        let mut parser = node.attrs();
        assert_eq!(parser.optional_string("type"), None);
        assert!(parser.ok());
    }
}
