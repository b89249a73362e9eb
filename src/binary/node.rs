use crate::binary::attrs::AttrParser;
use indexmap::IndexMap;

/// Attribute map of a node. Insertion order is significant: the codec
/// writes attributes in iteration order and the decoder rebuilds the map
/// in wire order, so a round-trip preserves it.
pub type Attrs = IndexMap<String, String>;

/// Content of a node: raw bytes, or a list of child nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Bytes(Vec<u8>),
    String(String),
    Nodes(Vec<Node>),
}

/// A single unit of the wire protocol: a tag, an ordered attribute map and
/// optional content.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: Option<NodeContent>,
}

impl Node {
    pub fn new(tag: &str, attrs: Attrs, content: Option<NodeContent>) -> Self {
        Self {
            tag: tag.to_string(),
            attrs,
            content,
        }
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.content {
            Some(NodeContent::Nodes(nodes)) => Some(nodes),
            _ => None,
        }
    }

    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Some(NodeContent::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn attrs(&self) -> AttrParser<'_> {
        AttrParser::new(self)
    }

    /// Walks a path of child tags, returning the node at the end of it.
    pub fn get_optional_child_by_tag<'a>(&'a self, tags: &[&str]) -> Option<&'a Node> {
        let mut current = self;
        for &tag in tags {
            current = current.children()?.iter().find(|c| c.tag == tag)?;
        }
        Some(current)
    }

    pub fn get_optional_child(&self, tag: &str) -> Option<&Node> {
        self.children()
            .and_then(|nodes| nodes.iter().find(|node| node.tag == tag))
    }

    pub fn get_children_by_tag(&self, tag: &str) -> Vec<&Node> {
        self.children()
            .map(|children| children.iter().filter(|c| c.tag == tag).collect())
            .unwrap_or_default()
    }
}

/// Builds an attribute map from key/value pairs without the IndexMap
/// boilerplate at call sites.
#[macro_export]
macro_rules! attrs {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = $crate::binary::node::Attrs::new();
        $(map.insert($key.to_string(), $value.to_string());)*
        map
    }};
}
