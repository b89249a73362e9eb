use crate::binary::jid::{Jid, SERVER_JID};
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType, IqError};

/// Builds a `usync` interactive query over the given protocol nodes: a
/// `query` child describing the requested data and a `list` child with one
/// `user` entry per JID.
pub fn build_usync_query(sid: &str, query_children: Vec<Node>, users: Vec<Jid>) -> Node {
    let query = Node {
        tag: "query".to_string(),
        attrs: Attrs::new(),
        content: Some(NodeContent::Nodes(query_children)),
    };

    let user_nodes = users
        .into_iter()
        .map(|jid| {
            let mut attrs = Attrs::new();
            attrs.insert("jid".into(), jid.to_string());
            Node {
                tag: "user".to_string(),
                attrs,
                content: None,
            }
        })
        .collect();
    let list = Node {
        tag: "list".to_string(),
        attrs: Attrs::new(),
        content: Some(NodeContent::Nodes(user_nodes)),
    };

    let mut attrs = Attrs::new();
    attrs.insert("sid".into(), sid.to_string());
    attrs.insert("mode".into(), "query".into());
    attrs.insert("last".into(), "true".into());
    attrs.insert("index".into(), "0".into());
    attrs.insert("context".into(), "interactive".into());

    Node {
        tag: "usync".to_string(),
        attrs,
        content: Some(NodeContent::Nodes(vec![query, list])),
    }
}

/// Pulls the `user` result nodes out of a usync reply.
pub fn parse_usync_result(response: &Node) -> Vec<&Node> {
    response
        .get_optional_child_by_tag(&["usync", "list"])
        .map(|list| list.get_children_by_tag("user"))
        .unwrap_or_default()
}

impl Client {
    /// Runs a usync query and returns the per-user result nodes. The
    /// shape of `query_children` (and of the per-user answers) is owned
    /// by the caller; the core only moves the envelope.
    pub async fn send_usync_query(
        &self,
        query_children: Vec<Node>,
        users: Vec<Jid>,
    ) -> Result<Vec<Node>, IqError> {
        let sid = self.generate_request_id();
        let usync = build_usync_query(&sid, query_children, users);

        let response = self
            .send_iq(InfoQuery {
                namespace: "usync",
                query_type: InfoQueryType::Get,
                to: SERVER_JID.parse().unwrap(),
                id: None,
                content: Some(NodeContent::Nodes(vec![usync])),
                timeout: None,
            })
            .await?;

        Ok(parse_usync_result(&response)
            .into_iter()
            .cloned()
            .collect())
    }
}
