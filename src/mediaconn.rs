use std::time::{Duration, Instant};

use crate::binary::jid::SERVER_JID;
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType, IqError};

/// A media host returned by the `w:m` query.
#[derive(Debug, Clone)]
pub struct MediaConnHost {
    pub hostname: String,
}

/// Upload/download authorization handed out by the server, valid for
/// `ttl` seconds.
#[derive(Debug, Clone)]
pub struct MediaConn {
    pub auth: String,
    pub ttl: u64,
    pub hosts: Vec<MediaConnHost>,
    pub fetched_at: Instant,
}

impl MediaConn {
    pub fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > Duration::from_secs(self.ttl)
    }
}

/// Extracts the media connection data from the `iq/result` node.
pub fn parse_media_conn(response: &Node) -> Result<MediaConn, IqError> {
    let conn_node = response
        .get_optional_child("media_conn")
        .ok_or(IqError::ServerError {
            code: 0,
            text: "missing media_conn in response".to_string(),
        })?;

    let mut parser = conn_node.attrs();
    let auth = parser.string("auth");
    let ttl = parser.optional_u64("ttl").unwrap_or(0);

    let hosts = conn_node
        .get_children_by_tag("host")
        .into_iter()
        .filter_map(|h| h.attrs().optional_string("hostname").map(str::to_string))
        .map(|hostname| MediaConnHost { hostname })
        .collect();

    Ok(MediaConn {
        auth,
        ttl,
        hosts,
        fetched_at: Instant::now(),
    })
}

impl Client {
    /// Returns cached media connection data, refreshing it over the wire
    /// when missing, expired or forced.
    pub(crate) async fn refresh_media_conn(&self, force: bool) -> Result<MediaConn, IqError> {
        if !force {
            if let Some(conn) = self.media_conn.lock().await.as_ref() {
                if !conn.is_expired() {
                    return Ok(conn.clone());
                }
            }
        }

        let response = self
            .send_iq(InfoQuery {
                namespace: "w:m",
                query_type: InfoQueryType::Set,
                to: SERVER_JID.parse().unwrap(),
                id: None,
                content: Some(NodeContent::Nodes(vec![Node {
                    tag: "media_conn".to_string(),
                    attrs: Attrs::new(),
                    content: None,
                }])),
                timeout: None,
            })
            .await?;

        let conn = parse_media_conn(&response)?;
        *self.media_conn.lock().await = Some(conn.clone());
        Ok(conn)
    }
}
