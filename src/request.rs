use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use thiserror::Error;
use tokio::time::timeout;

use crate::binary::node::{Attrs, Node, NodeContent};
use crate::binary::jid::Jid;
use crate::client::{Client, ClientError};

/// Default reply deadline for correlated requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The type of an IQ stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQueryType {
    Set,
    Get,
}

impl InfoQueryType {
    fn as_str(&self) -> &'static str {
        match self {
            InfoQueryType::Set => "set",
            InfoQueryType::Get => "get",
        }
    }
}

/// An IQ request awaiting a correlated reply.
#[derive(Debug, Clone)]
pub struct InfoQuery<'a> {
    pub namespace: &'a str,
    pub query_type: InfoQueryType,
    pub to: Jid,
    pub id: Option<String>,
    pub content: Option<NodeContent>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum IqError {
    #[error("IQ request timed out")]
    Timeout,
    #[error("Client is not connected")]
    NotConnected,
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("Session ended while waiting for reply: {0:?}")]
    Disconnected(Node),
    #[error("Server returned an error response: code={code}, text={text:?}")]
    ServerError { code: u16, text: String },
    #[error("Internal channel closed unexpectedly")]
    InternalChannelClosed,
}

impl Client {
    /// Generates a unique request id: the connection epoch in lowercase
    /// hex plus a process-wide counter.
    pub fn generate_request_id(&self) -> String {
        let count = self
            .id_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("{seconds:x}.{}-{count}", self.unique_id)
    }

    /// Sends an IQ stanza and waits for the correlated reply.
    pub async fn send_iq(&self, query: InfoQuery<'_>) -> Result<Node, IqError> {
        let req_id = query
            .id
            .clone()
            .unwrap_or_else(|| self.generate_request_id());

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.response_waiters
            .lock()
            .await
            .insert(req_id.clone(), tx);

        let mut attrs = Attrs::new();
        attrs.insert("id".into(), req_id.clone());
        attrs.insert("xmlns".into(), query.namespace.into());
        attrs.insert("type".into(), query.query_type.as_str().into());
        attrs.insert("to".into(), query.to.to_string());

        let node = Node {
            tag: "iq".into(),
            attrs,
            content: query.content,
        };

        if let Err(e) = self.send_node(&node).await {
            self.response_waiters.lock().await.remove(&req_id);
            return Err(IqError::Client(e));
        }

        match timeout(query.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT), rx).await {
            Ok(Ok(response)) => {
                if response.tag == "stream:error" || response.tag == "xmlstreamend" {
                    return Err(IqError::Disconnected(response));
                }
                if response.attrs.get("type").map(String::as_str) == Some("error") {
                    return Err(parse_error_response(&response));
                }
                Ok(response)
            }
            Ok(Err(_)) => Err(IqError::InternalChannelClosed),
            Err(_) => {
                // Deadline passed; drop the slot so a late reply is ignored.
                self.response_waiters.lock().await.remove(&req_id);
                Err(IqError::Timeout)
            }
        }
    }

    /// Routes an inbound node to the request waiting on its id. Returns
    /// whether a pending slot consumed it.
    pub async fn handle_iq_response(&self, node: Node) -> bool {
        let id = match node.attrs.get("id") {
            Some(id) => id.clone(),
            None => return false,
        };
        match self.response_waiters.lock().await.remove(&id) {
            Some(waiter) => {
                if waiter.send(node).is_err() {
                    debug!(target: "Client/IQ", "Dropping late reply for {id}: requester gone");
                }
                true
            }
            None => false,
        }
    }
}

pub(crate) fn parse_error_response(response: &Node) -> IqError {
    match response.get_optional_child("error") {
        Some(error_node) => {
            let mut parser = error_node.attrs();
            let code = parser.optional_u64("code").unwrap_or(0) as u16;
            let text = parser.optional_string("text").unwrap_or("").to_string();
            if !parser.ok() {
                warn!(target: "Client/IQ", "Attribute errors in IQ error response: {:?}", parser.errors);
            }
            IqError::ServerError { code, text }
        }
        None => IqError::ServerError {
            code: 0,
            text: "malformed error response".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::store::Device;

    #[tokio::test]
    async fn test_request_ids_are_unique_and_hex_stamped() {
        let client = Client::new(Device::new());
        let a = client.generate_request_id();
        let b = client.generate_request_id();
        assert_ne!(a, b);
        let stamp = a.split('.').next().unwrap();
        assert!(u64::from_str_radix(stamp, 16).is_ok(), "timestamp is hex: {a}");
    }

    #[tokio::test]
    async fn test_send_iq_without_connection_clears_slot() {
        let client = Client::new(Device::new());
        let result = client
            .send_iq(InfoQuery {
                namespace: "w:p",
                query_type: InfoQueryType::Get,
                to: crate::binary::jid::SERVER_JID.parse().unwrap(),
                id: Some("req-1".into()),
                content: None,
                timeout: Some(Duration::from_millis(50)),
            })
            .await;
        assert!(matches!(
            result,
            Err(IqError::Client(ClientError::NotConnected))
        ));
        // The failed send must not leave a dangling waiter behind.
        assert!(client.response_waiters.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_uncorrelated_reply_is_not_consumed() {
        let client = Client::new(Device::new());
        let node = Node::new("iq", attrs! {"id" => "nobody-waits"}, None);
        assert!(!client.handle_iq_response(node).await);

        let anonymous = Node::new("iq", Attrs::new(), None);
        assert!(!client.handle_iq_response(anonymous).await);
    }

    #[test]
    fn test_error_response_parsing() {
        let response = Node::new(
            "iq",
            attrs! {"type" => "error", "id" => "x"},
            Some(NodeContent::Nodes(vec![Node::new(
                "error",
                attrs! {"code" => "405", "text" => "not-allowed"},
                None,
            )])),
        );
        match parse_error_response(&response) {
            IqError::ServerError { code, text } => {
                assert_eq!(code, 405);
                assert_eq!(text, "not-allowed");
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
    }
}
