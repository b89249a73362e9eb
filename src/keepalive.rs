use std::time::Duration;

use log::{debug, info, warn};

use crate::binary::jid::SERVER_JID;
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType, IqError};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);
const KEEP_ALIVE_RESPONSE_DEADLINE: Duration = Duration::from_secs(20);
/// Missed pongs tolerated before the connection is torn down.
const KEEP_ALIVE_MAX_FAILURES: u32 = 3;

impl Client {
    /// Sends a single `w:p` ping and waits for the pong.
    async fn send_keepalive(&self) -> bool {
        debug!(target: "Client/Keepalive", "Sending keepalive ping");
        let iq = InfoQuery {
            namespace: "w:p",
            query_type: InfoQueryType::Get,
            to: SERVER_JID.parse().unwrap(),
            id: None,
            content: Some(NodeContent::Nodes(vec![Node {
                tag: "ping".to_string(),
                attrs: Attrs::new(),
                content: None,
            }])),
            timeout: Some(KEEP_ALIVE_RESPONSE_DEADLINE),
        };

        match self.send_iq(iq).await {
            Ok(_) => {
                debug!(target: "Client/Keepalive", "Received keepalive pong");
                true
            }
            Err(e) => {
                warn!(target: "Client/Keepalive", "Keepalive ping failed: {e}");
                // A dead transport fails fast; treat only protocol-level
                // replies as success.
                !matches!(
                    e,
                    IqError::Timeout | IqError::Client(_) | IqError::Disconnected(_)
                )
            }
        }
    }

    /// Ping scheduler started after login. Exits on shutdown or when the
    /// failure window is exhausted, forcing a disconnect so the reconnect
    /// logic takes over.
    pub(crate) async fn keepalive_loop(&self) {
        let mut failures = 0u32;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(KEEP_ALIVE_INTERVAL) => {
                    if !self.is_connected().await {
                        debug!(target: "Client/Keepalive", "Not connected, stopping keepalive");
                        return;
                    }
                    if self.send_keepalive().await {
                        if failures > 0 {
                            info!(target: "Client/Keepalive", "Keepalive restored");
                        }
                        failures = 0;
                    } else {
                        failures += 1;
                        warn!(target: "Client/Keepalive", "Keepalive failure {failures}/{KEEP_ALIVE_MAX_FAILURES}");
                        if failures >= KEEP_ALIVE_MAX_FAILURES {
                            warn!(target: "Client/Keepalive", "Keepalive window exhausted, dropping connection");
                            self.disconnect().await;
                            return;
                        }
                    }
                },
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client/Keepalive", "Shutdown signaled, stopping keepalive");
                    return;
                }
            }
        }
    }
}
