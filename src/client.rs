use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use rand::RngCore;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tokio::time::{sleep, Duration};

use crate::binary::node::Node;
use crate::binary::{self, NodeContent};
use crate::handshake;
use crate::pair::PairingState;
use crate::socket::{CounterGapDetector, FrameSocket, NoiseSocket, SocketError};
use crate::store::Device;
use crate::types::events::{Event, EventHandler};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("handshake error: {0}")]
    Handshake(#[from] handshake::HandshakeError),
    #[error("encoding error: {0}")]
    Binary(#[from] binary::BinaryError),
}

/// The session core. Owns exactly one WebSocket, the handshake lifecycle,
/// the login flag and the request correlator; everything else in the crate
/// hangs off this type.
pub struct Client {
    pub store: Mutex<Device>,

    pub(crate) is_logged_in: AtomicBool,
    is_connecting: AtomicBool,
    pub(crate) shutdown_notifier: Notify,

    frame_socket: Mutex<Option<Arc<FrameSocket>>>,
    pub(crate) noise_socket: Mutex<Option<Arc<NoiseSocket>>>,
    gap_detector: Mutex<CounterGapDetector>,

    pub(crate) response_waiters: Mutex<HashMap<String, oneshot::Sender<Node>>>,
    pub(crate) unique_id: String,
    pub(crate) id_counter: AtomicU64,
    event_handlers: RwLock<Vec<EventHandler>>,

    pub(crate) pairing_state: Mutex<PairingState>,
    pub(crate) media_conn: Mutex<Option<crate::mediaconn::MediaConn>>,

    expected_disconnect: Arc<AtomicBool>,
    pub enable_auto_reconnect: AtomicBool,
    auto_reconnect_errors: AtomicU32,
    /// Bumped on every successful connect; stale read loops check it so a
    /// leftover task from a previous connection cannot touch fresh state.
    generation: AtomicU64,
}

impl Client {
    pub fn new(store: Device) -> Arc<Self> {
        let mut unique_id_bytes = [0u8; 2];
        rand::thread_rng().fill_bytes(&mut unique_id_bytes);

        Arc::new(Self {
            store: Mutex::new(store),
            is_logged_in: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            shutdown_notifier: Notify::new(),
            frame_socket: Mutex::new(None),
            noise_socket: Mutex::new(None),
            gap_detector: Mutex::new(CounterGapDetector::new()),
            response_waiters: Mutex::new(HashMap::new()),
            unique_id: format!("{}.{}", unique_id_bytes[0], unique_id_bytes[1]),
            id_counter: AtomicU64::new(0),
            event_handlers: RwLock::new(Vec::new()),
            pairing_state: Mutex::new(PairingState::UnpairedIdle),
            media_conn: Mutex::new(None),
            expected_disconnect: Arc::new(AtomicBool::new(false)),
            enable_auto_reconnect: AtomicBool::new(true),
            auto_reconnect_errors: AtomicU32::new(0),
            generation: AtomicU64::new(0),
        })
    }

    pub async fn add_event_handler(&self, handler: EventHandler) {
        self.event_handlers.write().await.push(handler);
    }

    pub async fn dispatch_event(&self, event: Event) {
        for handler in self.event_handlers.read().await.iter() {
            handler(&event);
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.is_logged_in.load(Ordering::Relaxed)
    }

    pub async fn is_connected(&self) -> bool {
        self.noise_socket.lock().await.is_some()
    }

    /// Opens the WebSocket, runs the Noise handshake and spawns the frame
    /// processing loop. Returns once the transport is authenticated.
    ///
    /// Boxed because this method recurses indirectly through the spawned
    /// read loop (read loop -> reconnect -> connect); without boxing the
    /// resulting future type would be infinitely recursive.
    pub fn connect(
        self: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ClientError>> + Send + '_>>
    {
        Box::pin(async move {
            if self.is_connecting.swap(true, Ordering::SeqCst) {
                return Err(ClientError::AlreadyConnected);
            }
            let _guard = scopeguard::guard((), |_| {
                self.is_connecting.store(false, Ordering::Relaxed);
            });
            if self.is_connected().await {
                return Err(ClientError::AlreadyConnected);
            }

            let (frame_socket, mut frames_rx) = FrameSocket::new();

            // The frames channel stays open for as long as the socket handle
            // lives, so transport death is signalled out of band. A graceful
            // close (local, or the server's in-band length signal) must not
            // look like a transport failure to the read loop.
            let close_notify = Arc::new(Notify::new());
            let expected_disconnect = self.expected_disconnect.clone();
            let transport_closed = close_notify.clone();
            frame_socket
                .set_on_disconnect(Box::new(move |unexpected| {
                    if !unexpected {
                        expected_disconnect.store(true, Ordering::Relaxed);
                    }
                    transport_closed.notify_one();
                }))
                .await;

            frame_socket.connect().await?;

            let noise_socket = {
                let store = self.store.lock().await;
                if !store.is_paired() {
                    *self.pairing_state.lock().await = PairingState::AwaitingPairDevice;
                }
                handshake::do_handshake(&store, &frame_socket, &mut frames_rx).await?
            };

            // Invalidate any leftover read loop before the fresh session state
            // becomes visible to it.
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

            *self.frame_socket.lock().await = Some(Arc::new(frame_socket));
            *self.noise_socket.lock().await = Some(Arc::new(noise_socket));
            *self.gap_detector.lock().await = CounterGapDetector::new();
            self.expected_disconnect.store(false, Ordering::Relaxed);

            let client = self.clone();
            tokio::task::spawn(async move {
                client.read_loop(frames_rx, close_notify, generation).await;
            });

            Ok(())
        })
    }

    /// Tears down the session for good: pending requests fail, the socket
    /// closes, no reconnection is attempted. Persisted keys are untouched.
    pub async fn disconnect(&self) {
        info!("Disconnecting client intentionally");
        self.expected_disconnect.store(true, Ordering::Relaxed);
        self.shutdown_notifier.notify_waiters();
        if let Some(fs) = self.frame_socket.lock().await.as_ref() {
            fs.close().await;
        }
        self.cleanup_connection_state().await;
    }

    /// Drops the session state but keeps persisted key material, then
    /// dials again. Fresh handshake, fresh counters.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), ClientError> {
        info!("Reconnecting");
        self.expected_disconnect.store(true, Ordering::Relaxed);
        if let Some(fs) = self.frame_socket.lock().await.as_ref() {
            fs.close().await;
        }
        self.cleanup_connection_state().await;
        self.connect().await
    }

    async fn cleanup_connection_state(&self) {
        self.is_logged_in.store(false, Ordering::Relaxed);
        *self.frame_socket.lock().await = None;
        *self.noise_socket.lock().await = None;
        self.fail_all_pending().await;
    }

    /// Fails every pending request slot with a disconnect marker node.
    async fn fail_all_pending(&self) {
        let mut waiters = self.response_waiters.lock().await;
        for (_, waiter) in waiters.drain() {
            let _ = waiter.send(Node::new("xmlstreamend", Default::default(), None));
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut frames_rx: tokio::sync::mpsc::Receiver<bytes::Bytes>,
        close_notify: Arc<Notify>,
        generation: u64,
    ) {
        info!(target: "Client", "Starting frame processing loop");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client", "Shutdown signaled, exiting frame loop");
                    return;
                },
                _ = close_notify.notified() => {
                    if self.generation.load(Ordering::SeqCst) == generation {
                        self.on_transport_closed().await;
                    }
                    return;
                },
                frame = frames_rx.recv() => {
                    if self.generation.load(Ordering::SeqCst) != generation {
                        // A reconnect replaced this connection; this loop
                        // must not touch the fresh session state.
                        return;
                    }
                    match frame {
                        Some(encrypted_frame) => self.process_encrypted_frame(&encrypted_frame).await,
                        None => {
                            self.on_transport_closed().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn on_transport_closed(self: &Arc<Self>) {
        let expected = self.expected_disconnect.load(Ordering::Relaxed);
        self.cleanup_connection_state().await;
        if expected {
            debug!(target: "Client", "Socket closed as expected");
        } else {
            warn!(target: "Client", "Socket closed unexpectedly");
            self.dispatch_event(Event::Disconnected {
                cause: "transport closed".to_string(),
            })
            .await;
            self.schedule_auto_reconnect();
        }
    }

    fn schedule_auto_reconnect(self: &Arc<Self>) {
        if !self.enable_auto_reconnect.load(Ordering::Relaxed) {
            return;
        }
        let client = self.clone();
        tokio::task::spawn(async move {
            loop {
                let errors = client.auto_reconnect_errors.fetch_add(1, Ordering::SeqCst);
                let delay = Duration::from_secs(u64::from(errors * 2).min(30));
                info!("Reconnecting in {delay:?} (attempt {})", errors + 1);
                sleep(delay).await;
                match client.connect().await {
                    Ok(()) => {
                        client.auto_reconnect_errors.store(0, Ordering::SeqCst);
                        return;
                    }
                    Err(e) => {
                        error!("Auto-reconnect failed: {e}");
                        if !client.enable_auto_reconnect.load(Ordering::Relaxed) {
                            return;
                        }
                    }
                }
            }
        });
    }

    async fn process_encrypted_frame(self: &Arc<Self>, frame: &[u8]) {
        let noise_socket = match self.noise_socket.lock().await.clone() {
            Some(s) => s,
            None => {
                error!(target: "Client", "Received frame without transport cipher");
                return;
            }
        };

        let (plaintext, counter) = match noise_socket.decrypt_frame(frame) {
            Ok(result) => result,
            Err(e) => {
                error!(target: "Client", "Failed to decrypt frame: {e}");
                return;
            }
        };
        if let Some(skipped) = self.gap_detector.lock().await.observe(counter) {
            warn!(target: "Client", "Skipped {skipped} read-counter values before frame {counter}");
        }

        let node = match binary::unmarshal(&plaintext) {
            Ok(node) => node,
            Err(e) => {
                warn!(target: "Client/Recv", "Failed to unmarshal node: {e}");
                return;
            }
        };
        debug!(target: "Client/Recv", "<-- {}", node.tag);
        self.process_node(node).await;
    }

    /// Dispatch on the root tag of every decrypted inbound node.
    async fn process_node(self: &Arc<Self>, node: Node) {
        match node.tag.as_str() {
            "iq" => self.handle_iq(node).await,
            "success" => self.handle_success().await,
            "failure" => self.handle_failure(node).await,
            "stream:error" => self.handle_stream_error(node).await,
            "xmlstreamend" => {
                info!(target: "Client", "Stream ended by server");
                self.disconnect().await;
            }
            _ => {
                if !self.handle_iq_response(node).await {
                    debug!(target: "Client", "Unhandled node");
                }
            }
        }
    }

    async fn handle_iq(self: &Arc<Self>, node: Node) {
        if node.get_optional_child("pair-device").is_some() {
            self.handle_pair_device(node).await;
            return;
        }
        if node.get_optional_child("pair-success").is_some() {
            self.handle_pair_success(node).await;
            return;
        }
        if !self.handle_iq_response(node).await {
            debug!(target: "Client", "IQ without matching pending request");
        }
    }

    async fn handle_success(self: &Arc<Self>) {
        info!(target: "Client", "Login acknowledged by server");
        self.is_logged_in.store(true, Ordering::Relaxed);
        self.auto_reconnect_errors.store(0, Ordering::SeqCst);

        // The post-login requests await replies that arrive through this
        // very read loop, so the pipeline runs on its own task. Order
        // matters: pre-keys, then activation, and only then the LoggedIn
        // event. The keepalive loop never finishes, so it alone is
        // detached.
        let client = self.clone();
        tokio::task::spawn(async move {
            let needs_prekeys = !client.store.lock().await.prekeys_sent;
            if needs_prekeys {
                if let Err(e) = client.upload_prekeys().await {
                    warn!(target: "Client", "Pre-key upload failed: {e}");
                } else {
                    client.store.lock().await.prekeys_sent = true;
                }
            }

            if let Err(e) = client.send_passive_active().await {
                warn!(target: "Client", "Failed to activate connection: {e}");
            }

            let keepalive = client.clone();
            tokio::task::spawn(async move {
                keepalive.keepalive_loop().await;
            });

            client.dispatch_event(Event::LoggedIn).await;
        });
    }

    async fn handle_failure(self: &Arc<Self>, node: Node) {
        let mut parser = node.attrs();
        let reason = parser.optional_u64("reason").unwrap_or(0);
        let location = parser.optional_string("location").unwrap_or("").to_string();

        if reason == 401 {
            // The only failure the protocol recovers from locally.
            warn!(target: "Client", "Login failure 401 at {location:?}, reconnecting");
            if let Err(e) = self.reconnect().await {
                error!(target: "Client", "Reconnect after 401 failed: {e}");
            }
            return;
        }

        error!(target: "Client", "Fatal login failure: reason={reason} location={location:?}");
        self.dispatch_event(Event::Disconnected {
            cause: format!("login failure {reason}"),
        })
        .await;
        self.disconnect().await;
    }

    async fn handle_stream_error(self: &Arc<Self>, node: Node) {
        let code = node
            .attrs()
            .optional_string("code")
            .unwrap_or("")
            .to_string();
        if code == "515" {
            info!(target: "Client", "Stream error 515, server requests reconnect");
            if let Err(e) = self.reconnect().await {
                error!(target: "Client", "Reconnect after 515 failed: {e}");
            }
            return;
        }

        warn!(target: "Client", "Stream error with code {code:?}");
        // Surface each child to whichever request is waiting on it.
        if let Some(children) = node.children() {
            for child in children {
                self.handle_iq_response(child.clone()).await;
            }
        }
        self.dispatch_event(Event::StreamError { code }).await;
    }

    async fn send_passive_active(&self) -> Result<(), crate::request::IqError> {
        use crate::request::{InfoQuery, InfoQueryType};
        self.send_iq(InfoQuery {
            namespace: "passive",
            query_type: InfoQueryType::Set,
            to: crate::binary::jid::SERVER_JID.parse().unwrap(),
            id: None,
            content: Some(NodeContent::Nodes(vec![Node::new(
                "active",
                Default::default(),
                None,
            )])),
            timeout: None,
        })
        .await
        .map(|_| ())
    }

    /// Serializes and sends a node over the encrypted transport.
    pub async fn send_node(&self, node: &Node) -> Result<(), ClientError> {
        let noise_socket = self
            .noise_socket
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        let frame_socket = self
            .frame_socket
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;

        debug!(target: "Client/Send", "--> {}", node.tag);
        let plaintext = binary::marshal(node)?;
        let ciphertext = noise_socket.encrypt_frame(&plaintext)?;
        frame_socket.send_frame(&ciphertext).await?;
        Ok(())
    }
}
