use crate::binary::jid::Jid;

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum Event {
    /// A pairing QR code is ready to be rendered.
    Qr { code: String },
    /// Pairing completed; the companion JID has been persisted.
    PairSuccess { jid: Jid },
    /// Pairing failed; integrity failures are never retried.
    PairError { code: u16, text: String },
    /// The stream is authenticated and ready for application traffic.
    LoggedIn,
    /// The server closed the session for this device.
    LoggedOut,
    /// A stream error that was not handled by reconnection.
    StreamError { code: String },
    /// The connection dropped; `cause` is a human-readable reason.
    Disconnected { cause: String },
}

pub type EventHandler = Box<dyn Fn(&Event) + Send + Sync>;
