//! Core client engine for the WhatsApp Web multi-device protocol.
//!
//! This crate implements the transport layer of a companion device: the
//! Noise XX handshake against the WhatsApp relay, the post-handshake
//! AES-GCM frame cipher, the binary node codec, the pairing flow for
//! linking a new device to a primary phone, the IQ request/response
//! correlator and media content encryption.
//!
//! Higher layers (typed messages, the Signal ratchet, group management)
//! are expected to live on top of [`client::Client`]: they construct
//! [`binary::Node`] trees, send them with [`client::Client::send_node`] or
//! [`request::InfoQuery`], and react to [`types::events::Event`]s.

pub mod binary;
pub mod client;
pub mod crypto;
pub mod download;
pub mod handshake;
pub mod keepalive;
pub mod mediaconn;
pub mod pair;
pub mod prekeys;
pub mod proto;
pub mod request;
pub mod socket;
pub mod store;
pub mod types;
pub mod upload;
pub mod usync;

pub use binary::node::{Node, NodeContent};
pub use client::Client;
pub use types::jid::Jid;
