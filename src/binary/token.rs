//! Shared token dictionaries for the binary node codec.
//!
//! Sender and receiver must agree on these tables: the wire format is not
//! self-describing, it indexes into them. The single-byte table covers
//! indices below [`DICTIONARY_0`]; longer strings common enough to matter
//! live in one of four secondary dictionaries addressed by a
//! (dictionary, index) byte pair.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Version byte advertised in the connection header.
pub const DICT_VERSION: u8 = 2;

// Tag bytes. Everything below DICTIONARY_0 is a direct single-byte token.
pub const LIST_EMPTY: u8 = 0;
pub const STREAM_END: u8 = 2;
pub const DICTIONARY_0: u8 = 236;
pub const DICTIONARY_1: u8 = 237;
pub const DICTIONARY_2: u8 = 238;
pub const DICTIONARY_3: u8 = 239;
pub const AD_JID: u8 = 247;
pub const LIST_8: u8 = 248;
pub const LIST_16: u8 = 249;
pub const JID_PAIR: u8 = 250;
pub const HEX_8: u8 = 251;
pub const BINARY_8: u8 = 252;
pub const BINARY_20: u8 = 253;
pub const BINARY_32: u8 = 254;
pub const NIBBLE_8: u8 = 255;

/// Longest string the nibble/hex packed encodings can carry.
pub const PACKED_MAX: u8 = 127;

static SINGLE_BYTE_TOKENS: &[&str] = &[
    "", "xmlstreamstart", "xmlstreamend", "s.whatsapp.net", "type", "participant",
    "from", "receipt", "id", "broadcast", "status", "message",
    "notification", "notify", "to", "jid", "user", "class",
    "offline", "g.us", "result", "mediatype", "enc", "skmsg",
    "off_cnt", "stanza_id", "encrypt", "_", "request", "account_sync",
    "error", "markable", "presence", "interactive", "get", "invite",
    "gif", "web", "groups", "set", "list", "all",
    "contacts", "location", "mode", "retry", "count", "s.us",
    "ptt", "prop", "forwarded", "mute", "participants", "ack",
    "relayclass", "available", "composing", "image", "gp2", "frequent",
    "index", "invis", "groups_v4_invite", "audio", "last", "admin",
    "document", "open", "permanent_attributes", "dirty", "created", "attributes",
    "usync", "get_users", "message_acks", "value", "media", "context",
    "revoke_invite", "appdata", "video", "disable", "time", "duration",
    "avatar", "subject", "1", "background", "encoding", "fallback_hostname",
    "0", "fallback_ip4", "creator", "fallback_ip6", "hostname", "ip4",
    "ip6", "preview", "query", "platform", "true", "false",
    "text", "version", "url", "add", "remove", "promote",
    "demote", "category", "unavailable", "paused", "recording", "state",
    "config", "pair-device", "pair-success", "device-identity", "ref", "key-index",
    "passive", "active", "w:p", "w:m", "ping", "pong",
    "auth", "auth_ttl", "expiration", "direct_path", "w:profile:picture", "picture",
    "registration", "identity", "device", "key", "skey", "signature",
    "device-list", "w:stats", "name", "code", "reason", "success",
    "failure", "stream:error", "iq", "ib", "regular", "chatstate",
    "call", "offer", "terminate", "w", "w:g2", "w:sync:app:state",
    "collection", "patch", "snapshot", "record", "keys", "token",
    "priority", "delete", "filter", "sid", "order", "side_list",
    "tctoken", "mms_vcard", "c.us", "lid", "verified_name", "profile",
    "contact", "vcard", "read", "delivery", "played", "inactive",
    "stream:features", "mechanism", "crypto", "enc_iv", "enc_key", "host",
    "upload", "download", "thumbnail", "update", "item", "linked_group",
    "w:gp2", "product", "business", "2", "3", "grp_uniq_key",
    "timestamp", "unknown",
];

static DOUBLE_BYTE_TOKENS: &[&[&str]] = &[
    &[
        "media-bog1-1.cdn.whatsapp.net", "media-mia1-1.cdn.whatsapp.net",
        "media-mia3-1.cdn.whatsapp.net", "media-eze1-1.cdn.whatsapp.net",
        "media-gru3-1.cdn.whatsapp.net", "media-gig2-1.cdn.whatsapp.net",
        "media-arn2-1.cdn.whatsapp.net", "media-ams4-1.cdn.whatsapp.net",
        "media-mad1-1.cdn.whatsapp.net", "media-sof1-1.cdn.whatsapp.net",
        "media-mrs2-1.cdn.whatsapp.net", "media-mxp1-1.cdn.whatsapp.net",
        "media-otp3-1.cdn.whatsapp.net", "media-waw1-1.cdn.whatsapp.net",
        "media-frt3-2.cdn.whatsapp.net", "media-frx5-1.cdn.whatsapp.net",
        "media-cdt1-1.cdn.whatsapp.net", "media-cdg2-1.cdn.whatsapp.net",
        "media-lhr8-1.cdn.whatsapp.net", "media-lhr3-1.cdn.whatsapp.net",
        "media-lcy1-1.cdn.whatsapp.net", "media-bom1-2.cdn.whatsapp.net",
        "media-del1-1.cdn.whatsapp.net", "media-hyd1-1.cdn.whatsapp.net",
        "media-maa2-1.cdn.whatsapp.net", "media-hkg4-1.cdn.whatsapp.net",
        "media-hkg4-2.cdn.whatsapp.net", "media-sin6-1.cdn.whatsapp.net",
        "media-sin6-2.cdn.whatsapp.net", "media-sin6-3.cdn.whatsapp.net",
        "media-kul2-1.cdn.whatsapp.net", "media-kul3-1.cdn.whatsapp.net",
        "media-xsp1-1.cdn.whatsapp.net", "media-nrt1-1.cdn.whatsapp.net",
        "media-kix1-1.cdn.whatsapp.net", "media-gmp1-1.cdn.whatsapp.net",
        "media-tpe1-1.cdn.whatsapp.net", "media-syd2-1.cdn.whatsapp.net",
        "media-akl1-1.cdn.whatsapp.net", "media-jnb1-1.cdn.whatsapp.net",
    ],
    &[
        "mmg.whatsapp.net", "pps.whatsapp.net",
        "web.whatsapp.com", "dyn.web.whatsapp.com",
        "WhatsApp", "multicast",
        "clear_chat", "star",
        "unstar", "archive",
        "unarchive", "pin",
        "unpin", "mark_read",
        "mark_unread", "recent",
    ],
    &[
    ],
    &[
    ],
];

static SINGLE_BYTE_MAP: LazyLock<HashMap<&'static str, u8>> = LazyLock::new(|| {
    SINGLE_BYTE_TOKENS
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.is_empty())
        .map(|(i, t)| (*t, i as u8))
        .collect()
});

static DOUBLE_BYTE_MAP: LazyLock<HashMap<&'static str, (u8, u8)>> = LazyLock::new(|| {
    DOUBLE_BYTE_TOKENS
        .iter()
        .enumerate()
        .flat_map(|(d, dict)| {
            dict.iter()
                .enumerate()
                .map(move |(i, t)| (*t, (d as u8, i as u8)))
        })
        .collect()
});

pub fn index_of_single_token(token: &str) -> Option<u8> {
    SINGLE_BYTE_MAP.get(token).copied()
}

pub fn index_of_double_byte_token(token: &str) -> Option<(u8, u8)> {
    DOUBLE_BYTE_MAP.get(token).copied()
}

pub fn get_single_token(index: u8) -> Option<&'static str> {
    SINGLE_BYTE_TOKENS.get(index as usize).copied()
}

pub fn get_double_token(dict: u8, index: u8) -> Option<&'static str> {
    DOUBLE_BYTE_TOKENS
        .get(dict as usize)
        .and_then(|d| d.get(index as usize))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_fits_below_first_tag_byte() {
        assert!(SINGLE_BYTE_TOKENS.len() <= DICTIONARY_0 as usize);
    }

    #[test]
    fn test_single_byte_token_roundtrip() {
        for i in 1..SINGLE_BYTE_TOKENS.len() as u8 {
            if let Some(token) = get_single_token(i) {
                if token.is_empty() {
                    continue;
                }
                assert_eq!(
                    index_of_single_token(token),
                    Some(i),
                    "token {token:?} at index {i} does not round-trip"
                );
            }
        }
    }

    #[test]
    fn test_double_byte_token_roundtrip() {
        for dict in 0..4u8 {
            for idx in 0..=255u8 {
                if let Some(token) = get_double_token(dict, idx) {
                    assert_eq!(
                        index_of_double_byte_token(token),
                        Some((dict, idx)),
                        "token {token:?} at dict {dict} index {idx} does not round-trip"
                    );
                }
            }
        }
    }

    #[test]
    fn test_unknown_string_returns_none() {
        assert!(index_of_single_token("definitely-not-a-token").is_none());
        assert!(index_of_double_byte_token("definitely-not-a-token").is_none());
    }

    #[test]
    fn test_stream_end_token() {
        assert_eq!(get_single_token(STREAM_END), Some("xmlstreamend"));
    }
}
