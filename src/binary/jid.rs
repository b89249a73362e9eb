use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const SERVER_JID: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const LEGACY_USER_SERVER: &str = "c.us";
pub const HIDDEN_USER_SERVER: &str = "lid";

/// Servers for which the wire format has a compact JID encoding.
pub const COMPACT_SERVERS: &[&str] = &[
    DEFAULT_USER_SERVER,
    GROUP_SERVER,
    BROADCAST_SERVER,
    LEGACY_USER_SERVER,
    HIDDEN_USER_SERVER,
];

#[derive(Debug, Clone, Error)]
pub enum JidError {
    #[error("Invalid JID format: {0}")]
    InvalidFormat(String),
    #[error("Failed to parse JID component: {0}")]
    Parse(String),
}

/// A WhatsApp addressing identifier of the form `user[.agent][:device]@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
    pub agent: u8,
    pub device: u16,
}

impl Jid {
    pub fn new(user: &str, server: &str) -> Self {
        Self {
            user: user.to_string(),
            server: server.to_string(),
            ..Default::default()
        }
    }

    pub fn is_ad(&self) -> bool {
        self.agent > 0 || self.device > 0
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// The bare `user@server` form, with agent and device stripped.
    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            ..Default::default()
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = match s.rsplit_once('@') {
            Some((u, srv)) => (u, srv),
            None => {
                // Bare known-server form, e.g. "s.whatsapp.net".
                if COMPACT_SERVERS.contains(&s) {
                    return Ok(Jid::new("", s));
                }
                return Err(JidError::InvalidFormat(s.to_string()));
            }
        };
        if server.is_empty() {
            return Err(JidError::InvalidFormat(s.to_string()));
        }

        let (user_agent, device) = match user_part.rsplit_once(':') {
            Some((u, d)) => (
                u,
                d.parse::<u16>()
                    .map_err(|e| JidError::Parse(e.to_string()))?,
            ),
            None => (user_part, 0),
        };

        let (user, agent) = match user_agent.rsplit_once('.') {
            Some((u, a)) => match a.parse::<u16>() {
                Ok(v) if v <= u8::MAX as u16 => (u, v as u8),
                // A dot that is part of the user identifier, not an agent.
                _ => (user_agent, 0),
            },
            None => (user_agent, 0),
        };

        Ok(Jid {
            user: user.to_string(),
            server: server.to_string(),
            agent,
            device,
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            return write!(f, "{}", self.server);
        }
        write!(f, "{}", self.user)?;
        if self.agent > 0 {
            write!(f, ".{}", self.agent)?;
        }
        if self.device > 0 {
            write!(f, ":{}", self.device)?;
        }
        write!(f, "@{}", self.server)
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Jid::from_str(&value)
    }
}
