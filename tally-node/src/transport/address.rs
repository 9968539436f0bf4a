use std::{fmt, str::FromStr};

use tally_common::{auth::parse_public_key, utils::NodeId};

use super::NetworkError;

/// `tcp://host:port/<publicKeyHex>[/<commandKeyHex>]`. The first key is the
/// member id, the optional second one verifies its commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
    pub key: NodeId,
    pub command_key: Option<NodeId>,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16, key: NodeId) -> Self {
        Self { host: host.into(), port, key, command_key: None }
    }

    pub fn with_command_key(mut self, command_key: NodeId) -> Self {
        self.command_key = Some(command_key);
        self
    }

    /// `host:port`, the part a socket transport connects to.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}/{}", self.host, self.port, self.key)?;
        if let Some(command_key) = &self.command_key {
            write!(f, "/{command_key}")?;
        }
        Ok(())
    }
}

impl FromStr for PeerAddress {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetworkError::InvalidAddress(s.to_string());

        let rest = s.strip_prefix("tcp://").ok_or_else(invalid)?;
        let (endpoint, keys) = rest.split_once('/').ok_or_else(invalid)?;
        let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        let parse_key = |text: &str| {
            let key = NodeId::from(text.to_ascii_lowercase());
            parse_public_key(&key).map(|_| key).map_err(|_| invalid())
        };
        let (key, command_key) = match keys.split_once('/') {
            Some((key, command)) => (parse_key(key)?, Some(parse_key(command)?)),
            None => (parse_key(keys)?, None),
        };
        Ok(Self { host: host.to_string(), port, key, command_key })
    }
}
