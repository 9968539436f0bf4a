use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use tally_common::{
    auth::{Authenticator, Secp256k1Authenticator},
    error::{Result, TallyError},
};
use tally_consensus::ClusterSettings;

use crate::transport::PeerAddress;

/// On-disk node configuration (JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// secp256k1 identity key, hex. Used for elections only.
    pub secret_key: String,
    /// secp256k1 key commands are signed with, hex.
    pub command_secret_key: String,
    /// Address this node is reachable at,
    /// `tcp://host:port/<publicKeyHex>/<commandKeyHex>`.
    pub address: String,
    /// Addresses of the other members, in the same form.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Directory for the redb log. In-memory storage when absent.
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub settings: ClusterSettings,
}

impl NodeConfig {
    /// Fresh identity listening on `host:port`.
    pub fn generate(host: &str, port: u16) -> Self {
        let auth = Secp256k1Authenticator::generate();
        let signer = Secp256k1Authenticator::generate();
        let address = PeerAddress::new(host, port, auth.public_key()).with_command_key(signer.public_key());
        Self {
            secret_key: auth.secret_hex(),
            command_secret_key: signer.secret_hex(),
            address: address.to_string(),
            peers: Vec::new(),
            data_dir: None,
            settings: ClusterSettings::default(),
        }
    }

    pub fn authenticator(&self) -> Result<Secp256k1Authenticator> {
        Secp256k1Authenticator::from_hex(&self.secret_key)
    }

    pub fn command_signer(&self) -> Result<Secp256k1Authenticator> {
        Secp256k1Authenticator::from_hex(&self.command_secret_key)
    }

    pub fn local_address(&self) -> Result<PeerAddress> {
        parse_address(&self.address)
    }

    pub fn peer_addresses(&self) -> Result<Vec<PeerAddress>> {
        self.peers.iter().map(|p| parse_address(p)).collect()
    }

    /// Checks that the pieces agree with each other.
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        let auth = self.authenticator()?;
        let local = self.local_address()?;
        if local.key != auth.public_key() {
            return Err(TallyError::Config("address key does not match secret_key".to_string()));
        }
        let signer = self.command_signer()?;
        if signer.public_key() == auth.public_key() {
            return Err(TallyError::Config("command_secret_key must differ from secret_key".to_string()));
        }
        if local.command_key != Some(signer.public_key()) {
            return Err(TallyError::Config("address command key does not match command_secret_key".to_string()));
        }
        for peer in self.peer_addresses()? {
            if peer.command_key.is_none() {
                return Err(TallyError::Config(format!("peer {peer} has no command key")));
            }
        }
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let parsed = serde_json::from_str::<NodeConfig>(&data)?;
        Ok(parsed)
    }
}

fn parse_address(address: &str) -> Result<PeerAddress> {
    address.parse::<PeerAddress>().map_err(|e| TallyError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");

        let mut config = NodeConfig::generate("127.0.0.1", 7001);
        config.peers.push(NodeConfig::generate("127.0.0.1", 7002).address);
        config.data_dir = Some(dir.path().join("data").to_string_lossy().into_owned());
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        loaded.validate().unwrap();
        assert_eq!(loaded.peer_addresses().unwrap().len(), 1);
    }

    #[test]
    fn test_minimal_json_gets_defaults() {
        let source = NodeConfig::generate("localhost", 9000);
        let json = format!(
            r#"{{"secret_key": "{}", "command_secret_key": "{}", "address": "{}"}}"#,
            source.secret_key, source.command_secret_key, source.address
        );
        let config: NodeConfig = serde_json::from_str(&json).unwrap();
        assert!(config.peers.is_empty());
        assert_eq!(config.data_dir, None);
        assert_eq!(config.settings, ClusterSettings::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let mut config = NodeConfig::generate("localhost", 9000);
        config.address = NodeConfig::generate("localhost", 9000).address;
        assert!(matches!(config.validate(), Err(TallyError::Config(_))));
    }

    #[test]
    fn test_command_key_must_be_separate_and_published() {
        let mut reused = NodeConfig::generate("localhost", 9000);
        reused.command_secret_key = reused.secret_key.clone();
        assert!(matches!(reused.validate(), Err(TallyError::Config(_))));

        let mut unpublished = NodeConfig::generate("localhost", 9000);
        let auth = unpublished.authenticator().unwrap();
        unpublished.address = PeerAddress::new("localhost", 9000, auth.public_key()).to_string();
        assert!(matches!(unpublished.validate(), Err(TallyError::Config(_))));

        let mut bare_peer = NodeConfig::generate("localhost", 9000);
        let other = NodeConfig::generate("localhost", 9001).authenticator().unwrap();
        bare_peer.peers.push(PeerAddress::new("localhost", 9001, other.public_key()).to_string());
        assert!(matches!(bare_peer.validate(), Err(TallyError::Config(_))));
    }
}
