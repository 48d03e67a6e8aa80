use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use rotor_consensus::DriverConfig;
use rotor_core::NodeId;
use rotor_mempool::{MempoolConfig, TxGeneratorConfig};
use rotor_net::{PeerAddressTable, CONNECT_TIMEOUT};
use serde::{Deserialize, Serialize};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity of this node
    pub node_id: NodeId,

    /// Listen address; defaults to this node's entry in `peers`
    #[serde(default)]
    pub listen_addr: Option<String>,

    /// Every participant, including this node, in leader rotation order
    pub peers: Vec<PeerConfig>,

    /// Interval between leadership checks in milliseconds
    pub round_time_ms: u64,

    /// Stop after this many rounds
    #[serde(default)]
    pub max_rounds: Option<u64>,

    /// Mempool max size
    pub mempool_max_size: usize,

    /// Block builder max transactions
    pub max_block_txs: usize,

    /// Synthetic transaction load
    #[serde(default)]
    pub txgen: Option<TxGenConfig>,

    /// Bound on opening a connection to a peer in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    CONNECT_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxGenConfig {
    pub interval_ms: u64,
    pub batch_size: usize,
    pub payload_len: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_id: NodeId(0),
            listen_addr: None,
            peers: vec![PeerConfig {
                id: NodeId(0),
                address: "127.0.0.1:7000".to_string(),
            }],
            round_time_ms: 1000,
            max_rounds: None,
            mempool_max_size: 10_000,
            max_block_txs: 100,
            txgen: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Peer addresses keyed by node id
    pub fn address_table(&self) -> Result<PeerAddressTable> {
        let mut table = PeerAddressTable::new();
        for peer in &self.peers {
            if table.insert(peer.id, peer.address.clone()).is_some() {
                bail!("{} listed more than once in peers", peer.id);
            }
        }
        Ok(table)
    }

    /// Leader rotation order
    pub fn members(&self) -> Vec<NodeId> {
        self.peers.iter().map(|peer| peer.id).collect()
    }

    /// Address the supervisor binds to
    pub fn listen_address(&self) -> Result<String> {
        if let Some(addr) = &self.listen_addr {
            return Ok(addr.clone());
        }
        match self.peers.iter().find(|peer| peer.id == self.node_id) {
            Some(peer) => Ok(peer.address.clone()),
            None => bail!("{} has no entry in peers and no listen_addr", self.node_id),
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            round_interval: Duration::from_millis(self.round_time_ms),
            max_rounds: self.max_rounds,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn mempool_config(&self) -> MempoolConfig {
        MempoolConfig {
            max_size: self.mempool_max_size,
            max_per_block: self.max_block_txs,
        }
    }

    pub fn txgen_config(&self) -> Option<TxGeneratorConfig> {
        self.txgen.as_ref().map(|txgen| TxGeneratorConfig {
            interval: Duration::from_millis(txgen.interval_ms),
            batch_size: txgen.batch_size,
            payload_len: txgen.payload_len,
        })
    }
}

/// Generate a sample configuration for a local network of `nodes` nodes
pub fn generate_sample_config(nodes: u32, node_id: NodeId, base_port: u16) -> NodeConfig {
    let peers = (0..nodes)
        .map(|i| PeerConfig {
            id: NodeId(i),
            address: format!("127.0.0.1:{}", u32::from(base_port) + i),
        })
        .collect();

    NodeConfig {
        node_id,
        peers,
        max_rounds: Some(100),
        txgen: Some(TxGenConfig {
            interval_ms: 500,
            batch_size: 10,
            payload_len: 32,
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.listen_address().unwrap(), "127.0.0.1:7000");
        assert!(config.txgen_config().is_none());
    }

    #[test]
    fn test_sample_config() {
        let config = generate_sample_config(3, NodeId(2), 9000);
        assert_eq!(config.members(), vec![NodeId(0), NodeId(1), NodeId(2)]);
        assert_eq!(config.listen_address().unwrap(), "127.0.0.1:9002");
        assert_eq!(config.address_table().unwrap().len(), 3);
    }

    #[test]
    fn test_duplicate_peer_rejected() {
        let mut config = generate_sample_config(2, NodeId(0), 9000);
        config.peers.push(PeerConfig {
            id: NodeId(1),
            address: "127.0.0.1:9100".to_string(),
        });
        assert!(config.address_table().is_err());
    }

    #[test]
    fn test_missing_self_needs_listen_addr() {
        let mut config = generate_sample_config(2, NodeId(5), 9000);
        assert!(config.listen_address().is_err());

        config.listen_addr = Some("0.0.0.0:9005".to_string());
        assert_eq!(config.listen_address().unwrap(), "0.0.0.0:9005");
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{
            "node_id": 1,
            "peers": [{"id": 0, "address": "127.0.0.1:7000"}, {"id": 1, "address": "127.0.0.1:7001"}],
            "round_time_ms": 250,
            "mempool_max_size": 100,
            "max_block_txs": 10
        }"#;
        let config: NodeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.node_id, NodeId(1));
        assert_eq!(config.max_rounds, None);
        assert_eq!(config.driver_config().round_interval, Duration::from_millis(250));
        assert_eq!(config.connect_timeout(), CONNECT_TIMEOUT);
    }
}
