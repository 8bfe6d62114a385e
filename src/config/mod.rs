pub mod settings;

use serde::{Deserialize, Serialize};

/// Top-level broker configuration: HTTP surface plus the MyMQ pipeline and
/// cluster blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub mymq: MymqConfig,
    pub cluster: ClusterConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            mymq: MymqConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

/// Pipeline settings for the in-process queue, DLQ, WAL, and consumer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MymqConfig {
    pub queue_size: usize,
    pub dlq_size: usize,
    pub poll_interval_ms: u64,
    pub wal_path: String,
    pub num_consumers: usize,
}

impl Default for MymqConfig {
    fn default() -> Self {
        Self {
            queue_size: 10_000,
            dlq_size: 1_000,
            poll_interval_ms: 100,
            wal_path: "./mymq-wal.log".to_string(),
            num_consumers: 1,
        }
    }
}

/// Static cluster membership: this node, its peers, and the ack quorum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub node_id: String,
    /// Base URLs of peer nodes, e.g. `http://10.0.0.2:8080`.
    pub peers: Vec<String>,
    /// Required acknowledgements including self. Values below 1 coerce to 1;
    /// values above `1 + peers.len()` clamp down to it.
    pub quorum: i32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_string(),
            peers: Vec::new(),
            quorum: 1,
        }
    }
}

impl BrokerConfig {
    /// Validate configuration bounds before wiring components.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.mymq.queue_size == 0 {
            return Err("queue_size must be > 0".to_string());
        }
        if self.mymq.dlq_size == 0 {
            return Err("dlq_size must be > 0".to_string());
        }
        if self.mymq.num_consumers == 0 {
            return Err("num_consumers must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.mymq.queue_size, 10_000);
        assert_eq!(cfg.mymq.dlq_size, 1_000);
        assert_eq!(cfg.mymq.poll_interval_ms, 100);
        assert_eq!(cfg.mymq.wal_path, "./mymq-wal.log");
        assert_eq!(cfg.mymq.num_consumers, 1);
        assert_eq!(cfg.cluster.quorum, 1);
        assert!(cfg.cluster.peers.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacities() {
        let mut cfg = BrokerConfig::default();
        cfg.mymq.queue_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = BrokerConfig::default();
        cfg.mymq.num_consumers = 0;
        assert!(cfg.validate().is_err());
    }
}
