//! Peer replication client.
//!
//! One best-effort unary POST per peer per admitted message. A 2xx response
//! counts as an acknowledgement; failures are logged at warning level and
//! never retried synchronously. The request timeout is kept short so
//! admission latency stays predictable.

use crate::message::Message;
use crate::{MymqError, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Per-peer request timeout. Admission blocks for the fan-out, so this bounds
/// the worst-case stall a dead peer can add.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Path peers expose for replica ingress.
pub const REPLICATE_PATH: &str = "/_replicate";

#[derive(Debug, Clone)]
pub struct ReplicationClient {
    http: reqwest::Client,
}

impl ReplicationClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MymqError::Replication(format!("http client build failed: {e}")))?;
        Ok(Self { http })
    }

    /// Fan the message out to every peer and return the acknowledgement
    /// count, starting at 1 for the local node. Neither reorders nor batches;
    /// each admission issues exactly one fan-out.
    pub async fn replicate(&self, peers: &[String], msg: &Message) -> usize {
        let mut acks = 1usize;
        for peer in peers {
            let url = format!("{}{}", peer.trim_end_matches('/'), REPLICATE_PATH);
            match self.http.post(&url).json(msg).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("peer ack peer={} id={}", peer, msg.id);
                    acks += 1;
                }
                Ok(response) => {
                    warn!(
                        "peer rejected replica peer={} id={} status={}",
                        peer,
                        msg.id,
                        response.status()
                    );
                }
                Err(e) => {
                    warn!("peer unreachable peer={} id={} err={}", peer, msg.id, e);
                }
            }
        }
        acks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_peers_means_self_ack_only() {
        let client = ReplicationClient::new().unwrap();
        let acks = client.replicate(&[], &Message::new("x")).await;
        assert_eq!(acks, 1);
    }

    #[tokio::test]
    async fn test_unreachable_peer_does_not_ack() {
        let client = ReplicationClient::new().unwrap();
        // Nothing listens on this port; the connection is refused immediately.
        let peers = vec!["http://127.0.0.1:1".to_string()];
        let acks = client.replicate(&peers, &Message::new("x")).await;
        assert_eq!(acks, 1);
    }

    #[tokio::test]
    async fn test_2xx_peer_acks() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Minimal one-shot HTTP peer returning 200 OK.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await;
        });

        let client = ReplicationClient::new().unwrap();
        let peers = vec![format!("http://{addr}")];
        let acks = client.replicate(&peers, &Message::new("x")).await;
        assert_eq!(acks, 2);
    }
}
