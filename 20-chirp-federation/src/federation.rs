//! Federated reads: local chirps followed by whatever each peer reports.
//!
//! Peers are queried concurrently, each under its own timeout and all under a
//! shared deadline. A peer that cannot deliver is represented by one error
//! entry in its slot; the aggregate itself never fails.

use std::time::Duration;

use futures::future::join_all;
use http::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::chirp::Chirp;
use crate::router::CHIRPS_PATH;

/// Header naming the node that issued a federated query.
pub const VIA_HEADER: &str = "Via";

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("peer answered {0}")]
    Status(StatusCode),
    #[error("undecodable feed: {0}")]
    Decode(#[from] serde_json::Error),
}

pub struct Federation {
    client: reqwest::Client,
    identity: String,
    peers: Vec<String>,
    peer_timeout: Duration,
    deadline: Duration,
}

impl Federation {
    /// Builds the aggregator for the node known to peers as `identity`.
    ///
    /// Entries equal to `identity` are dropped from `peers`; querying
    /// ourselves would only duplicate the local chirps.
    pub fn new(
        identity: String,
        peers: Vec<String>,
        peer_timeout: Duration,
        deadline: Duration,
    ) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(peer_timeout)
            .build()?;

        let peers = peers
            .into_iter()
            .filter(|peer| {
                let is_self = *peer == identity;
                if is_self {
                    warn!(peer = %peer, "ignoring peer entry that names this node");
                }
                !is_self
            })
            .collect();

        Ok(Self {
            client,
            identity,
            peers,
            peer_timeout,
            deadline,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Appends every peer's chirps to `local`, in configured peer order.
    pub async fn aggregate(&self, local: Vec<Chirp>) -> Vec<Chirp> {
        if self.peers.is_empty() {
            return local;
        }

        let deadline = Instant::now() + self.deadline;
        let results = join_all(
            self.peers
                .iter()
                .map(|peer| self.fetch_before(peer, deadline)),
        )
        .await;

        let mut merged = local;
        for (peer, result) in self.peers.iter().zip(results) {
            match result {
                Ok(chirps) => {
                    debug!(peer = %peer, count = chirps.len(), "fetched peer chirps");
                    merged.extend(chirps);
                }
                Err(err) => {
                    warn!(peer = %peer, error = %err, "peer unavailable");
                    merged.push(Chirp::unreachable_peer(peer));
                }
            }
        }
        merged
    }

    async fn fetch_before(&self, peer: &str, deadline: Instant) -> Result<Vec<Chirp>, PeerError> {
        let started = Instant::now();
        let limit = (started + self.peer_timeout).min(deadline);
        match timeout_at(limit, self.fetch(peer)).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout(limit.saturating_duration_since(started))),
        }
    }

    async fn fetch(&self, peer: &str) -> Result<Vec<Chirp>, PeerError> {
        let response = self
            .client
            .get(format!("http://{peer}{CHIRPS_PATH}"))
            .header(VIA_HEADER, &self.identity)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status(status));
        }

        let body = response.bytes().await?;
        decode_peer_feed(peer, &body)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PeerFeed {
    Wrapped { chirps: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

/// Accepts `{"chirps": [...]}` or a bare array, skipping elements that are
/// not chirps.
fn decode_peer_feed(peer: &str, body: &[u8]) -> Result<Vec<Chirp>, PeerError> {
    let entries = match serde_json::from_slice(body)? {
        PeerFeed::Wrapped { chirps } => chirps,
        PeerFeed::Bare(chirps) => chirps,
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(chirp) => Some(chirp),
            Err(err) => {
                warn!(peer = %peer, error = %err, "skipping undecodable peer chirp");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: &str =
        r#"{"id": 3, "username": "bob", "content": "hey", "timestamp": "2024-11-02T10:00:00"}"#;

    #[test]
    fn decodes_wrapped_and_bare_feeds() {
        let wrapped = format!(r#"{{"chirps": [{ENTRY}]}}"#);
        let bare = format!("[{ENTRY}]");

        let from_wrapped = decode_peer_feed("b:1", wrapped.as_bytes()).unwrap();
        let from_bare = decode_peer_feed("b:1", bare.as_bytes()).unwrap();

        assert_eq!(from_wrapped.len(), 1);
        assert_eq!(from_wrapped, from_bare);
        assert_eq!(from_wrapped[0].username, "bob");
    }

    #[test]
    fn skips_elements_that_are_not_chirps() {
        let body = format!(r#"{{"chirps": [{ENTRY}, 17, {{"id": 4}}]}}"#);
        let chirps = decode_peer_feed("b:1", body.as_bytes()).unwrap();
        assert_eq!(chirps.len(), 1);
    }

    #[test]
    fn rejects_bodies_that_are_not_feeds() {
        assert!(matches!(
            decode_peer_feed("b:1", b"<html>oops</html>"),
            Err(PeerError::Decode(_))
        ));
        assert!(decode_peer_feed("b:1", br#"{"posts": []}"#).is_err());
    }

    #[tokio::test]
    async fn drops_self_from_peer_list() {
        let federation = Federation::new(
            "127.0.0.1:9000".into(),
            vec!["127.0.0.1:9001".into(), "127.0.0.1:9000".into()],
            Duration::from_millis(100),
            Duration::from_millis(200),
        )
        .unwrap();

        assert_eq!(federation.peers(), ["127.0.0.1:9001"]);
        assert_eq!(federation.identity(), "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn no_peers_returns_local_chirps_untouched() {
        let federation = Federation::new(
            "127.0.0.1:9000".into(),
            Vec::new(),
            Duration::from_millis(100),
            Duration::from_millis(200),
        )
        .unwrap();

        assert!(federation.aggregate(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn refused_peer_becomes_error_entry() {
        // Bind then drop to find a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let peer = format!("127.0.0.1:{port}");
        let federation = Federation::new(
            "127.0.0.1:9000".into(),
            vec![peer.clone()],
            Duration::from_millis(500),
            Duration::from_secs(1),
        )
        .unwrap();

        let merged = federation.aggregate(Vec::new()).await;
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_error_entry());
        assert_eq!(merged[0].content, format!("Unable to fetch chirps from {peer}"));
    }
}
