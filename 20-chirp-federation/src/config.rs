use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:24477";
pub const DEFAULT_DOCUMENT_ROOT: &str = "public";
pub const SNAPSHOT_FILE_NAME: &str = "chirps.json";

/// Runtime settings of one node.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Identity sent in `Via`; the bound address when unset.
    pub advertise: Option<String>,
    pub document_root: PathBuf,
    /// Startup snapshot; `<document_root>/chirps.json` when unset.
    pub snapshot: Option<PathBuf>,
    /// Peer nodes as `host:port`, queried in this order.
    pub peers: Vec<String>,
    pub peer_timeout: Duration,
    pub federation_deadline: Duration,
    pub idle_timeout: Duration,
    pub max_connections: usize,
}

impl ServerConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            advertise: None,
            document_root: PathBuf::from(DEFAULT_DOCUMENT_ROOT),
            snapshot: None,
            peers: Vec::new(),
            peer_timeout: Duration::from_millis(2_000),
            federation_deadline: Duration::from_millis(5_000),
            idle_timeout: Duration::from_secs(30),
            max_connections: 256,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot
            .clone()
            .unwrap_or_else(|| self.document_root.join(SNAPSHOT_FILE_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_connections > 0, "max connections must be at least 1");
        ensure!(!self.peer_timeout.is_zero(), "peer timeout must be positive");
        ensure!(
            !self.federation_deadline.is_zero(),
            "federation deadline must be positive"
        );
        ensure!(!self.idle_timeout.is_zero(), "idle timeout must be positive");
        for peer in &self.peers {
            parse_peer(peer)?;
        }
        Ok(())
    }
}

/// Checks that a peer entry looks like `host:port`.
pub fn parse_peer(entry: &str) -> Result<String> {
    let entry = entry.trim();
    let Some((host, port)) = entry.rsplit_once(':') else {
        return Err(anyhow!("invalid peer entry '{entry}', expected host:port"));
    };
    ensure!(!host.is_empty(), "invalid peer entry '{entry}', host is empty");
    port.parse::<u16>()
        .with_context(|| format!("invalid port in peer entry '{entry}'"))?;
    Ok(entry.to_string())
}

/// Validates every peer entry, preserving order and duplicates.
pub fn parse_peers(entries: &[String]) -> Result<Vec<String>> {
    entries.iter().map(|entry| parse_peer(entry)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_defaults_to_document_root() {
        let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        config.document_root = PathBuf::from("/srv/chirps");
        assert_eq!(config.snapshot_path(), PathBuf::from("/srv/chirps/chirps.json"));

        config.snapshot = Some(PathBuf::from("/tmp/seed.json"));
        assert_eq!(config.snapshot_path(), PathBuf::from("/tmp/seed.json"));
    }

    #[test]
    fn peers_must_be_host_and_port() {
        assert_eq!(parse_peer(" node-b:24478 ").unwrap(), "node-b:24478");
        assert!(parse_peer("node-b").is_err());
        assert!(parse_peer(":24478").is_err());
        assert!(parse_peer("node-b:http").is_err());
        assert!(parse_peer("node-b:70000").is_err());
        assert!(parse_peer("").is_err());
    }

    #[test]
    fn peer_order_is_preserved() {
        let peers = parse_peers(&["b:2".into(), "a:1".into(), "b:2".into()]).unwrap();
        assert_eq!(peers, ["b:2", "a:1", "b:2"]);
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        assert!(config.validate().is_ok());

        config.max_connections = 0;
        assert!(config.validate().is_err());

        config.max_connections = 1;
        config.peer_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
