use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Result;
use clap::{Parser, ValueHint};

use crate::config::{self, ServerConfig};

/// Run a chirp node that serves its own chirps and merges those of its peers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = config::DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// host:port this node is known by to its peers; defaults to the bound address.
    #[arg(long, value_hint = ValueHint::Hostname)]
    pub advertise: Option<String>,

    /// Directory served for GET requests outside /chirps.
    #[arg(long, default_value = config::DEFAULT_DOCUMENT_ROOT, value_hint = ValueHint::DirPath)]
    pub document_root: PathBuf,

    /// JSON array of chirps loaded at startup; defaults to <document-root>/chirps.json.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub snapshot: Option<PathBuf>,

    /// Comma-separated peer list: host:port,host:port,... queried in order.
    #[arg(long, value_delimiter = ',', value_hint = ValueHint::Other)]
    pub peer: Vec<String>,

    /// Longest wait for a single peer, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub peer_timeout_ms: u64,

    /// Longest wait for all peers together, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub federation_deadline_ms: u64,

    /// Close connections that send nothing for this many seconds.
    #[arg(long, default_value_t = 30)]
    pub idle_timeout_secs: u64,

    /// Connections served at once; extra clients receive 503.
    #[arg(long, default_value_t = 256)]
    pub max_connections: usize,
}

impl Cli {
    pub fn into_config(self) -> Result<ServerConfig> {
        let config = ServerConfig {
            listen: self.listen,
            advertise: self.advertise,
            document_root: self.document_root,
            snapshot: self.snapshot,
            peers: config::parse_peers(&self.peer)?,
            peer_timeout: Duration::from_millis(self.peer_timeout_ms),
            federation_deadline: Duration::from_millis(self.federation_deadline_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_connections: self.max_connections,
        };
        config.validate()?;
        Ok(config)
    }
}
