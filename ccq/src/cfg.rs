use std::{collections::HashSet, path::PathBuf, time::Duration};

use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};

use crate::{client::QueryTopics, correlator::CorrelatorConfig, crypto::Environment};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// P2P network identifier. The query topics live under `{network_id}/ccq`.
    #[serde(default = "network_id_default")]
    pub network_id: String,
    /// Selects the domain separation prefix used when signing requests.
    #[serde(default = "environment_default")]
    pub environment: Environment,
    /// The UDP (QUIC) and TCP port to listen for P2P messages on. 0 picks a random port.
    #[serde(default = "p2p_port_default")]
    pub p2p_port: u16,
    /// Peers to dial on startup. Each address must end in a `/p2p/<peer id>` component.
    #[serde(default = "bootstrap_default")]
    pub bootstrap: Vec<Multiaddr>,
    /// Directory that relative key paths are resolved against.
    #[serde(default = "config_dir_default")]
    pub config_dir: PathBuf,
    /// The libp2p identity of this node. Generated if it does not exist.
    #[serde(default = "node_key_path_default")]
    pub node_key_path: PathBuf,
    /// Hex encoded secp256k1 key used to sign query requests.
    #[serde(default = "signer_key_path_default")]
    pub signer_key_path: PathBuf,
    /// Only accept responses published by these peers. Empty means every peer is accepted.
    #[serde(default)]
    pub target_peer_ids: Vec<String>,
    /// Give up waiting for a response after this many seconds. Wait forever if unset.
    #[serde(default)]
    pub response_timeout_secs: Option<u64>,
    /// Number of peers that must be on the request topic before a query is sent.
    #[serde(default = "min_peers_default")]
    pub min_peers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network_id: network_id_default(),
            environment: environment_default(),
            p2p_port: p2p_port_default(),
            bootstrap: bootstrap_default(),
            config_dir: config_dir_default(),
            node_key_path: node_key_path_default(),
            signer_key_path: signer_key_path_default(),
            target_peer_ids: vec![],
            response_timeout_secs: None,
            min_peers: min_peers_default(),
        }
    }
}

impl Config {
    pub fn ccq_network_id(&self) -> String {
        QueryTopics::ccq_network_id(&self.network_id)
    }

    pub fn topics(&self) -> QueryTopics {
        QueryTopics::for_network(&self.network_id)
    }

    pub fn node_key_file(&self) -> PathBuf {
        self.config_dir.join(&self.node_key_path)
    }

    pub fn signer_key_file(&self) -> PathBuf {
        self.config_dir.join(&self.signer_key_path)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_secs.map(Duration::from_secs)
    }

    pub fn correlator_config(&self) -> CorrelatorConfig {
        CorrelatorConfig {
            allowed_senders: self.target_peer_ids.iter().cloned().collect::<HashSet<_>>(),
            response_timeout: self.response_timeout(),
        }
    }
}

pub fn network_id_default() -> String {
    "/wormhole/mainnet/2".to_owned()
}

pub fn environment_default() -> Environment {
    Environment::MainNet
}

pub fn p2p_port_default() -> u16 {
    8998
}

pub fn bootstrap_default() -> Vec<Multiaddr> {
    [
        "/dns4/wormhole-mainnet-v2-bootstrap.certus.one/udp/8996/quic-v1/p2p/12D3KooWQp644DK27fd3d4Km3jr7gHiuJJ5ZGmy8hH4py7fP4FP7",
        "/dns4/wormhole-v2-mainnet-bootstrap.xlabs.xyz/udp/8996/quic-v1/p2p/12D3KooWNQ9tVrcb64tw6bNs2CaNrUGPM7yRrKvBBheQ5yCyPHKC",
        "/dns4/wormhole.mcf.rocks/udp/8996/quic-v1/p2p/12D3KooWDZVv7BhZ8yFLkarNdaSWaB43D6UbQwExJ8nnGAEmfHcU",
        "/dns4/wormhole-v2-mainnet-bootstrap.staking.fund/udp/8996/quic-v1/p2p/12D3KooWG8obDX9DNi1KUwZNu9xkGwfKqTp2GFwuuHpWZ3nQruS1",
    ]
    .iter()
    .filter_map(|a| a.parse().ok())
    .collect()
}

pub fn config_dir_default() -> PathBuf {
    PathBuf::from(".")
}

pub fn node_key_path_default() -> PathBuf {
    PathBuf::from("ccq.nodeKey")
}

pub fn signer_key_path_default() -> PathBuf {
    PathBuf::from("ccq.signerKey")
}

pub fn min_peers_default() -> usize {
    1
}
