use std::{
    backtrace::{Backtrace, BacktraceStatus},
    fs,
    path::PathBuf,
};

use alloy::primitives::{Address, address};
use anyhow::{Result, anyhow};
use ccq::{
    abi::AbiDecoder,
    cfg::Config,
    client::QueryClient,
    crypto::Environment,
    error::CorrelationError,
    keys::{HexFileKeyProvider, KeyProvider, get_or_create_node_key},
    p2p_node::P2pNode,
    query::{
        ChainQuery, EthCallData, EthCallQueryRequest, EthCallWithFinalityQueryRequest, Finality,
        QueryRequest,
    },
};
use clap::Parser;
use libp2p::Multiaddr;
use tokio::{
    select,
    signal::{self, unix::SignalKind},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

/// Sends a single cross-chain query to the network and waits for a verified response.
#[derive(Parser, Debug)]
#[clap(version = env!("VERGEN_GIT_DESCRIBE"))]
struct Args {
    #[clap(long, short)]
    config_file: Vec<PathBuf>,
    #[clap(long, default_value = "false")]
    log_json: bool,
    /// P2P network identifier.
    #[clap(long)]
    network: Option<String>,
    #[clap(long)]
    environment: Option<Environment>,
    /// P2P listener port.
    #[clap(long)]
    port: Option<u16>,
    /// P2P bootstrap peers (comma-separated).
    #[clap(long, value_delimiter = ',')]
    bootstrap: Option<Vec<Multiaddr>>,
    /// Path to the node key. Generated if it does not exist.
    #[clap(long)]
    node_key: Option<PathBuf>,
    /// Path to the key used to sign queries.
    #[clap(long)]
    signer_key: Option<PathBuf>,
    /// Directory the key paths are resolved against.
    #[clap(long)]
    config_dir: Option<PathBuf>,
    /// Only process responses from this peer ID. May be repeated.
    #[clap(long)]
    target_peer_id: Vec<String>,
    /// Seconds to wait for a response before giving up.
    #[clap(long)]
    timeout: Option<u64>,
    #[clap(long, default_value = "latest")]
    block_id: String,
    /// Wait for the block to reach this finality (`finalized` or `safe`) before answering.
    #[clap(long)]
    finality: Option<Finality>,
    #[clap(long, default_value = "2")]
    chain_id: u16,
    #[clap(long, default_value_t = WETH)]
    contract: Address,
    /// JSON ABI of the contract. Defaults to WETH.
    #[clap(long)]
    abi_file: Option<PathBuf>,
    /// Zero argument view methods to call.
    #[clap(long, value_delimiter = ',', default_values = ["name", "totalSupply"])]
    method: Vec<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(network) = &self.network {
            config.network_id = network.clone();
        }
        if let Some(environment) = self.environment {
            config.environment = environment;
        }
        if let Some(port) = self.port {
            config.p2p_port = port;
        }
        if let Some(bootstrap) = &self.bootstrap {
            config.bootstrap = bootstrap.clone();
        }
        if let Some(node_key) = &self.node_key {
            config.node_key_path = node_key.clone();
        }
        if let Some(signer_key) = &self.signer_key {
            config.signer_key_path = signer_key.clone();
        }
        if let Some(config_dir) = &self.config_dir {
            config.config_dir = config_dir.clone();
        }
        if !self.target_peer_id.is_empty() {
            config.target_peer_ids = self.target_peer_id.clone();
        }
        if self.timeout.is_some() {
            config.response_timeout_secs = self.timeout;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .with_ansi(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    // Set a panic hook that records the panic as a `tracing` event at the `ERROR` verbosity level.
    std::panic::set_hook(Box::new(|panic| {
        let message = match panic.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");

        let backtrace = Backtrace::capture();
        let backtrace =
            (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());

        match (panic.location(), backtrace) {
            (None, None) => {
                tracing::error!(thread_name, message);
            }
            (None, Some(backtrace)) => {
                tracing::error!(thread_name, message, %backtrace);
            }
            (Some(location), None) => {
                tracing::error!(
                    thread_name,
                    message,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                );
            }
            (Some(location), Some(backtrace)) => {
                tracing::error!(
                    thread_name,
                    message,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                    %backtrace,
                );
            }
        }
    }));

    let mut merged_config = toml::Table::new();
    for config_file in &args.config_file {
        let config = fs::read_to_string(config_file)?;
        let config: toml::Table = toml::from_str(&config)?;
        for key in config.keys() {
            if merged_config.contains_key(key) {
                return Err(anyhow!(
                    "configuration conflict: {config_file:?} contained a key {key:?} that was already included in an earlier file"
                ));
            }
        }
        merged_config.extend(config);
    }

    let mut config: Config = serde::Deserialize::deserialize(merged_config)?;
    args.apply(&mut config);

    let signer_key_file = config.signer_key_file();
    info!(signing_key_path = %signer_key_file.display(), "Loading signing key");
    let key = HexFileKeyProvider::new(signer_key_file).signing_key()?;
    info!(public_key = %key.address(), "Signing key loaded");

    let node_key = get_or_create_node_key(&config.node_key_file())?;

    let decoder = match &args.abi_file {
        Some(path) => AbiDecoder::from_json(&fs::read_to_string(path)?)?,
        None => AbiDecoder::weth()?,
    };
    let call_data = args
        .method
        .iter()
        .map(|method| Ok(EthCallData::new(args.contract, decoder.encode_call(method)?)))
        .collect::<Result<Vec<_>>>()?;
    let query: ChainQuery = match args.finality {
        Some(finality) => EthCallWithFinalityQueryRequest {
            block_id: args.block_id.clone(),
            finality,
            call_data,
        }
        .into(),
        None => EthCallQueryRequest {
            block_id: args.block_id.clone(),
            call_data,
        }
        .into(),
    };

    let node = P2pNode::new(node_key, &config)?;
    let handle = node.handle();
    let node_task = tokio::spawn(node.start());

    let topics = config.topics();
    let mut client = QueryClient::new(
        handle.clone(),
        topics.clone(),
        config.environment,
        key,
        config.correlator_config(),
    )
    .await?;

    info!(peer_id = %handle.peer_id(), "Test started");

    info!("Waiting for peers");
    let peers = select! {
        peers = handle.wait_for_peers(&topics.request, config.min_peers) => Some(peers?),
        () = shutdown_signal() => None,
    };

    let outcome = match peers {
        Some(peers) => {
            info!(peers, "Got peers");
            let request = QueryRequest::new(args.chain_id, query);
            info!(block_id = %args.block_id, chain_id = args.chain_id, "calling query");
            client.query(request, shutdown_signal()).await
        }
        None => Err(CorrelationError::Cancelled),
    };

    let answered = match outcome {
        Ok(response) => {
            info!(
                from = %response.from,
                responder = ?response.responder,
                "received verified response"
            );
            let decoded = response.response.decode(&decoder);
            let failed = decoded.iter().filter(|d| d.value.is_err()).count();
            if failed > 0 {
                warn!(failed, total = decoded.len(), "some results could not be decoded");
            }
            Ok(true)
        }
        Err(CorrelationError::Cancelled) => {
            info!("interrupted, shutting down");
            Ok(false)
        }
        Err(e) => Err(e),
    };

    // Leave the topics cleanly, otherwise the next run of this node will not discover peers until they time out.
    drop(client);
    handle.shutdown();
    node_task.await??;

    if answered? {
        info!("Success! Test passed!");
    }
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        match signal::unix::signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!(%e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    select! {
        _ = signal::ctrl_c() => {},
        () = terminate => {},
    }
}
