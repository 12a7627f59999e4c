use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::ProjectDirs;
use ethereum_types::U256;
use ferrum_core::{ForkId, StaticChainData};
use ferrum_p2p::config::Config;
use ferrum_p2p::enode::Enode;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use tracing::{info, warn};
use tracing_subscriber::{filter::Directive, EnvFilter, FmtSubscriber};

mod cli;

const DEFAULT_APP_NAME: &str = "ferrumd";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli::cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .expect("log-level has a default value");
    let log_filter = EnvFilter::builder()
        .with_default_directive(
            Directive::from_str(log_level).expect("unsupported log level"),
        )
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(log_filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let data_dir = matches
        .get_one::<String>("datadir")
        .map(PathBuf::from)
        .unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let listen_port: u16 = matches
        .get_one::<String>("p2p.port")
        .expect("p2p.port has a default value")
        .parse()
        .expect("p2p.port must be a valid port number");
    let network_id: u64 = matches
        .get_one::<String>("network-id")
        .expect("network-id has a default value")
        .parse()
        .expect("network-id must be a valid integer");
    let max_peers: u32 = matches
        .get_one::<String>("max-peers")
        .expect("max-peers has a default value")
        .parse()
        .expect("max-peers must be a valid integer");

    let bootnodes: Vec<Enode> = matches
        .get_many::<String>("bootnodes")
        .map(|values| {
            values
                .filter_map(|raw| match Enode::from_str(raw) {
                    Ok(enode) => Some(enode),
                    Err(err) => {
                        warn!(enode = raw, %err, "ignoring malformed bootnode");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    if bootnodes.is_empty() {
        warn!("no bootnodes configured, this node will not find peers on its own");
    }

    let private_key_path = matches
        .get_one::<String>("node-key")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("node.key"));

    let config = Config {
        listen_port,
        max_peers,
        bootnodes,
        private_key_path: private_key_path.clone(),
        network_id,
        data_dir: data_dir.clone(),
        ..Config::default()
    };

    let signer = load_or_create_signer(&private_key_path)?;
    let node_id = ferrum_p2p::rlpx::utils::node_id_from_signing_key(&signer);
    info!(%node_id, port = config.listen_port, "starting node");

    let chain = std::sync::Arc::new(StaticChainData {
        network_id: config.network_id,
        genesis_hash: ferrum_core::keccak256(b"ferrumd-mainnet-genesis"),
        best_hash: ferrum_core::keccak256(b"ferrumd-mainnet-genesis"),
        total_difficulty: U256::zero(),
        fork_id: ForkId {
            hash: [0u8; 4],
            next: 0,
        },
    });

    ferrum_p2p::start_network(signer, config, chain).await?;
    Ok(())
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", DEFAULT_APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".ferrumd"))
}

/// Loads the node's persistent identity from `path`, or generates and
/// persists a fresh one if it doesn't exist yet. The file holds the raw
/// 32-byte secp256k1 scalar, hex-encoded.
fn load_or_create_signer(path: &Path) -> anyhow::Result<SigningKey> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        let bytes = hex::decode(contents.trim())?;
        return Ok(SigningKey::from_slice(&bytes)?);
    }

    let signer = SigningKey::random(&mut OsRng);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, hex::encode(signer.to_bytes()))?;
    info!(?path, "generated new node key");
    Ok(signer)
}
