//! `ferrum-p2p`: the peer-to-peer transport and session layer — RLPx
//! (ECIES handshake, frame codec, Wire Protocol, ETH/68 sub-protocol),
//! discv4 discovery, and the peer pool that ties them together.

pub mod config;
pub mod discv4;
pub mod enode;
pub mod peer_pool;
pub mod persistence;
pub mod rlpx;

use std::net::SocketAddr;
use std::sync::Arc;

use ferrum_core::ChainDataSource;
use k256::ecdsa::SigningKey;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use config::Config;
use discv4::driver::DiscoveryDriver;
use enode::Enode;
use peer_pool::PeerPool;
use rlpx::{connection::RLPxConnection, p2p_messages::DisconnectReason};

/// Spawns the UDP discovery driver, the TCP listener, and the peer pool's
/// background tasks. Mirrors the teacher's `start_network` entry point: one
/// `tokio::spawn` per responsibility, communicating over channels rather than
/// shared mutable state, per the cooperative single-dispatcher contract.
pub async fn start_network(
    signer: SigningKey,
    config: Config,
    chain: Arc<dyn ChainDataSource>,
) -> std::io::Result<()> {
    let pool = Arc::new(PeerPool::new(config.clone()));

    let discovery = DiscoveryDriver::new(signer.clone(), config.clone(), pool.clone());
    let discovery_handle = tokio::spawn(async move {
        if let Err(err) = discovery.run().await {
            error!(%err, "discovery driver exited");
        }
    });

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    info!(port = config.listen_port, "RLPx listener bound");

    let accept_signer = signer.clone();
    let accept_config = config.clone();
    let accept_chain = chain.clone();
    let accept_pool = pool.clone();
    let accept_handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    spawn_inbound(
                        accept_signer.clone(),
                        accept_config.clone(),
                        accept_chain.clone(),
                        accept_pool.clone(),
                        stream,
                        addr,
                    );
                }
                Err(err) => warn!(%err, "failed to accept inbound connection"),
            }
        }
    });

    for bootnode in &config.bootnodes {
        pool.schedule_dial(*bootnode);
    }

    let mut dial_queue = pool.take_dial_queue();
    let dial_signer = signer.clone();
    let dial_config = config.clone();
    let dial_chain = chain.clone();
    let dial_pool = pool.clone();
    let dial_handle = tokio::spawn(async move {
        while let Some(enode) = dial_queue.recv().await {
            let addr = enode.tcp_addr();
            if !dial_pool.ready_to_dial(addr) {
                continue;
            }
            if !dial_pool.admit_outbound(addr) {
                continue;
            }
            let outcome = dial(
                dial_signer.clone(),
                dial_config.clone(),
                dial_chain.clone(),
                dial_pool.clone(),
                enode,
            )
            .await;
            match outcome {
                Ok(()) => dial_pool.dial_succeeded(addr),
                Err(err) => {
                    warn!(node_id = %enode.node_id, %err, "outbound dial failed");
                    dial_pool.dial_failed(addr);
                }
            }
            dial_pool.remove(addr);
        }
    });

    tokio::select! {
        _ = discovery_handle => {}
        _ = accept_handle => {}
        _ = dial_handle => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    Ok(())
}

fn spawn_inbound(
    signer: SigningKey,
    config: Config,
    chain: Arc<dyn ChainDataSource>,
    pool: Arc<PeerPool>,
    stream: TcpStream,
    addr: SocketAddr,
) {
    tokio::spawn(async move {
        if !pool.admit_inbound(addr) {
            warn!(%addr, "rejecting inbound connection, pool full");
            return;
        }
        let mut conn = RLPxConnection::receiver(signer, stream, chain, config);
        if let Err(err) = conn.handshake().await {
            warn!(%addr, %err, "inbound handshake failed");
            pool.remove(addr);
            return;
        }
        info!(%addr, "inbound peer established");
        let outbox = pool.register_sender(addr);
        if let Err(err) = conn.handle_peer(outbox).await {
            warn!(%addr, %err, "inbound peer session ended");
            let _ = conn.disconnect(DisconnectReason::SubprotocolError).await;
        }
        pool.remove(addr);
    });
}

/// Dials a single outbound peer by its enode address. Used by the peer pool's
/// dial queue; split out of `PeerPool` itself so the pool never touches a
/// socket directly (the single-owner rule of §5).
pub(crate) async fn dial(
    signer: SigningKey,
    config: Config,
    chain: Arc<dyn ChainDataSource>,
    pool: Arc<PeerPool>,
    enode: Enode,
) -> Result<(), rlpx::error::RLPxError> {
    let addr = enode.tcp_addr();
    let stream = tokio::time::timeout(config.dial_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| rlpx::error::RLPxError::EciesTimeout)?
        .map_err(|err| rlpx::error::RLPxError::ConnectionError(err.to_string()))?;

    let mut conn = RLPxConnection::initiator(signer, enode.node_id, stream, chain, config);
    conn.handshake().await?;
    let outbox = pool.register_sender(addr);
    conn.handle_peer(outbox).await
}
