//! The RLPx session state machine: ECIES handshake → Hello negotiation →
//! established ping/pong loop. One `RLPxConnection` owns exactly one TCP
//! stream; it is never shared across tasks (see the single-owner rule of
//! the concurrency model).

use std::sync::Arc;
use std::time::Instant;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::KeyIvInit;
use ethereum_types::{H256, H512};
use ferrum_core::ChainDataSource;
use ferrum_rlp::decode::RLPDecode;
use k256::{
    ecdsa::SigningKey,
    PublicKey, SecretKey,
};
use sha3::{Digest, Keccak256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    ecies::{
        decode_ack_message, decode_auth_message, encode_ack_message, encode_auth_message,
        retrieve_remote_ephemeral_key,
    },
    error::RLPxError,
    eth::status::StatusMessage,
    frame,
    message::Message,
    p2p_messages::{
        Capability, DisconnectMessage, DisconnectReason, HelloMessage, PingMessage, PongMessage,
        LOCAL_CLIENT_ID,
    },
    utils::{ecdh_xchng, id2pubkey},
};

const CAP_P2P: (Capability, u8) = (Capability::P2p, 5);
const CAP_ETH: (Capability, u8) = (Capability::Eth, 68);
const SUPPORTED_CAPABILITIES: [(Capability, u8); 2] = [CAP_P2P, CAP_ETH];

/// The maximum size of a pre-frame handshake message (auth/ack), mirroring
/// the devp2p reference client's buffer budget.
const MAX_HANDSHAKE_MSG_SIZE: usize = 2048;

pub(crate) type Aes256Ctr64BE = ctr::Ctr64BE<aes::Aes256>;

/// A live RLPx session over a TCP stream `S`. `S` is generic so tests can run
/// the whole handshake+Hello flow over an in-memory duplex pipe instead of a
/// real socket.
pub struct RLPxConnection<S> {
    signer: SigningKey,
    state: RLPxConnectionState,
    stream: S,
    chain: Arc<dyn ChainDataSource>,
    capabilities: Vec<(Capability, u8)>,
    config: crate::config::Config,
}

impl<S: AsyncWrite + AsyncRead + Unpin> RLPxConnection<S> {
    fn new(
        signer: SigningKey,
        stream: S,
        state: RLPxConnectionState,
        chain: Arc<dyn ChainDataSource>,
        config: crate::config::Config,
    ) -> Self {
        Self {
            signer,
            state,
            stream,
            chain,
            capabilities: vec![],
            config,
        }
    }

    /// Build a connection that will wait for an incoming auth message.
    pub fn receiver(
        signer: SigningKey,
        stream: S,
        chain: Arc<dyn ChainDataSource>,
        config: crate::config::Config,
    ) -> Self {
        let mut rng = rand::thread_rng();
        Self::new(
            signer,
            stream,
            RLPxConnectionState::Receiver(Receiver::new(
                H256::random_using(&mut rng),
                SecretKey::random(&mut rng),
            )),
            chain,
            config,
        )
    }

    /// Build a connection that will send the first auth message to `remote_node_id`.
    pub fn initiator(
        signer: SigningKey,
        remote_node_id: H512,
        stream: S,
        chain: Arc<dyn ChainDataSource>,
        config: crate::config::Config,
    ) -> Self {
        let mut rng = rand::thread_rng();
        let state = RLPxConnectionState::Initiator(Initiator::new(
            H256::random_using(&mut rng),
            SecretKey::random(&mut rng),
            remote_node_id,
        ));
        Self::new(signer, stream, state, chain, config)
    }

    pub async fn handshake(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Initiator(_) => {
                self.send_auth().await?;
                self.receive_ack().await?;
            }
            RLPxConnectionState::Receiver(_) => {
                self.receive_auth().await?;
                self.send_ack().await?;
            }
            _ => return Err(RLPxError::InvalidState),
        };
        debug!("ECIES handshake complete");

        self.exchange_hello_messages().await?;
        Ok(())
    }

    pub async fn exchange_hello_messages(&mut self) -> Result<(), RLPxError> {
        let hello_msg = Message::Hello(HelloMessage::new(
            SUPPORTED_CAPABILITIES.to_vec(),
            PublicKey::from(*self.signer.verifying_key()),
        ));
        self.send(&hello_msg).await?;

        match self.receive().await? {
            Message::Hello(hello_message) => {
                self.capabilities = hello_message
                    .capabilities
                    .into_iter()
                    .filter(|cap| SUPPORTED_CAPABILITIES.contains(cap))
                    .collect();

                if self.capabilities.is_empty() {
                    return Err(RLPxError::HandshakeError(
                        "no matching capabilities".to_string(),
                    ));
                }
                info!(client_id = LOCAL_CLIENT_ID, "Hello exchanged");
                Ok(())
            }
            other => Err(RLPxError::HandshakeError(format!(
                "expected Hello, got {other}"
            ))),
        }
    }

    /// Sends the local `Status` if `eth` was negotiated, then runs the
    /// ping/pong liveness loop until the peer disconnects, goes quiet past
    /// `inactivity_timeout`, or a protocol error occurs. `outbox` carries
    /// messages the peer pool wants broadcast to this peer (see
    /// `PeerPool::register_sender`); it is drained alongside the session's
    /// own ingress so a broadcast never has to wait for the next ping tick.
    pub async fn handle_peer(
        &mut self,
        mut outbox: mpsc::Receiver<Arc<Message>>,
    ) -> Result<(), RLPxError> {
        if self.capabilities.contains(&CAP_ETH) {
            self.send_status().await?;
        }

        let mut last_ingress = Instant::now();

        loop {
            tokio::select! {
                received = tokio::time::timeout(self.config.ping_interval, self.receive()) => {
                    match received {
                        Err(_elapsed) => {
                            if last_ingress.elapsed() >= self.config.inactivity_timeout {
                                info!("no ingress past inactivityTimeout, disconnecting");
                                self.disconnect(DisconnectReason::TimeoutReceiving).await?;
                                return Ok(());
                            }
                            self.send(&Message::Ping(PingMessage)).await?;
                            debug!("Ping sent (idle timeout)");
                        }
                        Ok(message) => {
                            last_ingress = Instant::now();
                            match message? {
                                Message::Disconnect(msg) => {
                                    info!(reason = ?msg.reason, "Peer disconnected");
                                    return Ok(());
                                }
                                Message::Ping(_) => {
                                    self.send(&Message::Pong(PongMessage)).await?;
                                }
                                Message::Pong(_) => {}
                                Message::Status(status) => {
                                    if let Err(RLPxError::Disconnect(reason)) = self.validate_status(&status) {
                                        self.disconnect(reason).await?;
                                        return Ok(());
                                    }
                                }
                                Message::Eth { relative_code, .. } => {
                                    debug!(relative_code, "eth message received, routed opaquely");
                                }
                                Message::Hello(_) => {
                                    return Err(RLPxError::HandshakeError(
                                        "unexpected Hello after session established".to_string(),
                                    ))
                                }
                            }
                        }
                    }
                }
                broadcasted = outbox.recv() => {
                    match broadcasted {
                        Some(message) => self.send(message.as_ref()).await?,
                        None => {
                            debug!("peer outbox closed, ending session");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Checks the peer's `Status` against our own chain view. On mismatch,
    /// returns the specific `DisconnectReason` the devp2p spec mandates for
    /// it rather than a generic handshake error, so the caller can send the
    /// right code on the wire instead of falling back to `SubprotocolError`.
    fn validate_status(&self, status: &StatusMessage) -> Result<(), RLPxError> {
        if status.network_id != self.chain.network_id() || status.genesis != self.chain.genesis_hash() {
            return Err(RLPxError::Disconnect(DisconnectReason::UselessPeer));
        }
        if status.fork_id != self.chain.fork_id() {
            warn!("fork id mismatch on Status, treating as IncompatibleP2PProtocolVersion");
            return Err(RLPxError::Disconnect(DisconnectReason::IncompatibleP2PProtocolVersion));
        }
        Ok(())
    }

    async fn send_status(&mut self) -> Result<(), RLPxError> {
        let status = StatusMessage {
            eth_version: (CAP_ETH.1) as u32,
            network_id: self.chain.network_id(),
            total_difficulty: self.chain.total_difficulty(),
            block_hash: self.chain.best_hash(),
            genesis: self.chain.genesis_hash(),
            fork_id: self.chain.fork_id(),
        };
        self.send(&Message::Status(status)).await
    }

    pub async fn disconnect(&mut self, reason: DisconnectReason) -> Result<(), RLPxError> {
        self.send(&Message::Disconnect(DisconnectMessage::new(Some(reason))))
            .await
    }

    pub fn remote_node_id(&self) -> Result<H512, RLPxError> {
        match &self.state {
            RLPxConnectionState::Established(state) => Ok(state.remote_node_id),
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn send_auth(&mut self) -> Result<(), RLPxError> {
        let RLPxConnectionState::Initiator(initiator_state) = &self.state else {
            return Err(RLPxError::InvalidState);
        };
        let secret_key: SecretKey = self.signer.clone().into();
        let peer_pk =
            id2pubkey(initiator_state.remote_node_id).ok_or(RLPxError::InvalidPeerId)?;
        let previous_state = initiator_state.clone();

        let msg = encode_auth_message(
            &secret_key,
            previous_state.nonce,
            &peer_pk,
            &previous_state.ephemeral_key,
        )?;

        self.send_handshake_msg(&msg).await?;
        self.state = RLPxConnectionState::InitiatedAuth(InitiatedAuth::new(previous_state, msg));
        Ok(())
    }

    async fn send_ack(&mut self) -> Result<(), RLPxError> {
        let RLPxConnectionState::ReceivedAuth(received_auth_state) = &self.state else {
            return Err(RLPxError::InvalidState);
        };
        let peer_pk =
            id2pubkey(received_auth_state.remote_node_id).ok_or(RLPxError::InvalidPeerId)?;
        let previous_state = received_auth_state.clone();

        let msg = encode_ack_message(
            &previous_state.local_ephemeral_key,
            previous_state.local_nonce,
            &peer_pk,
        )?;

        self.send_handshake_msg(&msg).await?;
        self.state = RLPxConnectionState::Established(Box::new(Established::for_receiver(
            previous_state,
            msg,
        )));
        Ok(())
    }

    async fn receive_auth(&mut self) -> Result<(), RLPxError> {
        let RLPxConnectionState::Receiver(receiver_state) = &self.state else {
            return Err(RLPxError::InvalidState);
        };
        let secret_key: SecretKey = self.signer.clone().into();
        let previous_state = receiver_state.clone();
        let msg_bytes = self.receive_handshake_msg().await?;
        let size_data = msg_bytes.get(..2).ok_or(RLPxError::InvalidMessageLength)?;
        let msg = msg_bytes.get(2..).ok_or(RLPxError::InvalidMessageLength)?;
        let (auth, remote_static_pubkey) = decode_auth_message(&secret_key, msg, size_data)?;
        let remote_ephemeral_key =
            retrieve_remote_ephemeral_key(&secret_key, &remote_static_pubkey, auth.nonce, &auth)?;

        self.state = RLPxConnectionState::ReceivedAuth(ReceivedAuth::new(
            previous_state,
            auth.node_id,
            msg_bytes,
            auth.nonce,
            remote_ephemeral_key,
        ));
        Ok(())
    }

    async fn receive_ack(&mut self) -> Result<(), RLPxError> {
        let RLPxConnectionState::InitiatedAuth(initiated_auth_state) = &self.state else {
            return Err(RLPxError::InvalidState);
        };
        let secret_key: SecretKey = self.signer.clone().into();
        let previous_state = initiated_auth_state.clone();
        let msg_bytes = self.receive_handshake_msg().await?;
        let size_data = msg_bytes.get(..2).ok_or(RLPxError::InvalidMessageLength)?;
        let msg = msg_bytes.get(2..).ok_or(RLPxError::InvalidMessageLength)?;
        let ack = decode_ack_message(&secret_key, msg, size_data)?;
        let remote_ephemeral_key = ack
            .get_ephemeral_pubkey()
            .ok_or(RLPxError::NotFound)?;

        self.state = RLPxConnectionState::Established(Box::new(Established::for_initiator(
            previous_state,
            msg_bytes,
            ack.nonce,
            remote_ephemeral_key,
        )));
        Ok(())
    }

    async fn send_handshake_msg(&mut self, msg: &[u8]) -> Result<(), RLPxError> {
        self.stream
            .write_all(msg)
            .await
            .map_err(|err| RLPxError::ConnectionError(err.to_string()))
    }

    async fn receive_handshake_msg(&mut self) -> Result<Vec<u8>, RLPxError> {
        let mut buf = vec![0u8; MAX_HANDSHAKE_MSG_SIZE];

        self.stream
            .read_exact(&mut buf[..2])
            .await
            .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;
        let msg_size = u16::from_be_bytes([buf[0], buf[1]]) as usize;

        if msg_size + 2 > buf.len() {
            return Err(RLPxError::InvalidMessageLength);
        }
        self.stream
            .read_exact(&mut buf[2..msg_size + 2])
            .await
            .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;
        Ok(buf[..msg_size + 2].to_vec())
    }

    async fn send(&mut self, message: &Message) -> Result<(), RLPxError> {
        let RLPxConnectionState::Established(state) = &mut self.state else {
            return Err(RLPxError::InvalidState);
        };
        let mut frame_buffer = vec![];
        message.encode(&mut frame_buffer)?;
        frame::write(frame_buffer, state, &mut self.stream).await
    }

    async fn receive(&mut self) -> Result<Message, RLPxError> {
        let RLPxConnectionState::Established(state) = &mut self.state else {
            return Err(RLPxError::InvalidState);
        };
        let frame_data = frame::read(state, &mut self.stream).await?;
        let (msg_id, msg_data): (u8, &[u8]) = RLPDecode::decode_unfinished(&frame_data)?;
        Message::decode(msg_id, msg_data).map_err(RLPxError::from)
    }
}

enum RLPxConnectionState {
    Initiator(Initiator),
    Receiver(Receiver),
    ReceivedAuth(ReceivedAuth),
    InitiatedAuth(InitiatedAuth),
    Established(Box<Established>),
}

#[derive(Clone)]
struct Receiver {
    nonce: H256,
    ephemeral_key: SecretKey,
}

impl Receiver {
    fn new(nonce: H256, ephemeral_key: SecretKey) -> Self {
        Self {
            nonce,
            ephemeral_key,
        }
    }
}

#[derive(Clone)]
struct Initiator {
    nonce: H256,
    ephemeral_key: SecretKey,
    remote_node_id: H512,
}

impl Initiator {
    fn new(nonce: H256, ephemeral_key: SecretKey, remote_node_id: H512) -> Self {
        Self {
            nonce,
            ephemeral_key,
            remote_node_id,
        }
    }
}

#[derive(Clone)]
struct ReceivedAuth {
    local_nonce: H256,
    local_ephemeral_key: SecretKey,
    remote_node_id: H512,
    remote_nonce: H256,
    remote_ephemeral_key: PublicKey,
    remote_init_message: Vec<u8>,
}

impl ReceivedAuth {
    fn new(
        previous_state: Receiver,
        remote_node_id: H512,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        Self {
            local_nonce: previous_state.nonce,
            local_ephemeral_key: previous_state.ephemeral_key,
            remote_node_id,
            remote_nonce,
            remote_ephemeral_key,
            remote_init_message,
        }
    }
}

#[derive(Clone)]
struct InitiatedAuth {
    remote_node_id: H512,
    local_nonce: H256,
    local_ephemeral_key: SecretKey,
    local_init_message: Vec<u8>,
}

impl InitiatedAuth {
    fn new(previous_state: Initiator, local_init_message: Vec<u8>) -> Self {
        Self {
            remote_node_id: previous_state.remote_node_id,
            local_nonce: previous_state.nonce,
            local_ephemeral_key: previous_state.ephemeral_key,
            local_init_message,
        }
    }
}

/// Derived session secrets plus the running MAC/cipher state, per `EciesSession`.
/// Built once during the handshake, read-only afterwards; dropped (and so
/// zeroed) when the connection closes.
pub struct Established {
    pub remote_node_id: H512,
    pub(crate) mac_key: H256,
    pub ingress_mac: Keccak256,
    pub egress_mac: Keccak256,
    pub ingress_aes: Aes256Ctr64BE,
    pub egress_aes: Aes256Ctr64BE,
}

impl Established {
    fn for_receiver(previous_state: ReceivedAuth, init_message: Vec<u8>) -> Self {
        let hashed_nonces = Keccak256::digest(
            [
                previous_state.local_nonce.as_bytes(),
                previous_state.remote_nonce.as_bytes(),
            ]
            .concat(),
        )
        .into();

        Self::new(
            previous_state.remote_node_id,
            init_message,
            previous_state.local_nonce,
            previous_state.local_ephemeral_key,
            hashed_nonces,
            previous_state.remote_init_message,
            previous_state.remote_nonce,
            previous_state.remote_ephemeral_key,
        )
    }

    fn for_initiator(
        previous_state: InitiatedAuth,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        let hashed_nonces = Keccak256::digest(
            [remote_nonce.as_bytes(), previous_state.local_nonce.as_bytes()].concat(),
        )
        .into();

        Self::new(
            previous_state.remote_node_id,
            previous_state.local_init_message,
            previous_state.local_nonce,
            previous_state.local_ephemeral_key,
            hashed_nonces,
            remote_init_message,
            remote_nonce,
            remote_ephemeral_key,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        remote_node_id: H512,
        local_init_message: Vec<u8>,
        local_nonce: H256,
        local_ephemeral_key: SecretKey,
        hashed_nonces: [u8; 32],
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        let ephemeral_key_secret = ecdh_xchng(&local_ephemeral_key, &remote_ephemeral_key);

        let shared_secret =
            Keccak256::digest([ephemeral_key_secret, hashed_nonces].concat()).into();
        let aes_key: [u8; 32] =
            Keccak256::digest([ephemeral_key_secret, shared_secret].concat()).into();
        let mac_key: [u8; 32] =
            Keccak256::digest([ephemeral_key_secret, aes_key].concat()).into();
        let mac_key = H256(mac_key);

        let egress_mac = Keccak256::default()
            .chain_update((mac_key ^ remote_nonce).as_bytes())
            .chain_update(&local_init_message);

        let ingress_mac = Keccak256::default()
            .chain_update((mac_key ^ local_nonce).as_bytes())
            .chain_update(&remote_init_message);

        let ingress_aes = <Aes256Ctr64BE as KeyIvInit>::new(
            GenericArray::from_slice(&aes_key),
            GenericArray::from_slice(&[0u8; 16]),
        );
        let egress_aes = ingress_aes.clone();

        Self {
            remote_node_id,
            mac_key,
            ingress_mac,
            egress_mac,
            ingress_aes,
            egress_aes,
        }
    }
}
