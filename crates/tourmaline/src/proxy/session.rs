// src/proxy/session.rs
//! Per-connection state machine.
//!
//! A session terminates the reliable layer on both sides of the proxy: it
//! acknowledges and de-duplicates what each peer sends, peers into batches,
//! performs the key-agreement handover at Login/ServerHandshake, and
//! re-originates everything toward the opposite peer under its own sequence
//! numbers and message indices.

use crate::bedrock::login::{
    self, LOGIN_ID, RESOURCE_PACK_RESPONSE_ID, SERVER_HANDSHAKE_ID,
};
use crate::bedrock::{
    BatchCodec, BatchPacket, JsonWebToken, LoginPacket, ResourcePackResponsePacket,
    ServerHandshakePacket, BATCH_ID,
};
use crate::crypto::{self, KeyPair};
use crate::error::{ProxyError, Result};
use crate::proxy::events::{BedrockEvent, DataEvent, DataOutEvent, EventBus, StateEvent};
use crate::proxy::listener::Listener;
use crate::proxy::Origin;
use crate::raknet::datagram::{FLAG_ACK, FLAG_NACK, FLAG_VALID};
use crate::raknet::offline::{OpenConnectionReply2, OpenConnectionRequest2};
use crate::raknet::reliability::{Admission, OutboundChannel, ReliableWindow, SplitHandler};
use crate::raknet::{AckNack, Datagram, EncapsulatedPacket, DISCONNECT_NOTIFICATION};
use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

/// Default MTU before the offline phase negotiates one.
pub const DEFAULT_MTU_SIZE: u16 = 1492;

/// Session lifecycle. Advances monotonically; the only way back to `Offline`
/// is the terminal `disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection openers pass through verbatim.
    Offline,
    /// The reliable layer is terminated and batches travel in plaintext.
    Online,
    /// Batches are wrapped by the per-direction ciphers.
    Encrypted,
}

/// Flow state tied to one peer: admission state for what it sends, stamping
/// counters for what the proxy sends back to it.
#[derive(Debug, Default)]
struct DirectionState {
    window: ReliableWindow,
    splits: SplitHandler,
    outbound: OutboundChannel,
}

/// One proxied connection, keyed by (client address, server address).
pub struct Session {
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    state: SessionState,
    mtu_size: u16,
    client: DirectionState,
    server: DirectionState,
    /// Ephemeral key pair generated at Login interception.
    key_pair: Option<KeyPair>,
    /// Base64 salt generated at Login interception.
    salt: Option<String>,
    /// Codec for batches exchanged with the client, installed at Login.
    client_batch: Option<BatchCodec>,
    /// Codec for batches exchanged with the server, installed at ServerHandshake.
    server_batch: Option<BatchCodec>,
    client_listener: Arc<dyn Listener>,
    server_listener: Arc<dyn Listener>,
    events: Arc<EventBus>,
}

impl Session {
    pub fn new(
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        mtu_size: u16,
        client_listener: Arc<dyn Listener>,
        server_listener: Arc<dyn Listener>,
        events: Arc<EventBus>,
    ) -> Self {
        debug!("[{}] New session toward {}", client_addr, server_addr);
        Self {
            client_addr,
            server_addr,
            state: SessionState::Offline,
            mtu_size,
            client: DirectionState::default(),
            server: DirectionState::default(),
            key_pair: None,
            salt: None,
            client_batch: None,
            server_batch: None,
            client_listener,
            server_listener,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mtu_size(&self) -> u16 {
        self.mtu_size
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// The base64 salt captured at Login, if the login has been seen.
    pub fn salt(&self) -> Option<&str> {
        self.salt.as_deref()
    }

    /// The proxy's ephemeral key pair, if the login has been seen.
    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.key_pair.as_ref()
    }

    /// Entry point for one UDP payload from either peer.
    pub async fn handle_data(&mut self, origin: Origin, data: Bytes) -> Result<()> {
        let events = self.events.clone();
        let Some(event) = events.emit_data_in(DataEvent { origin, data }).await else {
            trace!("[{}] data-in cancelled", self.client_addr);
            return Ok(());
        };
        let (origin, data) = (event.origin, event.data);
        if data.is_empty() {
            trace!("[{}] Ignoring empty payload from {}", self.client_addr, origin);
            return Ok(());
        }

        match self.state {
            SessionState::Offline => self.handle_offline(origin, data).await,
            SessionState::Online | SessionState::Encrypted => {
                self.handle_online(origin, data).await
            }
        }
    }

    /// Offline phase: everything passes through verbatim; the proxy only
    /// watches the connection openers for the MTU and the state edge.
    async fn handle_offline(&mut self, origin: Origin, data: Bytes) -> Result<()> {
        match data[0] {
            OpenConnectionRequest2::ID if origin == Origin::Client => {
                match OpenConnectionRequest2::decode(&mut data.clone()) {
                    Ok(request) => {
                        self.mtu_size = self.mtu_size.min(request.mtu_size);
                        debug!(
                            "[{}] Open2Request: mtu {} (session mtu now {})",
                            self.client_addr, request.mtu_size, self.mtu_size
                        );
                    }
                    Err(e) => warn!("[{}] Undecodable Open2Request: {}", self.client_addr, e),
                }
            }
            OpenConnectionReply2::ID if origin == Origin::Server => {
                match OpenConnectionReply2::decode(&mut data.clone()) {
                    Ok(reply) => {
                        debug!(
                            "[{}] Open2Reply: mtu {}, going online",
                            self.client_addr, reply.mtu_size
                        );
                        self.set_state(SessionState::Online).await;
                    }
                    Err(e) => warn!("[{}] Undecodable Open2Reply: {}", self.client_addr, e),
                }
            }
            _ => {}
        }
        self.send_raw(origin.opposite(), data).await
    }

    /// Online/Encrypted phase: dispatch on the RakNet header byte.
    async fn handle_online(&mut self, origin: Origin, data: Bytes) -> Result<()> {
        let flags = data[0];
        if flags & FLAG_VALID == 0 {
            trace!(
                "[{}] Ignoring non-datagram byte {:#04x} from {}",
                self.client_addr, flags, origin
            );
            return Ok(());
        }

        if flags & FLAG_ACK != 0 {
            // The proxy never retransmits, so acknowledgements of its own
            // datagrams are consumed here.
            let mut reader = data.slice(1..);
            match AckNack::decode(&mut reader, false) {
                Ok(ack) => trace!("[{}] ACK from {}: {:?}", self.client_addr, origin, ack.records),
                Err(e) => warn!("[{}] Undecodable ACK from {}: {}", self.client_addr, origin, e),
            }
            return Ok(());
        }

        if flags & FLAG_NACK != 0 {
            // Retransmission is the endpoints' job; NACKs are only logged.
            let mut reader = data.slice(1..);
            match AckNack::decode(&mut reader, true) {
                Ok(nack) => {
                    debug!("[{}] NACK from {}: {:?}", self.client_addr, origin, nack.records)
                }
                Err(e) => warn!("[{}] Undecodable NACK from {}: {}", self.client_addr, origin, e),
            }
            return Ok(());
        }

        let mut reader = data;
        let datagram = Datagram::decode(&mut reader)?;
        self.handle_datagram(origin, datagram).await
    }

    async fn handle_datagram(&mut self, origin: Origin, datagram: Datagram) -> Result<()> {
        trace!(
            "[{}] Datagram #{} from {} ({} packets)",
            self.client_addr,
            datagram.sequence_number,
            origin,
            datagram.packets.len()
        );

        // Acknowledge toward the datagram's origin before anything else.
        let ack = AckNack::ack_single(datagram.sequence_number);
        let mut writer = BytesMut::new();
        ack.encode(&mut writer)?;
        self.send_raw(origin, writer.freeze()).await?;

        for packet in datagram.packets {
            self.handle_encapsulated(origin, packet).await?;
        }
        Ok(())
    }

    async fn handle_encapsulated(
        &mut self,
        origin: Origin,
        mut packet: EncapsulatedPacket,
    ) -> Result<()> {
        if packet.is_split {
            match self.direction_mut(origin).splits.collect(&packet)? {
                Some(payload) => {
                    packet.buffer = payload;
                    packet.is_split = false;
                    packet.split_count = None;
                    packet.split_id = None;
                    packet.split_index = None;
                }
                None => return Ok(()),
            }
        }

        if packet.reliability.is_reliable() {
            let index = packet.message_index.ok_or(ProxyError::NoIndex)?;
            match self.direction_mut(origin).window.admit(index)? {
                Admission::Accepted => {}
                Admission::OutOfWindow => {
                    trace!(
                        "[{}] Dropping out-of-window index {} from {}",
                        self.client_addr, index, origin
                    );
                    return Ok(());
                }
            }
        }

        self.forward_payload(origin, packet).await
    }

    async fn forward_payload(&mut self, origin: Origin, packet: EncapsulatedPacket) -> Result<()> {
        match packet.buffer.first().copied() {
            Some(BATCH_ID) => self.forward_batch(origin, packet).await,
            Some(DISCONNECT_NOTIFICATION) => {
                debug!("[{}] Disconnect notification from {}", self.client_addr, origin);
                let payload = packet.buffer.clone();
                self.repackage(origin, &packet, payload).await?;
                self.disconnect().await;
                Ok(())
            }
            _ => {
                let payload = packet.buffer.clone();
                self.repackage(origin, &packet, payload).await
            }
        }
    }

    /// Unwraps a batch, runs every inner game packet through inspection and
    /// the bedrock hooks, re-packs and re-originates toward the opposite peer.
    ///
    /// The codec decision is pinned on entry: the handshake that flips the
    /// state to Encrypted must itself still leave in plaintext.
    async fn forward_batch(&mut self, origin: Origin, packet: EncapsulatedPacket) -> Result<()> {
        let events = self.events.clone();
        let encrypted = self.state == SessionState::Encrypted;

        let mut reader = packet.buffer.clone();
        let batch = if encrypted {
            self.codec_for(origin)?.decode(&mut reader)?
        } else {
            BatchPacket::decode(&mut reader)?
        };

        let mut outgoing = Vec::with_capacity(batch.packets.len());
        for payload in batch.packets {
            let Some(event) = events.emit_bedrock_in(BedrockEvent { origin, payload }).await else {
                trace!("[{}] bedrock-in cancelled", self.client_addr);
                continue;
            };

            let payload = match self.inspect_bedrock(origin, event.payload).await {
                Ok(payload) => payload,
                Err(e @ ProxyError::StateMismatch { .. }) => {
                    warn!("[{}] Dropping packet: {}", self.client_addr, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(event) = events.emit_bedrock_out(BedrockEvent { origin, payload }).await
            else {
                trace!("[{}] bedrock-out cancelled", self.client_addr);
                continue;
            };
            outgoing.push(event.payload);
        }

        if outgoing.is_empty() {
            return Ok(());
        }

        let out_batch = BatchPacket::new(outgoing);
        let bytes = if encrypted {
            self.codec_for(origin.opposite())?.encode(&out_batch)?
        } else {
            out_batch.encode()?
        };
        self.repackage(origin, &packet, bytes).await
    }

    /// Inspects one game packet, mutating it where the handover requires.
    async fn inspect_bedrock(&mut self, origin: Origin, payload: Bytes) -> Result<Bytes> {
        let id = login::packet_id(&payload)?;
        match id {
            LOGIN_ID if origin == Origin::Client => self.intercept_login(payload),
            SERVER_HANDSHAKE_ID if origin == Origin::Server => {
                self.intercept_handshake(payload).await
            }
            RESOURCE_PACK_RESPONSE_ID => {
                match ResourcePackResponsePacket::decode(&mut payload.clone()) {
                    Ok(response) => debug!(
                        "[{}] {} resource pack response: status {}, {} packs",
                        self.client_addr,
                        origin,
                        response.status,
                        response.pack_ids.len()
                    ),
                    Err(e) => warn!(
                        "[{}] Undecodable resource pack response: {}",
                        self.client_addr, e
                    ),
                }
                Ok(payload)
            }
            _ => Ok(payload),
        }
    }

    /// Substitutes the proxy's key into the client's login chain and derives
    /// the client-direction batch secret. The state does not change yet.
    fn intercept_login(&mut self, payload: Bytes) -> Result<Bytes> {
        if self.state != SessionState::Online {
            return Err(ProxyError::StateMismatch { packet: LOGIN_ID, state: self.state });
        }

        let mut login = LoginPacket::decode(&mut payload.clone())?;
        let key_pair = KeyPair::generate();
        let salt = crypto::random_salt();

        let last = login.tokens.last().ok_or_else(|| {
            ProxyError::Crypto("Login chain has no tokens".to_string())
        })?;
        let mut token = JsonWebToken::parse(last)?;
        let client_key_b64 = token.identity_public_key().ok_or_else(|| {
            ProxyError::Crypto("Login token carries no identityPublicKey".to_string())
        })?;
        let client_key = crypto::public_key_from_b64(client_key_b64)?;

        let secret = crypto::diffie_hellman(key_pair.secret_key(), &client_key, &salt)?;
        self.client_batch = Some(BatchCodec::new(secret));

        // The client now appears to authenticate with the proxy's key; both
        // the identity token and the client-data token get re-signed so the
        // chain stays consistent.
        token.payload["identityPublicKey"] = json!(key_pair.public_key_b64());
        let resigned = token.sign(&key_pair)?;
        if let Some(last) = login.tokens.last_mut() {
            *last = resigned;
        }
        let mut client_token = JsonWebToken::parse(&login.client)?;
        login.client = client_token.sign(&key_pair)?;

        let out = login.encode()?;
        debug!(
            "[{}] Login intercepted: key pair substituted, client batch keyed",
            self.client_addr
        );
        self.key_pair = Some(key_pair);
        self.salt = Some(salt);
        Ok(out)
    }

    /// Derives the server-direction batch secret from the server's handshake,
    /// swaps the salt for the proxy's own, and flips the state to Encrypted.
    async fn intercept_handshake(&mut self, payload: Bytes) -> Result<Bytes> {
        if self.state != SessionState::Online {
            return Err(ProxyError::StateMismatch { packet: SERVER_HANDSHAKE_ID, state: self.state });
        }

        let mut handshake = ServerHandshakePacket::decode(&mut payload.clone())?;
        let mut token = JsonWebToken::parse(&handshake.token)?;

        let server_key_b64 = token
            .x5u()
            .ok_or_else(|| ProxyError::Crypto("Handshake token carries no x5u".to_string()))?;
        let server_key = crypto::public_key_from_b64(server_key_b64)?;
        let server_salt = token
            .salt()
            .ok_or_else(|| ProxyError::Crypto("Handshake token carries no salt".to_string()))?
            .to_owned();

        let key_pair = self
            .key_pair
            .clone()
            .ok_or_else(|| ProxyError::Crypto("Handshake before login interception".to_string()))?;
        let proxy_salt = self
            .salt
            .clone()
            .ok_or_else(|| ProxyError::Crypto("Handshake before login interception".to_string()))?;

        let secret = crypto::diffie_hellman(key_pair.secret_key(), &server_key, &server_salt)?;
        self.server_batch = Some(BatchCodec::new(secret));

        // The client expects the salt it was promised at login, keyed to the
        // proxy's public key.
        token.payload["salt"] = json!(proxy_salt);
        handshake.token = token.sign(&key_pair)?;

        self.set_state(SessionState::Encrypted).await;
        debug!("[{}] Handshake intercepted: server batch keyed", self.client_addr);
        Ok(handshake.encode()?)
    }

    /// Re-frames `payload` toward the peer opposite `from`, splitting to the
    /// session MTU and stamping fresh indices.
    async fn repackage(
        &mut self,
        from: Origin,
        template: &EncapsulatedPacket,
        payload: Bytes,
    ) -> Result<()> {
        let dest = from.opposite();
        let mtu_size = self.mtu_size;
        let datagrams = self.direction_mut(dest).outbound.package(template, payload, mtu_size);
        for datagram in datagrams {
            let mut writer = BytesMut::new();
            datagram.encode(&mut writer)?;
            self.send_raw(dest, writer.freeze()).await?;
        }
        Ok(())
    }

    /// Emits `data-out` and delivers on the listener facing `toward`.
    async fn send_raw(&self, toward: Origin, data: Bytes) -> Result<()> {
        let to = match toward {
            Origin::Client => self.client_addr,
            Origin::Server => self.server_addr,
        };
        let Some(event) = self.events.emit_data_out(DataOutEvent { data, to: Some(to) }).await
        else {
            trace!("[{}] data-out cancelled", self.client_addr);
            return Ok(());
        };

        let to = event
            .to
            .ok_or_else(|| ProxyError::Event("data-out left no destination".to_string()))?;
        if event.data.is_empty() {
            return Err(ProxyError::Event("data-out produced an empty payload".to_string()));
        }

        let listener = match toward {
            Origin::Client => &self.client_listener,
            Origin::Server => &self.server_listener,
        };
        listener.send(event.data, to).await?;
        Ok(())
    }

    async fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!("[{}] State {:?} -> {:?}", self.client_addr, self.state, state);
        self.state = state;
        self.events.emit_state(StateEvent { state }).await;
    }

    /// Terminal teardown: back to Offline, server-facing listener closed.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Offline {
            return;
        }
        self.set_state(SessionState::Offline).await;
        self.server_listener.close();
        debug!("[{}] Session disconnected", self.client_addr);
    }

    fn direction_mut(&mut self, origin: Origin) -> &mut DirectionState {
        match origin {
            Origin::Client => &mut self.client,
            Origin::Server => &mut self.server,
        }
    }

    fn codec_for(&self, origin: Origin) -> Result<&BatchCodec> {
        let codec = match origin {
            Origin::Client => self.client_batch.as_ref(),
            Origin::Server => self.server_batch.as_ref(),
        };
        codec.ok_or_else(|| {
            ProxyError::Crypto(format!("No batch codec for the {} direction", origin))
        })
    }
}
