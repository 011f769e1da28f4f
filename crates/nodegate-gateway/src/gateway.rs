//! Handshake state machine for one node-to-node session.
//!
//! The embedding transport owns the socket and drives the session with two
//! calls: [`Gateway::get_message`] produces the next message to send, and
//! [`Gateway::process_message`] consumes one received message.
//!
//! # Handshake
//!
//! ```text
//! A                                                B
//! | INITIAL (group, node, timestamp, modulus) ---> |
//! | <--- INITIAL                                   |
//! | EXCHANGE_STREAM (seed sealed to B) ----------> |
//! | <--- EXCHANGE_STREAM (seed sealed to A)        |
//! | SIGN (encrypted, signed binding) ------------> |
//! | <--- SIGN                                      |
//! | [CONFIRM_OLD when A still trusts B's old key]  |
//! | PING / DATA <--------------------------------> |
//! ```
//!
//! Which message goes out next depends on the status byte the peer last
//! reported, so a lost message is simply produced again on the next poll.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use nodegate_core::status::{
    self, BASIC_ERROR, CONFIRM_ERROR, ESTABLISHED, ESTABLISHING_STREAM, PEER_UNKNOWN,
    PERMANENT_ERROR, SETTINGS_EXCHANGED, SIGNING, STREAM_ESTABLISHED, TIMEOUT_ERROR, UNCONNECTED,
};
use nodegate_core::{
    InitialPayload, Message, MessageType, NodeName, SignedBlock, StreamExchange, WireError,
};
use nodegate_crypto::{AlgorithmSuite, CipherError, Decrypter, Encrypter, Identity, Modulus};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::identity::LocalIdentity;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Our half of the stream: the encrypter plus the cached `EXCHANGE_STREAM`
/// payload that carries its sealed seed.
struct OutboundStream {
    encrypter: Encrypter,
    exchange: Bytes,
}

#[derive(Debug, Clone, Copy)]
struct PeerInfo {
    node: NodeName,
    timestamp: u64,
}

struct Liveness {
    last_at: Instant,
    last_type: Option<MessageType>,
}

/// One end of a node-to-node secure channel.
pub struct Gateway {
    config: GatewayConfig,
    suite: AlgorithmSuite,
    local: LocalIdentity,

    /// Timestamp announced in our `INITIAL`; fixed for the session.
    local_timestamp: AtomicU64,
    local_status: AtomicU8,
    peer_status: AtomicU8,
    signed: AtomicBool,
    error: AtomicBool,
    timed_out: AtomicBool,
    crypto_error: AtomicBool,

    crypto_error_at: Mutex<Option<Instant>>,
    outbound: Mutex<Option<OutboundStream>>,
    inbound: Mutex<Option<Decrypter>>,
    peer: Mutex<Option<PeerInfo>>,
    peer_key: Mutex<Option<Modulus>>,
    old_peer_key: Mutex<Option<Modulus>>,
    liveness: Mutex<Liveness>,
}

impl Gateway {
    /// Create a session using the algorithms named by `config`.
    pub fn new(config: GatewayConfig, local: LocalIdentity) -> Self {
        let suite = config.suite();
        Self::with_suite(config, suite, local)
    }

    /// Create a session with an explicit algorithm suite.
    pub fn with_suite(config: GatewayConfig, suite: AlgorithmSuite, local: LocalIdentity) -> Self {
        debug!(
            group = %local.group(),
            node = %local.node(),
            cipher = ?suite.cipher(),
            "gateway created"
        );

        Self {
            config,
            suite,
            local,
            local_timestamp: AtomicU64::new(unix_now()),
            local_status: AtomicU8::new(UNCONNECTED),
            peer_status: AtomicU8::new(UNCONNECTED),
            signed: AtomicBool::new(false),
            error: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            crypto_error: AtomicBool::new(false),
            crypto_error_at: Mutex::new(None),
            outbound: Mutex::new(None),
            inbound: Mutex::new(None),
            peer: Mutex::new(None),
            peer_key: Mutex::new(None),
            old_peer_key: Mutex::new(None),
            liveness: Mutex::new(Liveness {
                last_at: Instant::now(),
                last_type: None,
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    /// Handshake progress, ignoring error flags.
    pub fn local_status(&self) -> u8 {
        self.local_status.load(Ordering::SeqCst)
    }

    /// Status byte the peer last reported.
    pub fn peer_status(&self) -> u8 {
        self.peer_status.load(Ordering::SeqCst)
    }

    /// Status byte placed in outbound messages.
    pub fn current_status(&self) -> u8 {
        if self.crypto_error.load(Ordering::SeqCst) {
            CONFIRM_ERROR
        } else if self.timed_out.load(Ordering::SeqCst) {
            TIMEOUT_ERROR
        } else if self.error.load(Ordering::SeqCst) {
            BASIC_ERROR
        } else {
            self.local_status()
        }
    }

    /// Whether application data can flow in both directions.
    pub fn connected(&self) -> bool {
        self.signed.load(Ordering::SeqCst)
            && !self.in_error()
            && (ESTABLISHED..CONFIRM_ERROR).contains(&self.peer_status())
    }

    pub fn is_signed(&self) -> bool {
        self.signed.load(Ordering::SeqCst)
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    pub fn has_crypto_error(&self) -> bool {
        self.crypto_error.load(Ordering::SeqCst)
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    fn in_error(&self) -> bool {
        self.has_error() || self.is_timed_out() || self.has_crypto_error()
    }

    pub fn peer_node(&self) -> Option<NodeName> {
        (*lock(&self.peer)).map(|peer| peer.node)
    }

    pub fn peer_key(&self) -> Option<Modulus> {
        lock(&self.peer_key).clone()
    }

    pub fn old_peer_key(&self) -> Option<Modulus> {
        lock(&self.old_peer_key).clone()
    }

    pub fn last_message_type(&self) -> Option<MessageType> {
        lock(&self.liveness).last_type
    }

    /// Time since the last message was accepted from the peer.
    pub fn time_since_last_message(&self) -> Duration {
        lock(&self.liveness).last_at.elapsed()
    }

    // ---------------------------------------------------------------------
    // Administrative hooks
    // ---------------------------------------------------------------------

    /// Register the key the peer held before its last rotation. The next
    /// handshake additionally requires a signature made with it.
    pub fn push_old_key(&self, modulus: Modulus) {
        info!(bytes = modulus.len(), "registered previous peer key");
        *lock(&self.old_peer_key) = Some(modulus);
    }

    pub fn clear_old_key(&self) {
        *lock(&self.old_peer_key) = None;
    }

    /// Put the session into the error state; the peer is asked to restart.
    pub fn force_error(&self) {
        warn!("error forced by operator");
        self.error.store(true, Ordering::SeqCst);
    }

    /// Raise a crypto error as if verification had failed.
    pub fn force_crypto_error(&self) {
        self.raise_crypto_error("forced by operator");
    }

    /// Record that the caller's transport timed out waiting for the peer.
    pub fn mark_timed_out(&self) {
        warn!(
            idle_ms = self.time_since_last_message().as_millis() as u64,
            "peer timed out"
        );
        self.timed_out.store(true, Ordering::SeqCst);
    }

    /// Drop all session state and start over.
    ///
    /// The local identity and any registered old peer key survive; our
    /// `INITIAL` timestamp moves forward so the peer sees a new session.
    pub fn reset(&self) {
        self.local_status.store(UNCONNECTED, Ordering::SeqCst);
        self.peer_status.store(UNCONNECTED, Ordering::SeqCst);
        self.signed.store(false, Ordering::SeqCst);
        self.error.store(false, Ordering::SeqCst);
        self.timed_out.store(false, Ordering::SeqCst);
        self.crypto_error.store(false, Ordering::SeqCst);

        *lock(&self.crypto_error_at) = None;
        *lock(&self.outbound) = None;
        *lock(&self.inbound) = None;
        *lock(&self.peer) = None;
        *lock(&self.peer_key) = None;

        let previous = self.local_timestamp.load(Ordering::SeqCst);
        self.local_timestamp
            .store(unix_now().max(previous + 1), Ordering::SeqCst);

        debug!(node = %self.local.node(), "session reset");
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    /// The next message to send.
    ///
    /// Always yields something: if the handshake message cannot be built the
    /// failure is logged and an `ERROR` is sent instead.
    pub fn get_message(&self) -> Message {
        self.expire_crypto_error();

        if self.has_crypto_error() {
            return Message::control(MessageType::CryptoError, self.current_status());
        }
        if self.has_error() || self.is_timed_out() {
            return Message::control(MessageType::Error, self.current_status());
        }

        let built = match self.peer_status() {
            UNCONNECTED => Ok(self.initial_message()),
            PEER_UNKNOWN | SETTINGS_EXCHANGED | ESTABLISHING_STREAM => {
                if lock(&self.peer_key).is_some() {
                    self.exchange_message()
                } else {
                    Ok(self.initial_message())
                }
            }
            STREAM_ESTABLISHED | SIGNING => {
                self.signed_message(MessageType::Sign, self.local.identity())
            }
            status::CONFIRM_OLD => match self.local.previous() {
                Some(previous) => self.signed_message(MessageType::ConfirmOld, previous),
                None => Err(GatewayError::NoPreviousIdentity),
            },
            ESTABLISHED => Ok(Message::control(MessageType::Ping, self.current_status())),
            PERMANENT_ERROR => Ok(Message::control(
                MessageType::ErrorConfirm,
                self.current_status(),
            )),
            other => {
                debug!(peer_status = status::describe(other), "peer is in an error state");
                Ok(Message::control(MessageType::Error, self.current_status()))
            }
        };

        built.unwrap_or_else(|err| {
            warn!(error = %err, "could not build handshake message");
            Message::control(MessageType::Error, self.current_status())
        })
    }

    /// Encrypt an application payload into a `DATA` message.
    pub fn data_message(&self, payload: &[u8]) -> Result<Message, GatewayError> {
        if !self.is_signed() {
            return Err(GatewayError::NotSigned);
        }
        if self.in_error() {
            return Err(GatewayError::Degraded);
        }

        let (ciphertext, tag) = {
            let mut outbound = lock(&self.outbound);
            let stream = outbound.as_mut().ok_or(GatewayError::NoStream)?;
            stream.encrypter.send_data(payload)?
        };
        Ok(Message::with_tag(
            MessageType::Data,
            self.current_status(),
            tag,
            ciphertext,
        ))
    }

    fn initial_message(&self) -> Message {
        let payload = InitialPayload {
            group: self.local.group(),
            node: self.local.node(),
            timestamp: self.local_timestamp.load(Ordering::SeqCst),
            modulus: Bytes::copy_from_slice(self.local.modulus().as_bytes()),
        };
        Message::new(MessageType::Initial, self.current_status(), payload.encode())
    }

    fn exchange_message(&self) -> Result<Message, GatewayError> {
        let peer_key = self
            .peer_key()
            .ok_or_else(|| GatewayError::protocol("peer key unknown"))?;

        let exchange = {
            let mut outbound = lock(&self.outbound);
            match outbound.as_ref() {
                Some(stream) => stream.exchange.clone(),
                None => {
                    let seed = self.suite.generate_seed();
                    let sealed = self.local.identity().encrypt_for(&seed, &peer_key)?;
                    let encrypter = self.suite.encrypter(&seed)?;
                    let exchange = StreamExchange {
                        cipher: self.suite.cipher().id(),
                        sealed: Bytes::from(sealed),
                    }
                    .encode();

                    debug!(cipher = ?self.suite.cipher(), "stream seed sealed for peer");
                    *outbound = Some(OutboundStream {
                        encrypter,
                        exchange: exchange.clone(),
                    });
                    exchange
                }
            }
        };

        if self.local_status() == SETTINGS_EXCHANGED {
            self.advance(ESTABLISHING_STREAM);
        }

        Ok(Message::new(
            MessageType::ExchangeStream,
            self.current_status(),
            exchange,
        ))
    }

    fn signed_message(
        &self,
        kind: MessageType,
        signer: &dyn Identity,
    ) -> Result<Message, GatewayError> {
        let peer = (*lock(&self.peer)).ok_or_else(|| GatewayError::protocol("peer unknown"))?;
        let local_timestamp = self.local_timestamp.load(Ordering::SeqCst);

        let binding =
            SignedBlock::binding(local_timestamp, peer.timestamp, &self.local.node(), &peer.node);
        let signature = signer.sign(&self.suite.digest().hash(&binding))?;
        let block = SignedBlock {
            sender_timestamp: local_timestamp,
            receiver_timestamp: peer.timestamp,
            signature: Bytes::from(signature),
        }
        .encode();

        let (ciphertext, tag) = {
            let mut outbound = lock(&self.outbound);
            let stream = outbound.as_mut().ok_or(GatewayError::NoStream)?;
            stream.encrypter.send_data(&block)?
        };
        Ok(Message::with_tag(kind, self.current_status(), tag, ciphertext))
    }

    // ---------------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------------

    /// Consume one message from the peer.
    ///
    /// Returns the plaintext of an accepted `DATA` message, `None` for any
    /// other accepted message.
    pub fn process_message(&self, message: &Message) -> Result<Option<Bytes>, GatewayError> {
        self.expire_crypto_error();

        let kind = message.kind();
        if kind.is_error_family() {
            self.handle_error_message(message);
            return Ok(None);
        }

        if self.in_error() {
            debug!(kind = ?kind, "dropping message while in error state");
            return Err(GatewayError::Degraded);
        }

        let delivered = match kind {
            MessageType::Initial => {
                self.handle_initial(message)?;
                None
            }
            MessageType::ExchangeStream => {
                self.handle_exchange(message)?;
                None
            }
            MessageType::Sign | MessageType::ConfirmOld => {
                self.handle_signed(message)?;
                None
            }
            MessageType::Ping => None,
            MessageType::Data => Some(self.handle_data(message)?),
            MessageType::CryptoError | MessageType::ErrorConfirm | MessageType::Error => None,
        };

        self.record(message);
        self.promote(message.status());
        Ok(delivered)
    }

    fn handle_error_message(&self, message: &Message) {
        let peer_status = status::describe(message.status());
        match message.kind() {
            MessageType::CryptoError => {
                info!(peer_status, "peer reported a crypto error, restarting");
                self.reset();
                self.record(message);
            }
            MessageType::ErrorConfirm => {
                info!(peer_status, "peer confirmed the error, restarting");
                self.reset();
                self.record(message);
            }
            _ => {
                info!(peer_status, "peer reported an error, restarting");
                self.reset();
                self.record(message);
                self.peer_status.store(PERMANENT_ERROR, Ordering::SeqCst);
            }
        }
    }

    fn handle_initial(&self, message: &Message) -> Result<(), GatewayError> {
        let initial = InitialPayload::decode(message.payload().clone())?;
        if initial.group != self.local.group() {
            return Err(GatewayError::protocol(format!(
                "peer group {} does not match {}",
                initial.group,
                self.local.group()
            )));
        }
        let modulus = Modulus::from_bytes(&initial.modulus);

        let known = *lock(&self.peer);
        if let Some(peer) = known {
            let same_key = lock(&self.peer_key).as_ref() == Some(&modulus);
            if peer.node != initial.node || !same_key {
                self.error.store(true, Ordering::SeqCst);
                warn!(
                    expected = %peer.node,
                    received = %initial.node,
                    same_key,
                    "peer identity changed mid-session"
                );
                return Err(GatewayError::IdentityMismatch(format!(
                    "INITIAL from {} does not match {}",
                    initial.node, peer.node
                )));
            }

            if initial.timestamp == peer.timestamp {
                return Ok(());
            }
            if initial.timestamp < peer.timestamp {
                self.error.store(true, Ordering::SeqCst);
                warn!(
                    peer = %peer.node,
                    replayed = initial.timestamp,
                    current = peer.timestamp,
                    "replayed INITIAL rejected"
                );
                return Err(GatewayError::ReplayedInitial {
                    timestamp: initial.timestamp,
                    current: peer.timestamp,
                });
            }
        }

        let skew = unix_now().abs_diff(initial.timestamp);
        if skew > self.config.max_clock_skew_secs {
            self.error.store(true, Ordering::SeqCst);
            warn!(peer = %initial.node, skew, "stale INITIAL rejected");
            return Err(GatewayError::StaleInitial { skew });
        }

        if let Some(peer) = known {
            info!(peer = %peer.node, "peer started a new session");
            self.reset();
        }

        debug!(peer = %initial.node, key_bytes = modulus.len(), "peer identity accepted");
        *lock(&self.peer) = Some(PeerInfo {
            node: initial.node,
            timestamp: initial.timestamp,
        });
        *lock(&self.peer_key) = Some(modulus);
        self.advance(PEER_UNKNOWN);
        Ok(())
    }

    fn handle_exchange(&self, message: &Message) -> Result<(), GatewayError> {
        let mut inbound = lock(&self.inbound);
        if inbound.is_some() {
            debug!("duplicate stream exchange ignored");
            return Ok(());
        }
        if self.local_status() < PEER_UNKNOWN {
            return Err(GatewayError::protocol("stream exchange before INITIAL"));
        }

        let exchange = StreamExchange::decode(message.payload().clone())?;
        if exchange.cipher != self.suite.cipher().id() {
            self.error.store(true, Ordering::SeqCst);
            warn!(
                local = self.suite.cipher().id(),
                peer = exchange.cipher,
                "peer announced a different cipher"
            );
            return Err(GatewayError::CipherMismatch);
        }

        let mut seed = self
            .local
            .identity()
            .decrypt(&exchange.sealed)
            .map_err(|err| self.raise_crypto_error(format!("stream seed: {err}")))?;
        let decrypter = self.suite.decrypter(&seed);
        seed.zeroize();
        let decrypter =
            decrypter.map_err(|err| self.raise_crypto_error(format!("stream seed: {err}")))?;

        *inbound = Some(decrypter);
        drop(inbound);

        debug!("peer stream established");
        self.advance(STREAM_ESTABLISHED);
        Ok(())
    }

    fn handle_signed(&self, message: &Message) -> Result<(), GatewayError> {
        let kind = message.kind();
        let peer = (*lock(&self.peer)).ok_or_else(|| GatewayError::protocol("peer unknown"))?;

        let expected_key = if kind == MessageType::ConfirmOld {
            if self.local_status() < status::CONFIRM_OLD {
                return Err(GatewayError::protocol(
                    "CONFIRM_OLD before the current key verified",
                ));
            }
            self.old_peer_key()
                .ok_or_else(|| GatewayError::protocol("no previous peer key registered"))?
        } else {
            self.peer_key()
                .ok_or_else(|| GatewayError::protocol("peer key unknown"))?
        };

        let plaintext = self.open(message)?;
        let block = SignedBlock::decode(Bytes::from(plaintext))
            .map_err(|err| self.raise_crypto_error(format!("signed block: {err}")))?;

        let local_timestamp = self.local_timestamp.load(Ordering::SeqCst);
        if block.sender_timestamp != peer.timestamp || block.receiver_timestamp != local_timestamp
        {
            return Err(self.raise_crypto_error("signed timestamps do not match this session"));
        }

        let binding = SignedBlock::binding(
            block.sender_timestamp,
            block.receiver_timestamp,
            &peer.node,
            &self.local.node(),
        );
        let digest = self.suite.digest().hash(&binding);
        if !self
            .local
            .identity()
            .verify(&digest, &block.signature, &expected_key)
        {
            return Err(self.raise_crypto_error(format!("{kind:?} signature did not verify")));
        }

        if kind == MessageType::ConfirmOld {
            info!(peer = %peer.node, "previous peer key confirmed");
            self.mark_signed();
            return Ok(());
        }

        match self.old_peer_key() {
            Some(old) if old != expected_key => {
                info!(peer = %peer.node, "peer key rotated, requesting proof with its previous key");
                self.advance(status::CONFIRM_OLD);
            }
            _ => self.mark_signed(),
        }
        Ok(())
    }

    fn handle_data(&self, message: &Message) -> Result<Bytes, GatewayError> {
        if !self.is_signed() {
            return Err(GatewayError::NotSigned);
        }
        self.open(message).map(Bytes::from)
    }

    /// Decrypt a cipher-bearing message with the peer's stream.
    fn open(&self, message: &Message) -> Result<Vec<u8>, GatewayError> {
        let tag = message
            .tag()
            .ok_or(WireError::MissingTag(message.kind()))?;

        let result = {
            let mut inbound = lock(&self.inbound);
            let decrypter = inbound.as_mut().ok_or(GatewayError::NoStream)?;
            decrypter.receive_data(message.payload(), tag)
        };

        match result {
            Ok(plaintext) => Ok(plaintext),
            Err(CipherError::StreamBroken(tag)) => Err(self.raise_crypto_error(format!(
                "no packet in the receive window for tag 0x{tag:04x}"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    // ---------------------------------------------------------------------
    // Bookkeeping
    // ---------------------------------------------------------------------

    fn record(&self, message: &Message) {
        self.peer_status.store(message.status(), Ordering::SeqCst);
        let mut liveness = lock(&self.liveness);
        liveness.last_at = Instant::now();
        liveness.last_type = Some(message.kind());
    }

    /// Advance local progress from what the peer's status tells us.
    fn promote(&self, sender_status: u8) {
        if !status::is_progress(sender_status) {
            return;
        }

        if self.local_status() == PEER_UNKNOWN && sender_status >= PEER_UNKNOWN {
            self.advance(SETTINGS_EXCHANGED);
        }
        if self.local_status() == SETTINGS_EXCHANGED && lock(&self.outbound).is_some() {
            self.advance(ESTABLISHING_STREAM);
        }
        if self.local_status() == STREAM_ESTABLISHED && sender_status >= STREAM_ESTABLISHED {
            self.advance(SIGNING);
        }
    }

    fn advance(&self, to: u8) {
        let from = self.local_status.fetch_max(to, Ordering::SeqCst);
        if from < to {
            debug!(
                from = status::describe(from),
                to = status::describe(to),
                "local status advanced"
            );
        }
    }

    fn mark_signed(&self) {
        self.signed.store(true, Ordering::SeqCst);
        self.advance(ESTABLISHED);
        info!(node = %self.local.node(), "connection signed");
    }

    fn raise_crypto_error(&self, reason: impl Into<String>) -> GatewayError {
        let reason = reason.into();
        self.crypto_error.store(true, Ordering::SeqCst);
        lock(&self.crypto_error_at).get_or_insert_with(Instant::now);
        warn!(reason = %reason, "crypto error");
        GatewayError::Crypto(reason)
    }

    /// Clear a crypto error that has stood for longer than the timeout.
    fn expire_crypto_error(&self) {
        if !self.has_crypto_error() {
            return;
        }

        let raised_at = *lock(&self.crypto_error_at);
        let expired = raised_at.map_or(true, |at| at.elapsed() >= self.config.crypto_error_timeout());
        if expired {
            info!(
                timeout_ms = self.config.crypto_error_timeout_ms,
                "crypto error timed out, resetting session"
            );
            self.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nodegate_crypto::{CipherKind, NullIdentity};

    use super::*;

    fn null_config() -> GatewayConfig {
        GatewayConfig {
            cipher: CipherKind::Null,
            ..GatewayConfig::default()
        }
    }

    fn gateway(node: &str, config: GatewayConfig) -> Gateway {
        let identity = Arc::new(NullIdentity::new(format!("key-{node}").as_bytes()));
        Gateway::new(config, LocalIdentity::named("group", node, identity).unwrap())
    }

    fn round_trip(a: &Gateway, b: &Gateway) {
        let _ = b.process_message(&a.get_message());
        let _ = a.process_message(&b.get_message());
    }

    fn connect(a: &Gateway, b: &Gateway) {
        for _ in 0..7 {
            round_trip(a, b);
            if a.connected() && b.connected() {
                return;
            }
        }
        panic!(
            "no connection: a={} b={}",
            status::describe(a.current_status()),
            status::describe(b.current_status())
        );
    }

    #[test]
    fn gateway_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Gateway>();
    }

    #[test]
    fn first_message_is_initial() {
        let a = gateway("A", null_config());
        let message = a.get_message();
        assert_eq!(message.kind(), MessageType::Initial);
        assert_eq!(message.status(), UNCONNECTED);

        let initial = InitialPayload::decode(message.payload().clone()).unwrap();
        assert_eq!(initial.node.to_string(), "A");
        assert_eq!(initial.modulus.as_ref(), b"key-A");
        assert!(!a.connected());
    }

    #[test]
    fn null_algorithms_connect() {
        let a = gateway("A", null_config());
        let b = gateway("B", null_config());
        connect(&a, &b);

        assert_eq!(a.local_status(), ESTABLISHED);
        assert_eq!(b.peer_node().map(|n| n.to_string()), Some("A".into()));
        assert_eq!(a.get_message().kind(), MessageType::Ping);

        let data = a.data_message(b"payload").unwrap();
        assert_eq!(b.process_message(&data).unwrap().unwrap().as_ref(), b"payload");
        assert_eq!(b.last_message_type(), Some(MessageType::Data));
    }

    #[test]
    fn data_requires_signed_connection() {
        let a = gateway("A", null_config());
        assert!(matches!(a.data_message(b"x"), Err(GatewayError::NotSigned)));

        let forged = Message::with_tag(MessageType::Data, ESTABLISHED, 0x1234, &b"x"[..]);
        assert!(matches!(
            a.process_message(&forged),
            Err(GatewayError::NotSigned)
        ));
        assert!(!a.has_crypto_error());
    }

    #[test]
    fn foreign_group_is_dropped() {
        let a = gateway("A", null_config());
        let identity = Arc::new(NullIdentity::new(b"key-B"));
        let stranger = Gateway::new(
            null_config(),
            LocalIdentity::named("other", "B", identity).unwrap(),
        );

        let result = a.process_message(&stranger.get_message());
        assert!(matches!(result, Err(GatewayError::Protocol(_))));
        assert_eq!(a.local_status(), UNCONNECTED);
        assert!(!a.has_error());
    }

    #[test]
    fn exchange_before_initial_is_dropped() {
        let a = gateway("A", null_config());
        let exchange = Message::new(MessageType::ExchangeStream, ESTABLISHING_STREAM, vec![0, 1, 2]);
        assert!(matches!(
            a.process_message(&exchange),
            Err(GatewayError::Protocol(_))
        ));
        assert_eq!(a.local_status(), UNCONNECTED);
    }

    #[test]
    fn cipher_mismatch_sets_error() {
        let a = gateway("A", null_config());
        let b = gateway("B", null_config());
        round_trip(&a, &b);
        assert_eq!(a.local_status(), SETTINGS_EXCHANGED);

        let exchange = StreamExchange {
            cipher: CipherKind::Rc4.id(),
            sealed: Bytes::from_static(&[7; 32]),
        };
        let message = Message::new(
            MessageType::ExchangeStream,
            ESTABLISHING_STREAM,
            exchange.encode(),
        );
        let result = a.process_message(&message);

        assert!(matches!(result, Err(GatewayError::CipherMismatch)));
        assert!(a.has_error());
        assert_eq!(a.current_status(), BASIC_ERROR);
    }

    #[test]
    fn error_flags_drive_status_byte() {
        let a = gateway("A", null_config());

        a.mark_timed_out();
        assert_eq!(a.current_status(), TIMEOUT_ERROR);
        assert_eq!(a.get_message().kind(), MessageType::Error);

        a.force_crypto_error();
        assert_eq!(a.current_status(), CONFIRM_ERROR);
        assert_eq!(a.get_message().kind(), MessageType::CryptoError);

        let ping = Message::control(MessageType::Ping, UNCONNECTED);
        assert!(matches!(a.process_message(&ping), Err(GatewayError::Degraded)));

        a.reset();
        assert_eq!(a.current_status(), UNCONNECTED);
        assert!(!a.is_timed_out());
        assert!(!a.has_crypto_error());
    }

    #[test]
    fn reset_keeps_old_key_and_moves_timestamp() {
        let a = gateway("A", null_config());
        a.push_old_key(Modulus::from_bytes(b"old"));
        let before = a.local_timestamp.load(Ordering::SeqCst);

        a.reset();
        assert!(a.local_timestamp.load(Ordering::SeqCst) > before);
        assert_eq!(a.old_peer_key(), Some(Modulus::from_bytes(b"old")));

        a.clear_old_key();
        assert_eq!(a.old_peer_key(), None);
    }

    #[test]
    fn peer_error_is_confirmed() {
        let a = gateway("A", null_config());
        let b = gateway("B", null_config());
        connect(&a, &b);

        b.process_message(&Message::control(MessageType::Error, BASIC_ERROR))
            .unwrap();
        assert!(!b.connected());
        assert_eq!(b.local_status(), UNCONNECTED);
        assert_eq!(b.peer_status(), PERMANENT_ERROR);
        assert_eq!(b.get_message().kind(), MessageType::ErrorConfirm);
    }

    #[test]
    fn missing_previous_identity_sends_error() {
        let a = gateway("A", null_config());
        a.peer_status.store(status::CONFIRM_OLD, Ordering::SeqCst);
        assert_eq!(a.get_message().kind(), MessageType::Error);
    }
}
