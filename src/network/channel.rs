//! Reliable Channel
//!
//! Stop-and-wait ARQ with an alternating sequence bit, one instance per
//! remote endpoint.
//!
//! ```text
//!   send side:  Idle ──send──▶ WaitingAck ──ack(bit)──▶ Idle (bit flipped)
//!                                  │ timeout
//!                                  └──▶ retransmit (≤ max_attempts)
//!
//!   recv side:  WaitingPacket ──packet(expected bit)──▶ deliver, flip
//!                     │ packet(other bit) ──▶ re-ack, discard duplicate
//! ```
//!
//! A channel never reads the socket itself. Whoever owns the socket (the
//! dispatcher on the server, a [`spawn_socket_pump`] task on the client)
//! forwards datagrams into the channel's inbox. Outbound packets and acks
//! are written straight to the shared socket.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::network::loss::LossModel;
use crate::network::packet::{self, Packet, SeqBit, ACK_LEN, DEFAULT_MTU, HEADER_LEN};

/// Capacity of a channel inbox. Datagrams beyond it are dropped by the
/// router; the remote retransmits them.
pub const INBOX_CAPACITY: usize = 64;

/// A datagram routed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Source endpoint as reported by the socket.
    pub from: SocketAddr,
    /// Raw datagram bytes.
    pub bytes: Vec<u8>,
}

/// Sending half of a channel inbox.
pub type InboxSender = mpsc::Sender<Inbound>;

/// Receiving half of a channel inbox, owned by the channel.
pub type InboxReceiver = mpsc::Receiver<Inbound>;

/// Create an inbox pair.
pub fn inbox() -> (InboxSender, InboxReceiver) {
    mpsc::channel(INBOX_CAPACITY)
}

/// ARQ parameters.
#[derive(Debug, Clone)]
pub struct ArqConfig {
    /// How long one attempt waits for its acknowledgment.
    pub timeout: Duration,
    /// Transmission attempts per message before giving up.
    pub max_attempts: u32,
    /// Probability that an attempt is dropped before reaching the socket.
    pub loss_probability: f64,
    /// Seed for the loss model (random when `None`).
    pub loss_seed: Option<u64>,
    /// Datagram size ceiling, header included.
    pub mtu: usize,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            max_attempts: 10,
            loss_probability: 0.0,
            loss_seed: None,
            mtu: DEFAULT_MTU,
        }
    }
}

impl ArqConfig {
    /// Largest payload a single message may carry.
    pub fn max_payload(&self) -> usize {
        self.mtu.saturating_sub(HEADER_LEN)
    }
}

/// Channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Message does not fit in one datagram.
    #[error("Payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Offending payload length.
        len: usize,
        /// Limit derived from the MTU.
        max: usize,
    },

    /// Retry budget exhausted for this message.
    #[error("No acknowledgment from {remote} after {attempts} attempts")]
    DeliveryFailed {
        /// Remote endpoint.
        remote: SocketAddr,
        /// Attempts made.
        attempts: u32,
    },

    /// The transport reported the remote as unreachable or reset.
    #[error("{remote} is unreachable: {source}")]
    Unreachable {
        /// Remote endpoint.
        remote: SocketAddr,
        /// Underlying transport error.
        #[source]
        source: io::Error,
    },

    /// The inbox was closed; the socket is gone or the channel was shut down.
    #[error("Channel to {0} closed")]
    Closed(SocketAddr),
}

impl ChannelError {
    /// Whether the channel itself should be considered dead.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChannelError::Unreachable { .. } | ChannelError::Closed(_))
    }
}

/// Counters kept per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Messages acknowledged by the remote.
    pub delivered: u64,
    /// Messages accepted from the remote.
    pub accepted: u64,
    /// Attempts after the first, per message.
    pub retransmissions: u64,
    /// Attempts swallowed by the loss model.
    pub simulated_drops: u64,
    /// Duplicate packets discarded.
    pub duplicates: u64,
    /// Packets discarded for a digest mismatch.
    pub corrupted: u64,
}

/// Stop-and-wait reliable channel to one remote endpoint.
pub struct ReliableChannel {
    remote: SocketAddr,
    socket: Arc<UdpSocket>,
    inbox: InboxReceiver,
    send_bit: SeqBit,
    recv_bit: SeqBit,
    /// Payloads accepted while a send was waiting for its ack.
    accepted: VecDeque<Vec<u8>>,
    loss: LossModel,
    config: ArqConfig,
    stats: ChannelStats,
}

impl std::fmt::Debug for ReliableChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableChannel")
            .field("remote", &self.remote)
            .field("send_bit", &self.send_bit)
            .field("recv_bit", &self.recv_bit)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ReliableChannel {
    /// Create a channel to `remote` over a shared socket.
    pub fn new(
        socket: Arc<UdpSocket>,
        remote: SocketAddr,
        inbox: InboxReceiver,
        config: &ArqConfig,
    ) -> Self {
        Self {
            remote,
            socket,
            inbox,
            send_bit: SeqBit::Zero,
            recv_bit: SeqBit::Zero,
            accepted: VecDeque::new(),
            loss: LossModel::from_probability(config.loss_probability, config.loss_seed),
            config: config.clone(),
            stats: ChannelStats::default(),
        }
    }

    /// Replace the loss model.
    pub fn with_loss_model(mut self, loss: LossModel) -> Self {
        self.loss = loss;
        self
    }

    /// Remote endpoint.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Bit the next outbound message will carry.
    pub fn send_bit(&self) -> SeqBit {
        self.send_bit
    }

    /// Bit the next accepted inbound message must carry.
    pub fn recv_bit(&self) -> SeqBit {
        self.recv_bit
    }

    /// Channel counters.
    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Close the inbox. Pending and future waits fail with
    /// [`ChannelError::Closed`] once buffered datagrams are drained.
    pub fn close(&mut self) {
        self.inbox.close();
    }

    /// Deliver one message, retransmitting until acknowledged.
    ///
    /// Blocks for at most `max_attempts × timeout`.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let max = self.config.max_payload();
        if payload.len() > max {
            return Err(ChannelError::PayloadTooLarge { len: payload.len(), max });
        }

        // Checked against the configured MTU above, which may exceed the default.
        let wire = Packet::new(self.send_bit, payload.to_vec()).to_bytes();

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                self.stats.retransmissions += 1;
            }

            if self.loss.should_drop() {
                self.stats.simulated_drops += 1;
                debug!(
                    "[arq {}] seq={} attempt {} dropped by loss model",
                    self.remote, self.send_bit, attempt
                );
            } else {
                self.transmit(&wire).await?;
                trace!(
                    "[arq {}] -> DATA seq={} len={} attempt {}",
                    self.remote, self.send_bit, payload.len(), attempt
                );
            }

            // A dropped attempt still waits out the timeout: a late ack for an
            // earlier attempt of the same message is as good as any.
            if self.await_ack().await? {
                trace!("[arq {}] <- ACK seq={}", self.remote, self.send_bit);
                self.send_bit = self.send_bit.flip();
                self.stats.delivered += 1;
                return Ok(());
            }

            debug!(
                "[arq {}] timeout waiting for ack seq={} (attempt {}/{})",
                self.remote, self.send_bit, attempt, self.config.max_attempts
            );
        }

        warn!(
            "[arq {}] giving up on seq={} after {} attempts",
            self.remote, self.send_bit, self.config.max_attempts
        );
        Err(ChannelError::DeliveryFailed {
            remote: self.remote,
            attempts: self.config.max_attempts,
        })
    }

    /// Receive the next new message.
    ///
    /// With `wait = None` this blocks until a message is accepted; with a
    /// timeout it returns `Ok(None)` when nothing new arrived in time.
    /// Duplicates and corrupted packets are never returned.
    pub async fn recv(&mut self, wait: Option<Duration>) -> Result<Option<Vec<u8>>, ChannelError> {
        if let Some(payload) = self.accepted.pop_front() {
            return Ok(Some(payload));
        }

        let deadline = wait.map(|w| Instant::now() + w);

        loop {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, self.inbox.recv()).await {
                    Ok(next) => next,
                    Err(_) => return Ok(None),
                },
                None => self.inbox.recv().await,
            };

            let inbound = next.ok_or(ChannelError::Closed(self.remote))?;
            if inbound.from != self.remote {
                trace!("[arq {}] ignoring datagram from {}", self.remote, inbound.from);
                continue;
            }

            if inbound.bytes.len() == ACK_LEN {
                trace!("[arq {}] stray ack while receiving", self.remote);
                continue;
            }

            if let Some(payload) = self.absorb_packet(&inbound.bytes).await? {
                return Ok(Some(payload));
            }
        }
    }

    /// Wait for the ack of the current send bit.
    ///
    /// Returns `Ok(false)` when the timeout elapses first.
    async fn await_ack(&mut self) -> Result<bool, ChannelError> {
        let deadline = Instant::now() + self.config.timeout;

        loop {
            let inbound = match timeout_at(deadline, self.inbox.recv()).await {
                Err(_) => return Ok(false),
                Ok(None) => return Err(ChannelError::Closed(self.remote)),
                Ok(Some(inbound)) => inbound,
            };

            if inbound.from != self.remote {
                trace!("[arq {}] ack wait: datagram from {}", self.remote, inbound.from);
                continue;
            }

            if inbound.bytes.len() == ACK_LEN {
                match packet::decode_ack(&inbound.bytes) {
                    Some(bit) if bit == self.send_bit => return Ok(true),
                    other => {
                        trace!("[arq {}] ignoring ack {:?}, want {}", self.remote, other, self.send_bit);
                        continue;
                    }
                }
            }

            // The remote is sending to us at the same time. Acknowledge and
            // keep its message for the next recv so neither side stalls.
            if let Some(payload) = self.absorb_packet(&inbound.bytes).await? {
                self.accepted.push_back(payload);
            }
        }
    }

    /// Receive-side handling of one data datagram.
    ///
    /// Returns the payload when it is the next expected message.
    async fn absorb_packet(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>, ChannelError> {
        let decoded = match packet::decode(bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                trace!("[arq {}] {}", self.remote, e);
                return Ok(None);
            }
        };

        if !decoded.integrity_ok {
            self.stats.corrupted += 1;
            debug!(
                "[arq {}] discarding corrupted packet (digest {})",
                self.remote,
                hex::encode(&bytes[1..HEADER_LEN])
            );
            return Ok(None);
        }

        // Ack before changing state: if this future is dropped mid-ack the
        // retransmission is still accepted as new.
        self.send_ack(decoded.seq).await?;

        if decoded.seq == self.recv_bit {
            self.recv_bit = self.recv_bit.flip();
            self.stats.accepted += 1;
            Ok(Some(decoded.payload))
        } else {
            self.stats.duplicates += 1;
            debug!("[arq {}] duplicate seq={}, re-acked", self.remote, decoded.seq);
            Ok(None)
        }
    }

    async fn send_ack(&self, seq: SeqBit) -> Result<(), ChannelError> {
        match self.socket.send_to(&packet::encode_ack(seq), self.remote).await {
            Ok(_) => Ok(()),
            Err(e) if is_unreachable(&e) => Err(ChannelError::Unreachable {
                remote: self.remote,
                source: e,
            }),
            Err(e) => {
                debug!("[arq {}] failed to send ack: {}", self.remote, e);
                Ok(())
            }
        }
    }

    async fn transmit(&self, wire: &[u8]) -> Result<(), ChannelError> {
        match self.socket.send_to(wire, self.remote).await {
            Ok(_) => Ok(()),
            Err(e) if is_unreachable(&e) => Err(ChannelError::Unreachable {
                remote: self.remote,
                source: e,
            }),
            // Anything else behaves like a lost attempt.
            Err(e) => {
                debug!("[arq {}] send error treated as loss: {}", self.remote, e);
                Ok(())
            }
        }
    }
}

/// Transport errors that no retransmission can fix.
pub(crate) fn is_unreachable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

/// Forward every datagram read from `socket` into `tx`.
///
/// Used where one channel owns a socket outright. The task ends when the
/// inbox is closed.
pub fn spawn_socket_pump(socket: Arc<UdpSocket>, mtu: usize, tx: InboxSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; mtu.max(HEADER_LEN)];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) if is_unreachable(&e) => {
                    debug!("[pump] transient receive error: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!("[pump] socket receive failed: {}", e);
                    break;
                }
            };

            let inbound = Inbound { from, bytes: buf[..n].to_vec() };
            match tx.try_send(inbound) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("[pump] inbox full, dropping datagram from {}", from);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
    }

    fn fast_config() -> ArqConfig {
        ArqConfig {
            timeout: Duration::from_millis(100),
            max_attempts: 5,
            ..ArqConfig::default()
        }
    }

    async fn read_datagram(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("datagram not received in time")
            .unwrap();
        buf.truncate(n);
        buf
    }

    /// Channel whose outbound traffic lands on `remote`, with the inbox
    /// driven by the test.
    async fn harness(config: &ArqConfig) -> (ReliableChannel, InboxSender, Arc<UdpSocket>) {
        let local = loopback().await;
        let remote = loopback().await;
        let (tx, rx) = inbox();
        let channel = ReliableChannel::new(local, remote.local_addr().unwrap(), rx, config);
        (channel, tx, remote)
    }

    #[tokio::test]
    async fn test_recv_delivers_retransmission_once() {
        let (mut channel, tx, remote) = harness(&fast_config()).await;
        let from = remote.local_addr().unwrap();

        // The first ack is "lost": the sender retransmits seq 0, then moves on.
        let first = packet::encode(SeqBit::Zero, b"move up").unwrap();
        tx.send(Inbound { from, bytes: first.clone() }).await.unwrap();
        tx.send(Inbound { from, bytes: first }).await.unwrap();
        tx.send(Inbound { from, bytes: packet::encode(SeqBit::One, b"hint").unwrap() }).await.unwrap();

        let a = channel.recv(Some(Duration::from_millis(500))).await.unwrap();
        let b = channel.recv(Some(Duration::from_millis(500))).await.unwrap();
        assert_eq!(a.as_deref(), Some(&b"move up"[..]));
        assert_eq!(b.as_deref(), Some(&b"hint"[..]));

        // Both copies of seq 0 were acknowledged, then seq 1.
        assert_eq!(read_datagram(&remote).await, vec![0]);
        assert_eq!(read_datagram(&remote).await, vec![0]);
        assert_eq!(read_datagram(&remote).await, vec![1]);

        assert_eq!(channel.stats().duplicates, 1);
        assert_eq!(channel.recv_bit(), SeqBit::Zero);
    }

    #[tokio::test]
    async fn test_recv_drops_corrupted_and_foreign_packets() {
        let (mut channel, tx, remote) = harness(&fast_config()).await;
        let from = remote.local_addr().unwrap();
        let stranger: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let mut corrupted = packet::encode(SeqBit::Zero, b"logout").unwrap();
        corrupted[2] ^= 0x10;
        tx.send(Inbound { from, bytes: corrupted }).await.unwrap();
        tx.send(Inbound { from: stranger, bytes: packet::encode(SeqBit::Zero, b"intruder").unwrap() })
            .await
            .unwrap();
        tx.send(Inbound { from, bytes: vec![1, 2] }).await.unwrap();

        let nothing = channel.recv(Some(Duration::from_millis(150))).await.unwrap();
        assert!(nothing.is_none());
        assert_eq!(channel.stats().corrupted, 1);
        assert_eq!(channel.recv_bit(), SeqBit::Zero);

        // The sender's retransmission of the intact packet gets through.
        tx.send(Inbound { from, bytes: packet::encode(SeqBit::Zero, b"logout").unwrap() }).await.unwrap();
        let payload = channel.recv(Some(Duration::from_millis(500))).await.unwrap();
        assert_eq!(payload.as_deref(), Some(&b"logout"[..]));

        // Only the intact packet was acknowledged.
        assert_eq!(read_datagram(&remote).await, vec![0]);
    }

    #[tokio::test]
    async fn test_recv_timeout_returns_none() {
        let (mut channel, _tx, _remote) = harness(&fast_config()).await;
        let result = channel.recv(Some(Duration::from_millis(50))).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_send_retransmits_until_acked() {
        let (mut channel, tx, remote) = harness(&fast_config()).await;
        let from = remote.local_addr().unwrap();

        let sender = tokio::spawn(async move {
            let sent = channel.send(b"round 0").await;
            sent.map(|_| channel)
        });

        // First attempt arrives; its ack is withheld.
        let first = read_datagram(&remote).await;
        // Second attempt is the identical packet.
        let second = read_datagram(&remote).await;
        assert_eq!(first, second);

        let decoded = packet::decode(&first).unwrap();
        assert_eq!(decoded.seq, SeqBit::Zero);
        assert_eq!(decoded.payload, b"round 0");

        // A wrong-bit ack is ignored, the right one completes the send.
        tx.send(Inbound { from, bytes: vec![1] }).await.unwrap();
        tx.send(Inbound { from, bytes: vec![0] }).await.unwrap();

        let channel = sender.await.unwrap().unwrap();
        assert_eq!(channel.send_bit(), SeqBit::One);
        assert!(channel.stats().retransmissions >= 1);
    }

    #[tokio::test]
    async fn test_send_gives_up_after_max_attempts() {
        let config = ArqConfig {
            timeout: Duration::from_millis(30),
            max_attempts: 3,
            ..ArqConfig::default()
        };
        let (mut channel, _tx, _remote) = harness(&config).await;

        let err = channel.send(b"anyone?").await.unwrap_err();
        assert!(matches!(err, ChannelError::DeliveryFailed { attempts: 3, .. }));
        assert!(!err.is_fatal());
        // A failed message does not consume the bit.
        assert_eq!(channel.send_bit(), SeqBit::Zero);
    }

    #[tokio::test]
    async fn test_send_rejects_oversized_payload() {
        let (mut channel, _tx, _remote) = harness(&fast_config()).await;
        let payload = vec![b'x'; DEFAULT_MTU];

        let err = channel.send(&payload).await.unwrap_err();
        assert!(matches!(err, ChannelError::PayloadTooLarge { max, .. } if max == DEFAULT_MTU - HEADER_LEN));
    }

    #[tokio::test]
    async fn test_closed_inbox_is_fatal() {
        let (mut channel, _tx, _remote) = harness(&fast_config()).await;
        channel.close();

        let err = channel.recv(None).await.unwrap_err();
        assert!(err.is_fatal());
        let err = channel.send(b"bye").await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed(_)));
    }

    #[tokio::test]
    async fn test_packet_during_ack_wait_is_queued() {
        let (mut channel, tx, remote) = harness(&fast_config()).await;
        let from = remote.local_addr().unwrap();

        let sender = tokio::spawn(async move {
            let sent = channel.send(b"your turn").await;
            sent.map(|_| channel)
        });

        let outbound = read_datagram(&remote).await;
        assert!(outbound.len() > ACK_LEN);

        // The remote's own message crosses ours on the wire, then its ack.
        tx.send(Inbound { from, bytes: packet::encode(SeqBit::Zero, b"move left").unwrap() }).await.unwrap();
        tx.send(Inbound { from, bytes: vec![0] }).await.unwrap();

        let mut channel = sender.await.unwrap().unwrap();
        assert_eq!(read_datagram(&remote).await, vec![0]);

        let queued = channel.recv(Some(Duration::from_millis(10))).await.unwrap();
        assert_eq!(queued.as_deref(), Some(&b"move left"[..]));
        assert_eq!(channel.recv_bit(), SeqBit::One);
    }

    #[tokio::test]
    async fn test_bits_alternate_over_lossy_link() {
        let config = fast_config();
        let a_socket = loopback().await;
        let b_socket = loopback().await;
        let a_addr = a_socket.local_addr().unwrap();
        let b_addr = b_socket.local_addr().unwrap();

        let (a_tx, a_rx) = inbox();
        let (b_tx, b_rx) = inbox();
        let a_pump = spawn_socket_pump(a_socket.clone(), config.mtu, a_tx);
        let b_pump = spawn_socket_pump(b_socket.clone(), config.mtu, b_tx);

        let mut a = ReliableChannel::new(a_socket, b_addr, a_rx, &config)
            .with_loss_model(LossModel::scripted([false, true, false, true, true, false]));
        let mut b = ReliableChannel::new(b_socket, a_addr, b_rx, &config);

        let messages: Vec<Vec<u8>> = (0..6).map(|i| format!("msg {i}").into_bytes()).collect();
        let expected = messages.clone();

        let receiver = tokio::spawn(async move {
            let mut got = Vec::new();
            let mut bits = Vec::new();
            while got.len() < 6 {
                bits.push(b.recv_bit());
                if let Some(p) = b.recv(Some(Duration::from_secs(5))).await.unwrap() {
                    got.push(p);
                }
            }
            (got, bits, b.recv_bit())
        });

        let mut send_bits = Vec::new();
        for m in &messages {
            send_bits.push(a.send_bit());
            a.send(m).await.unwrap();
        }

        let (got, recv_bits, final_recv) = receiver.await.unwrap();
        assert_eq!(got, expected);

        let alternating: Vec<SeqBit> = (0..6)
            .map(|i| if i % 2 == 0 { SeqBit::Zero } else { SeqBit::One })
            .collect();
        assert_eq!(send_bits, alternating);
        assert_eq!(recv_bits, alternating);
        assert_eq!(a.send_bit(), final_recv);
        assert_eq!(a.stats().simulated_drops, 3);

        a_pump.abort();
        b_pump.abort();
    }
}
