//! Datagram Game Server
//!
//! One UDP socket shared by every peer.
//!
//! ```text
//!                     ┌──────────────┐   inbox    ┌───────────────────┐
//!   datagrams ──────▶ │  dispatcher  │ ─────────▶ │ peer task (login, │
//!                     │ (recv_from)  │   per      │ then commands)    │
//!                     └──────────────┘  endpoint  └─────────┬─────────┘
//!                                                           │ lock
//!   tick loop ──on_timeout_tick──▶ ┌──────────────────────┐ │
//!   cleanup loop ──on_peer_leave─▶ │  SessionCoordinator  │◀┘
//!                                  └──────────┬───────────┘
//!                                             │ notices
//!                                             ▼
//!                                  PeerRegistry::broadcast / send_to
//! ```
//!
//! The dispatcher is the only reader of the socket. It hands each datagram
//! to the inbox of a registered peer, of a pending login, or of a new login
//! task. Channels write to the socket directly.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ConfigError;
use crate::game::rules::Rules;
use crate::game::session::{Notice, Recipient, SessionConfig, SessionCoordinator};
use crate::game::state::SessionPhase;
use crate::network::channel::{self, is_unreachable, ArqConfig, InboxSender, Inbound, ReliableChannel};
use crate::network::login::{authorize, parse_login, ContactBook, LoginError, LOGIN_OK};
use crate::network::packet::HEADER_LEN;
use crate::network::protocol::Command;
use crate::network::registry::{BroadcastOutcome, Peer, PeerRegistry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Reliable channel parameters, shared by every peer.
    pub arq: ArqConfig,
    /// Session rules.
    pub session: SessionConfig,
    /// Period of the round deadline check.
    pub tick_interval: Duration,
    /// How long a peer task waits for a message before rechecking its state.
    pub recv_poll: Duration,
    /// Time a new endpoint has to complete its login.
    pub login_timeout: Duration,
    /// Peers silent for this long are removed.
    pub idle_timeout: Duration,
    /// Period of the idle peer sweep.
    pub cleanup_interval: Duration,
    /// Allowed users. Anyone may log in when `None`.
    pub contacts: Option<ContactBook>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 12345)),
            arq: ArqConfig::default(),
            session: SessionConfig::default(),
            tick_interval: Duration::from_millis(250),
            recv_poll: Duration::from_millis(200),
            login_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            contacts: None,
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration rejected.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Socket error.
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every server task.
struct Shared<R: Rules> {
    config: ServerConfig,
    socket: Arc<UdpSocket>,
    registry: PeerRegistry,
    coordinator: Mutex<SessionCoordinator<R>>,
    /// Endpoints that are still logging in.
    pending: Mutex<HashMap<SocketAddr, InboxSender>>,
    shutdown_tx: broadcast::Sender<()>,
}

/// The game server.
pub struct GameServer<R: Rules> {
    shared: Arc<Shared<R>>,
    local_addr: SocketAddr,
}

impl<R: Rules> GameServer<R> {
    /// Validate the configuration and bind the socket.
    pub async fn bind(config: ServerConfig, rules: R) -> Result<Self, ServerError> {
        config.validate()?;

        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind { addr: config.bind_addr, source })?;
        let local_addr = socket.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        let coordinator = SessionCoordinator::new(config.session.clone(), rules);
        info!("Game {} bound to {}", coordinator.game_id(), local_addr);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                socket: Arc::new(socket),
                registry: PeerRegistry::new(),
                coordinator: Mutex::new(coordinator),
                pending: Mutex::new(HashMap::new()),
                shutdown_tx,
            }),
            local_addr,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops [`GameServer::run`] when triggered.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shared.shutdown_tx.clone())
    }

    /// Stop the server.
    pub fn shutdown(&self) {
        let _ = self.shared.shutdown_tx.send(());
    }

    /// Number of logged-in peers.
    pub async fn peer_count(&self) -> usize {
        self.shared.registry.len().await
    }

    /// Current session phase.
    pub async fn phase(&self) -> SessionPhase {
        self.shared.coordinator.lock().await.phase()
    }

    /// Index of the open round.
    pub async fn round_index(&self) -> u32 {
        self.shared.coordinator.lock().await.round_index()
    }

    /// Run until shut down.
    #[instrument(skip(self), fields(addr = %self.local_addr))]
    pub async fn run(&self) -> Result<(), ServerError> {
        info!("Game server listening on {}", self.local_addr);

        let tick_shared = self.shared.clone();
        let tick_handle = tokio::spawn(async move {
            Self::run_tick_loop(tick_shared).await;
        });

        let cleanup_shared = self.shared.clone();
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_shared).await;
        });

        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();
        let mut buf = vec![0u8; self.shared.config.arq.mtu];

        loop {
            let result = tokio::select! {
                result = self.shared.socket.recv_from(&mut buf) => result,
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            };

            match result {
                Ok((n, from)) => {
                    let inbound = Inbound { from, bytes: buf[..n].to_vec() };
                    Self::dispatch(&self.shared, inbound).await;
                }
                Err(e) if is_unreachable(&e) => {
                    debug!("Transient receive error: {}", e);
                }
                Err(e) => {
                    error!("Receive error: {}", e);
                }
            }
        }

        tick_handle.abort();
        cleanup_handle.abort();

        Ok(())
    }

    /// Route one datagram to exactly one inbox.
    async fn dispatch(shared: &Arc<Shared<R>>, inbound: Inbound) {
        let from = inbound.from;

        if let Some(peer) = shared.registry.lookup_by_endpoint(from).await {
            shared.registry.touch(peer.identity()).await;
            peer.forward(inbound);
            return;
        }

        let mut pending = shared.pending.lock().await;
        if let Some(tx) = pending.get(&from) {
            if tx.try_send(inbound).is_err() {
                debug!("Login inbox for {} unavailable, dropping datagram", from);
            }
            return;
        }

        // Stray acks from unknown endpoints do not open a login.
        if inbound.bytes.len() < HEADER_LEN {
            debug!("Ignoring {} byte datagram from unknown {}", inbound.bytes.len(), from);
            return;
        }

        debug!("New endpoint {}", from);
        let (tx, rx) = channel::inbox();
        let _ = tx.try_send(inbound);
        pending.insert(from, tx.clone());
        drop(pending);

        let channel = ReliableChannel::new(shared.socket.clone(), from, rx, &shared.config.arq);
        let shared = shared.clone();
        tokio::spawn(async move {
            Self::serve_endpoint(shared, from, Arc::new(Mutex::new(channel)), tx).await;
        });
    }

    /// Login, then serve commands until the peer leaves.
    async fn serve_endpoint(
        shared: Arc<Shared<R>>,
        from: SocketAddr,
        channel: Arc<Mutex<ReliableChannel>>,
        tx: InboxSender,
    ) {
        let result = Self::handle_login(&shared, from, channel.clone(), tx).await;
        shared.pending.lock().await.remove(&from);

        match result {
            Some(peer) => Self::serve_peer(&shared, peer).await,
            None => {
                channel.lock().await.close();
                debug!("Login from {} abandoned", from);
            }
        }
    }

    /// Run the login handshake. Returns the registered peer on success.
    async fn handle_login(
        shared: &Arc<Shared<R>>,
        from: SocketAddr,
        channel: Arc<Mutex<ReliableChannel>>,
        tx: InboxSender,
    ) -> Option<Peer> {
        let deadline = Instant::now() + shared.config.login_timeout;
        let mut shutdown_rx = shared.shutdown_tx.subscribe();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                info!("Login from {} timed out", from);
                return None;
            }

            let received = tokio::select! {
                r = async { channel.lock().await.recv(Some(remaining)).await } => r,
                _ = shutdown_rx.recv() => return None,
            };

            let payload = match received {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Login channel to {} failed: {}", from, e);
                    return None;
                }
            };

            let text = String::from_utf8_lossy(&payload);

            // Held from registration until the confirmation is delivered, so
            // no broadcast reaches the peer ahead of it.
            let mut coordinator = shared.coordinator.lock().await;
            let refusal = match Self::check_login(shared, &text, from).await {
                Ok(name) => {
                    let peer = Peer::new(name.clone(), from, channel.clone(), tx.clone());
                    match shared.registry.register(peer.clone()).await {
                        Ok(()) => {
                            info!("[LOGIN] {} connected from {}", name, from);
                            Self::welcome(shared, &mut coordinator, &peer).await;
                            return Some(peer);
                        }
                        Err(e) => {
                            warn!("Registration of {} failed: {}", name, e);
                            LoginError::AlreadyOnline(name)
                        }
                    }
                }
                Err(e) => e,
            };
            drop(coordinator);

            debug!("Login from {} refused: {}", from, refusal);
            if !Self::reply_direct(&channel, &refusal.to_string()).await {
                return None;
            }
        }
    }

    async fn check_login(shared: &Arc<Shared<R>>, text: &str, from: SocketAddr) -> Result<String, LoginError> {
        let name = parse_login(text)?;
        authorize(shared.config.contacts.as_ref(), &name, from)?;
        if shared.registry.contains(&name).await {
            return Err(LoginError::AlreadyOnline(name));
        }
        Ok(name)
    }

    /// Send on a channel that is not (or no longer) registered.
    async fn reply_direct(channel: &Arc<Mutex<ReliableChannel>>, text: &str) -> bool {
        let mut channel = channel.lock().await;
        match channel.send(text.as_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Reply to {} failed: {}", channel.remote(), e);
                !e.is_fatal()
            }
        }
    }

    /// Confirm the login and add the peer to the session.
    async fn welcome(shared: &Arc<Shared<R>>, coordinator: &mut SessionCoordinator<R>, peer: &Peer) {
        let identity = peer.identity();

        let notices = match coordinator.join(identity, Instant::now()) {
            Ok(notices) => notices,
            Err(e) => {
                warn!("{} could not join: {}", identity, e);
                Vec::new()
            }
        };
        let label = coordinator.actor(identity).map(|a| a.label()).unwrap_or_default();

        let mut greeting = vec![
            Notice::peer(identity, LOGIN_OK),
            Notice::peer(identity, format!("Welcome, {identity}! (player {label})")),
        ];
        greeting.extend(notices);
        Self::deliver(shared, coordinator, greeting).await;
    }

    /// Read commands from a registered peer until it leaves.
    async fn serve_peer(shared: &Arc<Shared<R>>, peer: Peer) {
        let identity = peer.identity().to_string();
        let poll = shared.config.recv_poll;
        let mut shutdown_rx = shared.shutdown_tx.subscribe();

        loop {
            // Removed elsewhere (send failure, idle sweep).
            match shared.registry.lookup_by_endpoint(peer.endpoint()).await {
                Some(current) if current.identity() == identity => {}
                _ => break,
            }

            // The channel lock is released before the coordinator is taken.
            let received = tokio::select! {
                r = async { peer.channel().lock().await.recv(Some(poll)).await } => r,
                _ = shutdown_rx.recv() => break,
            };

            match received {
                Ok(None) => {}
                Ok(Some(payload)) => {
                    if !Self::handle_command(shared, &identity, &payload).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Channel to {} failed: {}", identity, e);
                    Self::remove_peer(shared, &identity).await;
                    break;
                }
            }
        }

        peer.channel().lock().await.close();
        debug!("Peer task for {} finished", identity);
    }

    /// Handle one command. Returns `false` when the peer logged out.
    async fn handle_command(shared: &Arc<Shared<R>>, identity: &str, payload: &[u8]) -> bool {
        let command = match Command::from_payload(payload) {
            Ok(command) => command,
            Err(e) => {
                Self::reply(shared, identity, &e.to_string()).await;
                return true;
            }
        };
        debug!("{} sent {:?}", identity, command);

        match command {
            Command::Login(_) => {
                Self::reply(shared, identity, "You are already logged in.").await;
                true
            }
            Command::Score => {
                let coordinator = shared.coordinator.lock().await;
                let text = format!(
                    "Your score: {}. Scores: {}",
                    coordinator.score(identity).unwrap_or_default(),
                    coordinator.scoreboard()
                );
                drop(coordinator);
                Self::reply(shared, identity, &text).await;
                true
            }
            Command::Logout => {
                Self::reply(shared, identity, "Goodbye!").await;
                info!("{} logged out", identity);
                Self::remove_peer(shared, identity).await;
                false
            }
            Command::Action(action) => {
                let mut coordinator = shared.coordinator.lock().await;
                match coordinator.submit_action(identity, action, Instant::now()) {
                    Ok(report) => Self::deliver(shared, &mut coordinator, report.notices).await,
                    Err(e) => {
                        let notice = Notice::peer(identity, e.to_string());
                        Self::deliver(shared, &mut coordinator, vec![notice]).await;
                    }
                }
                true
            }
        }
    }

    async fn reply(shared: &Arc<Shared<R>>, identity: &str, text: &str) {
        match shared.registry.send_to(identity, text.as_bytes()).await {
            Ok(BroadcastOutcome::Delivered) | Err(_) => {}
            Ok(BroadcastOutcome::Failed) | Ok(BroadcastOutcome::Removed) => {
                Self::remove_peer(shared, identity).await;
            }
        }
    }

    /// Unregister a peer and take it out of the session.
    async fn remove_peer(shared: &Arc<Shared<R>>, identity: &str) {
        let mut coordinator = shared.coordinator.lock().await;
        shared.registry.unregister(identity).await;
        let notices = coordinator.on_peer_leave(identity, Instant::now());
        Self::deliver(shared, &mut coordinator, notices).await;
    }

    /// Deliver notices in order while the coordinator stays locked.
    ///
    /// A peer that does not acknowledge a notice within the retry budget, or
    /// whose channel died, leaves the session; the notices that produces are
    /// delivered too. A round opened along the way starts its clock once
    /// everything has gone out.
    async fn deliver(shared: &Arc<Shared<R>>, coordinator: &mut SessionCoordinator<R>, notices: Vec<Notice>) {
        let mut queue: VecDeque<Notice> = notices.into();

        while let Some(notice) = queue.pop_front() {
            let payload = notice.text.as_bytes();
            let outcomes = match &notice.recipient {
                Recipient::All => shared.registry.broadcast(payload, None).await,
                Recipient::AllExcept(identity) => shared.registry.broadcast(payload, Some(identity)).await,
                Recipient::Peer(identity) => match shared.registry.send_to(identity, payload).await {
                    Ok(outcome) => vec![(identity.clone(), outcome)],
                    Err(e) => {
                        debug!("Notice dropped: {}", e);
                        Vec::new()
                    }
                },
            };

            for (identity, outcome) in outcomes {
                match outcome {
                    BroadcastOutcome::Delivered => {}
                    BroadcastOutcome::Failed => {
                        warn!("{} stopped acknowledging, removing", identity);
                        shared.registry.unregister(&identity).await;
                        queue.extend(coordinator.on_peer_leave(&identity, Instant::now()));
                    }
                    BroadcastOutcome::Removed => {
                        queue.extend(coordinator.on_peer_leave(&identity, Instant::now()));
                    }
                }
            }
        }

        if coordinator.announce_round(Instant::now()) {
            debug!("Round {} clock started", coordinator.round_index());
        }
    }

    // =========================================================================
    // BACKGROUND LOOPS
    // =========================================================================

    /// Drive round deadlines and restarts.
    async fn run_tick_loop(shared: Arc<Shared<R>>) {
        let mut interval = interval(shared.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let mut coordinator = shared.coordinator.lock().await;
            let notices = coordinator.on_timeout_tick(Instant::now());
            if !notices.is_empty() {
                Self::deliver(&shared, &mut coordinator, notices).await;
            }
        }
    }

    /// Remove peers that have been silent for too long.
    async fn run_cleanup_loop(shared: Arc<Shared<R>>) {
        let mut interval = interval(shared.config.cleanup_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let Some(cutoff) = Instant::now().checked_sub(shared.config.idle_timeout) else {
                continue;
            };

            for identity in shared.registry.idle_since(cutoff).await {
                info!("Removed idle peer {}", identity);
                Self::remove_peer(&shared, &identity).await;
            }
        }
    }
}

/// Stops a running server from another task.
#[derive(Clone)]
pub struct ShutdownHandle(broadcast::Sender<()>);

impl ShutdownHandle {
    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.0.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::TreasureHunt;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 12345);
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.arq.max_attempts, 10);
        assert_eq!(config.session.min_peers, 2);
        assert!(config.contacts.is_none());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::bind(local_config(), TreasureHunt::new(3)).await.unwrap();

        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.peer_count().await, 0);
        assert_eq!(server.phase().await, SessionPhase::NotStarted);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = local_config();
        config.arq.max_attempts = 0;

        let err = GameServer::bind(config, TreasureHunt::new(3)).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = Arc::new(GameServer::bind(local_config(), TreasureHunt::new(3)).await.unwrap());
        let handle = server.shutdown_handle();

        let runner = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stray_ack_does_not_open_login() {
        let server = GameServer::bind(local_config(), TreasureHunt::new(3)).await.unwrap();
        let inbound = Inbound { from: "127.0.0.1:40100".parse().unwrap(), bytes: vec![0] };

        GameServer::dispatch(&server.shared, inbound).await;
        assert!(server.shared.pending.lock().await.is_empty());
    }
}
