//! Game Client
//!
//! One reliable channel to the server over a socket the client owns. A
//! pump task feeds the channel's inbox from the socket.
//!
//! The server starts a fresh channel for every login, so [`Client::login`]
//! starts one too: both sequence bits go back to zero before the request.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::network::channel::{inbox, spawn_socket_pump, ArqConfig, ChannelError, ReliableChannel};
use crate::network::login::{LoginError, LOGIN_OK};

/// Login attempts before giving up.
pub const LOGIN_ATTEMPTS: u32 = 3;

/// How long each login attempt waits for the server's verdict.
pub const LOGIN_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket setup failed.
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Reliable channel failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The server refused the login.
    #[error("Login rejected: {0}")]
    LoginRejected(String),

    /// No verdict after every attempt.
    #[error("No login confirmation after {0} attempts")]
    LoginTimedOut(u32),
}

/// How the server answered a login request.
enum Verdict {
    Accepted,
    /// Retrying cannot help.
    Refused(String),
    /// The request itself was malformed.
    Retry(String),
}

/// Connection to a game server.
pub struct Client {
    socket: Arc<UdpSocket>,
    arq: ArqConfig,
    channel: ReliableChannel,
    pump: JoinHandle<()>,
    local_addr: SocketAddr,
    /// Notices that arrived while a login was waiting for its verdict.
    backlog: VecDeque<String>,
}

impl Client {
    /// Bind `bind` and open a channel to `server`.
    pub async fn connect(bind: SocketAddr, server: SocketAddr, arq: &ArqConfig) -> Result<Self, ClientError> {
        let socket = Arc::new(UdpSocket::bind(bind).await?);
        let local_addr = socket.local_addr()?;

        let (tx, rx) = inbox();
        let pump = spawn_socket_pump(socket.clone(), arq.mtu, tx);
        let channel = ReliableChannel::new(socket.clone(), server, rx, arq);

        debug!("Client {} -> {}", local_addr, server);
        Ok(Self {
            socket,
            arq: arq.clone(),
            channel,
            pump,
            local_addr,
            backlog: VecDeque::new(),
        })
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Server address.
    pub fn server_addr(&self) -> SocketAddr {
        self.channel.remote()
    }

    /// Reliably send one text message.
    pub async fn send(&mut self, text: &str) -> Result<(), ClientError> {
        self.channel.send(text.as_bytes()).await?;
        Ok(())
    }

    /// Receive the next notice, or `None` if `wait` elapses first.
    pub async fn recv(&mut self, wait: Option<Duration>) -> Result<Option<String>, ClientError> {
        if let Some(text) = self.backlog.pop_front() {
            return Ok(Some(text));
        }
        self.recv_from_channel(wait).await
    }

    async fn recv_from_channel(&mut self, wait: Option<Duration>) -> Result<Option<String>, ClientError> {
        let payload = self.channel.recv(wait).await?;
        Ok(payload.map(|p| String::from_utf8_lossy(&p).into_owned()))
    }

    /// Receive notices until one satisfies `wanted` or `wait` elapses.
    ///
    /// Notices that do not match are discarded.
    pub async fn wait_for(
        &mut self,
        wait: Duration,
        wanted: impl Fn(&str) -> bool,
    ) -> Result<Option<String>, ClientError> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.recv(Some(remaining)).await? {
                Some(text) if wanted(&text) => return Ok(Some(text)),
                Some(text) => debug!("Skipping notice: {}", text),
                None => return Ok(None),
            }
        }
    }

    /// Log in as `name`, retrying up to [`LOGIN_ATTEMPTS`] times.
    ///
    /// A refusal that retrying cannot fix ends the attempts early. Other
    /// notices received while waiting are kept for [`Client::recv`].
    pub async fn login(&mut self, name: &str) -> Result<(), ClientError> {
        self.reset_channel().await;

        let request = format!("login {name}");
        let mut last_reply = None;

        for attempt in 1..=LOGIN_ATTEMPTS {
            info!("Login attempt {} of {} as {}", attempt, LOGIN_ATTEMPTS, name);

            match self.channel.send(request.as_bytes()).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!("Login request not delivered: {}", e);
                    continue;
                }
            }

            match self.await_verdict(name).await? {
                Some(Verdict::Accepted) => return Ok(()),
                Some(Verdict::Refused(reply)) => return Err(ClientError::LoginRejected(reply)),
                Some(Verdict::Retry(reply)) => {
                    warn!("Login refused: {}", reply);
                    last_reply = Some(reply);
                }
                None => warn!("No login reply (attempt {})", attempt),
            }
        }

        match last_reply {
            Some(reply) => Err(ClientError::LoginRejected(reply)),
            None => Err(ClientError::LoginTimedOut(LOGIN_ATTEMPTS)),
        }
    }

    /// Read until the server answers the login or the reply timeout ends.
    async fn await_verdict(&mut self, name: &str) -> Result<Option<Verdict>, ClientError> {
        let name = name.to_string();
        let refused = [
            LoginError::NotAContact(name.clone()).to_string(),
            LoginError::AlreadyOnline(name.clone()).to_string(),
            LoginError::EndpointMismatch(name).to_string(),
        ];
        let malformed = [
            LoginError::Usage.to_string(),
            LoginError::NotALogin.to_string(),
            LoginError::MissingName.to_string(),
        ];

        let deadline = Instant::now() + LOGIN_REPLY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.recv_from_channel(Some(remaining)).await? {
                Some(reply) if reply == LOGIN_OK => return Ok(Some(Verdict::Accepted)),
                Some(reply) if refused.contains(&reply) => return Ok(Some(Verdict::Refused(reply))),
                Some(reply) if malformed.contains(&reply) => return Ok(Some(Verdict::Retry(reply))),
                Some(reply) => {
                    debug!("Notice before login verdict: {}", reply);
                    self.backlog.push_back(reply);
                }
                None => return Ok(None),
            }
        }
    }

    /// Replace the channel with a fresh one, both bits back at zero.
    async fn reset_channel(&mut self) {
        self.pump.abort();
        let _ = (&mut self.pump).await;

        let (tx, rx) = inbox();
        self.pump = spawn_socket_pump(self.socket.clone(), self.arq.mtu, tx);
        self.channel = ReliableChannel::new(self.socket.clone(), self.channel.remote(), rx, &self.arq);
        self.backlog.clear();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
